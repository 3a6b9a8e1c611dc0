use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod actions;
pub mod directory;
pub mod history;
pub mod platform;
pub mod propagation;
pub mod requests;
pub mod scan;
