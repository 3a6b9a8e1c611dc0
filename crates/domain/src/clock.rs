use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ports::BoxFuture;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The single intentional suspension point: every pause in the system goes
/// through a `Pacer` so tests can run the state machines without real delays.
pub trait Pacer: Send + Sync {
    fn pause(&self, delay: Duration) -> BoxFuture<'_, ()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPacer;

impl Pacer for SystemPacer {
    fn pause(&self, delay: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Manually advanced clock for tests.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, value: i64) {
        self.now_ms.store(value, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Pacer that returns immediately but counts the pauses it was asked for.
#[derive(Clone, Debug, Default)]
pub struct NoopPacer {
    pauses: Arc<AtomicI64>,
}

impl NoopPacer {
    pub fn pauses(&self) -> i64 {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl Pacer for NoopPacer {
    fn pause(&self, _delay: Duration) -> BoxFuture<'_, ()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}
