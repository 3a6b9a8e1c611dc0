use std::sync::Arc;
use std::time::Duration;

use crate::clock::Pacer;
use crate::ports::platform::{BanOrder, LogPage, PlatformClient, PlatformError};
use crate::retry::RetryPolicy;

/// The one handle components use for external calls. Every call goes through
/// the retry policy (with the client's own `ensure_session` as the refresh
/// hook) and is followed by the mandatory fixed pacing pause.
pub struct PlatformGateway {
    client: Arc<dyn PlatformClient>,
    retry: RetryPolicy,
    pacer: Arc<dyn Pacer>,
    pace: Duration,
}

impl PlatformGateway {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        retry: RetryPolicy,
        pacer: Arc<dyn Pacer>,
        pace: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            pacer,
            pace,
        }
    }

    async fn call<T>(
        &self,
        op: impl FnMut() -> crate::ports::BoxFuture<'static, Result<T, PlatformError>>,
    ) -> Result<T, PlatformError> {
        let client = Arc::clone(&self.client);
        let result = self
            .retry
            .run(self.pacer.as_ref(), op, move || {
                let client = Arc::clone(&client);
                Box::pin(async move { client.ensure_session().await })
            })
            .await;
        self.pacer.pause(self.pace).await;
        result
    }

    pub async fn ensure_session(&self) -> Result<(), PlatformError> {
        let client = Arc::clone(&self.client);
        self.call(move || {
            let client = Arc::clone(&client);
            Box::pin(async move { client.ensure_session().await })
        })
        .await
    }

    pub async fn moderated_communities(&self) -> Result<Vec<String>, PlatformError> {
        let client = Arc::clone(&self.client);
        self.call(move || {
            let client = Arc::clone(&client);
            Box::pin(async move { client.moderated_communities().await })
        })
        .await
    }

    pub async fn log_page_before(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<LogPage, PlatformError> {
        let client = Arc::clone(&self.client);
        let community = community.to_string();
        let cursor = cursor.map(str::to_string);
        self.call(move || {
            let client = Arc::clone(&client);
            let community = community.clone();
            let cursor = cursor.clone();
            Box::pin(async move {
                client
                    .log_page_before(&community, cursor.as_deref(), limit)
                    .await
            })
        })
        .await
    }

    pub async fn log_page_after(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<LogPage, PlatformError> {
        let client = Arc::clone(&self.client);
        let community = community.to_string();
        let cursor = cursor.map(str::to_string);
        self.call(move || {
            let client = Arc::clone(&client);
            let community = community.clone();
            let cursor = cursor.clone();
            Box::pin(async move {
                client
                    .log_page_after(&community, cursor.as_deref(), limit)
                    .await
            })
        })
        .await
    }

    pub async fn ban(&self, order: &BanOrder) -> Result<(), PlatformError> {
        let client = Arc::clone(&self.client);
        let order = order.clone();
        self.call(move || {
            let client = Arc::clone(&client);
            let order = order.clone();
            Box::pin(async move { client.ban(&order).await })
        })
        .await
    }

    pub async fn unban(&self, community: &str, handle: &str) -> Result<(), PlatformError> {
        let client = Arc::clone(&self.client);
        let community = community.to_string();
        let handle = handle.to_string();
        self.call(move || {
            let client = Arc::clone(&client);
            let community = community.clone();
            let handle = handle.clone();
            Box::pin(async move { client.unban(&community, &handle).await })
        })
        .await
    }

    pub async fn notify_moderators(
        &self,
        community: &str,
        title: &str,
        body: &str,
    ) -> Result<(), PlatformError> {
        let client = Arc::clone(&self.client);
        let community = community.to_string();
        let title = title.to_string();
        let body = body.to_string();
        self.call(move || {
            let client = Arc::clone(&client);
            let community = community.clone();
            let title = title.clone();
            let body = body.clone();
            Box::pin(async move { client.notify_moderators(&community, &title, &body).await })
        })
        .await
    }

    pub async fn notify_user(
        &self,
        handle: &str,
        title: &str,
        body: &str,
    ) -> Result<(), PlatformError> {
        let client = Arc::clone(&self.client);
        let handle = handle.to_string();
        let title = title.to_string();
        let body = body.to_string();
        self.call(move || {
            let client = Arc::clone(&client);
            let handle = handle.clone();
            let title = title.clone();
            let body = body.clone();
            Box::pin(async move { client.notify_user(&handle, &title, &body).await })
        })
        .await
    }

    pub async fn account_exists(&self, handle: &str) -> Result<bool, PlatformError> {
        let client = Arc::clone(&self.client);
        let handle = handle.to_string();
        self.call(move || {
            let client = Arc::clone(&client);
            let handle = handle.clone();
            Box::pin(async move { client.account_exists(&handle).await })
        })
        .await
    }
}
