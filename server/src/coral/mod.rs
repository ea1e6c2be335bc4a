//! Nintendo Switch Online app API ("Coral")

use async_trait::async_trait;

use crate::errors::NxapiResult;

pub mod client;
pub mod proxy;
pub mod types;

pub use client::CoralClient;
pub use proxy::ZncProxyClient;

use types::{ActiveEvent, Announcement, CurrentUser, Friend, WebService, WebServiceToken};

/// Typed Coral calls, either direct or through a znc proxy
#[async_trait]
pub trait CoralApi: Send + Sync {
    /// Friends in the order Coral lists them
    async fn friends(&self) -> NxapiResult<Vec<Friend>>;

    async fn current_user(&self) -> NxapiResult<CurrentUser>;

    async fn web_services(&self) -> NxapiResult<Vec<WebService>>;

    /// `None` when the user isn't in a voice chat event
    async fn active_event(&self) -> NxapiResult<Option<ActiveEvent>>;

    async fn announcements(&self) -> NxapiResult<Vec<Announcement>>;

    async fn web_service_token(&self, id: u64) -> NxapiResult<WebServiceToken>;
}
