use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives every notification fragment, possibly from another task.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The link to one device: a write characteristic for requests and a
/// notify characteristic for responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn is_connected(&self) -> bool;
    async fn subscribe_notifications(&mut self, handler: NotificationHandler) -> Result<()>;
    async fn unsubscribe_notifications(&mut self) -> Result<()>;
    /// Write without response.
    async fn write_characteristic(&mut self, data: &[u8]) -> Result<()>;
}
