use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::FallbackReply;

use crate::error::TransportError;

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// One chat backend reachable over two endpoints: an incremental one and a
/// single blocking one.
///
/// Implementations never touch conversation state; they only hand back data.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Feature probe, evaluated on every turn.
    fn supports_streaming(&self) -> bool;

    /// Open the streaming endpoint. A non-success status is an error.
    async fn open_stream(&self, message: &str) -> Result<ByteStream, TransportError>;

    /// Single request/response exchange.
    async fn send_simple(&self, message: &str) -> Result<FallbackReply, TransportError>;
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<T> {
    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }

    async fn open_stream(&self, message: &str) -> Result<ByteStream, TransportError> {
        (**self).open_stream(message).await
    }

    async fn send_simple(&self, message: &str) -> Result<FallbackReply, TransportError> {
        (**self).send_simple(message).await
    }
}
