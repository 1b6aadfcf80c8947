// src/core/service.rs

//! The request/response protocol seam served on each connection.

use crate::connection::RequestContext;
use crate::core::KeepDrainError;
use async_trait::async_trait;
use tokio_util::codec::{Decoder, Encoder};

/// A request/response protocol layered on a keep-alive connection.
///
/// The connection handler decodes one request at a time with `Codec`, wraps
/// the call in request accounting, and flushes the response before reading
/// the next request.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;
    type Codec: Decoder<Item = Self::Request, Error = KeepDrainError>
        + Encoder<Self::Response, Error = KeepDrainError>
        + Default
        + Send
        + Unpin
        + 'static;

    async fn call(&self, request: Self::Request, ctx: &RequestContext) -> Self::Response;

    /// Turns a decode failure into a reply, or `None` to drop the connection.
    fn reject(&self, _error: &KeepDrainError) -> Option<Self::Response> {
        None
    }
}
