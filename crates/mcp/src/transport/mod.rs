//! Message transports: newline-framed STDIO and SSE + HTTP POST.

pub mod sse;
pub mod stdio;

use {
    async_trait::async_trait,
    futures::{StreamExt, stream::BoxStream},
    serde_json::Value,
};

use crate::error::{ConnectionError, Result};

pub use {
    sse::{SseTransport, SseTransportConfig},
    stdio::StdioTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
        }
    }
}

/// Send/receive contract shared by both transports.
///
/// `send`, `receive` and `messages` fail with a not-connected error before
/// `connect` and after `disconnect`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, message: &Value) -> Result<()>;

    /// Wait for the next inbound message.
    async fn receive(&self) -> Result<Value>;

    fn is_connected(&self) -> bool;

    /// Inbound messages as a stream that ends when the transport disconnects.
    fn messages(&self) -> Result<BoxStream<'_, Value>> {
        if !self.is_connected() {
            return Err(self.not_connected().into());
        }
        let stream = futures::stream::unfold(self, |transport| async move {
            let message = transport.receive().await.ok()?;
            Some((message, transport))
        });
        Ok(stream.boxed())
    }

    fn not_connected(&self) -> ConnectionError {
        ConnectionError::NotConnected {
            transport: self.name().to_string(),
        }
    }
}
