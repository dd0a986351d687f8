//! A transport wrapper that echoes every frame to a byte sink, useful for
//! conformance checks over a whole conversation.

use std::io::Write;

use super::Transport;
use crate::service::{RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage};

pub struct LoggingTransport<T, W> {
    inner: T,
    sink: W,
}

impl<T, W> LoggingTransport<T, W> {
    pub fn new(inner: T, sink: W) -> Self {
        LoggingTransport { inner, sink }
    }
}

impl<R, T, W> Transport<R> for LoggingTransport<T, W>
where
    R: ServiceRole,
    T: Transport<R>,
    W: Write + Send,
{
    type Error = T::Error;

    async fn send(&mut self, item: TxJsonRpcMessage<R>) -> Result<(), Self::Error> {
        if let Ok(encoded) = serde_json::to_string(&item) {
            let _ = writeln!(self.sink, "send: {encoded}");
        }
        self.inner.send(item).await
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<R>> {
        let received = self.inner.receive().await;
        if let Some(message) = &received {
            if let Ok(encoded) = serde_json::to_string(message) {
                let _ = writeln!(self.sink, "recv: {encoded}");
            }
        }
        received
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.inner.close().await
    }
}
