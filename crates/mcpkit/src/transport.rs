//! Pluggable duplex message transports.
//!
//! A [`Transport`] carries already-framed protocol messages; framing is the
//! transport's concern (line-delimited JSON for byte streams). Sessions
//! accept anything implementing [`IntoTransport`], which covers a ready
//! transport, an `(AsyncRead, AsyncWrite)` pair such as stdio, or a single
//! duplex stream.

use std::future::Future;

use crate::service::{RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage};

pub mod in_memory;
pub mod io;
pub mod logging;

pub use in_memory::{InMemoryTransport, in_memory};
pub use io::{AsyncRwTransport, stdio};
pub use logging::LoggingTransport;

pub trait Transport<R: ServiceRole>: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write one message. Writes are atomic at message granularity.
    fn send(
        &mut self,
        item: TxJsonRpcMessage<R>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Read the next message; `None` means end of stream.
    ///
    /// Cancellation safety: dropping the returned future before completion
    /// must not lose a decoded message.
    fn receive(&mut self) -> impl Future<Output = Option<RxJsonRpcMessage<R>>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Conversion into a [`Transport`]. The `A` parameter is an adapter marker
/// that keeps the blanket impls coherent; callers never name it.
pub trait IntoTransport<R, E, A>: Send + 'static
where
    R: ServiceRole,
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_transport(self) -> impl Transport<R, Error = E> + 'static;
}

pub mod adapters {
    pub enum TransportAdapterIdentity {}
    pub enum TransportAdapterAsyncRW {}
    pub enum TransportAdapterCombinedRW {}
}

impl<R, T> IntoTransport<R, T::Error, adapters::TransportAdapterIdentity> for T
where
    R: ServiceRole,
    T: Transport<R> + Send + 'static,
{
    fn into_transport(self) -> impl Transport<R, Error = T::Error> + 'static {
        self
    }
}
