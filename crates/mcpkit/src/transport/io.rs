//! Line-delimited JSON over any `AsyncRead`/`AsyncWrite` pair, which also
//! covers stdio pipes.

use std::marker::PhantomData;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use super::{IntoTransport, Transport, adapters};
use crate::service::{RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage};

pub struct AsyncRwTransport<R, Rd, Wr>
where
    R: ServiceRole,
    Rd: AsyncRead + Send + Unpin,
    Wr: AsyncWrite + Send + Unpin,
{
    reader: FramedRead<Rd, LinesCodec>,
    writer: Wr,
    _marker: PhantomData<R>,
}

impl<R, Rd, Wr> AsyncRwTransport<R, Rd, Wr>
where
    R: ServiceRole,
    Rd: AsyncRead + Send + Unpin,
    Wr: AsyncWrite + Send + Unpin,
{
    pub fn new(reader: Rd, writer: Wr) -> Self {
        AsyncRwTransport {
            reader: FramedRead::new(reader, LinesCodec::new()),
            writer,
            _marker: PhantomData,
        }
    }
}

impl<R, Rd, Wr> Transport<R> for AsyncRwTransport<R, Rd, Wr>
where
    R: ServiceRole,
    Rd: AsyncRead + Send + Unpin,
    Wr: AsyncWrite + Send + Unpin,
{
    type Error = std::io::Error;

    async fn send(&mut self, item: TxJsonRpcMessage<R>) -> Result<(), Self::Error> {
        let mut data = serde_json::to_vec(&item).map_err(std::io::Error::from)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<R>> {
        loop {
            let line = self.reader.next().await?;
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(message) => return Some(message),
                        Err(error) => {
                            // A single malformed frame fails only itself.
                            tracing::error!(error = %error, "skipping undecodable frame");
                            continue;
                        }
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::error!("skipping oversized frame");
                    continue;
                }
                Err(LinesCodecError::Io(error)) => {
                    tracing::error!(error = %error, "transport read failed");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.writer.shutdown().await
    }
}

/// The stdin/stdout pair for a process speaking the protocol over its
/// standard streams.
pub fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}

impl<R, Rd, Wr> IntoTransport<R, std::io::Error, adapters::TransportAdapterAsyncRW> for (Rd, Wr)
where
    R: ServiceRole,
    Rd: AsyncRead + Send + Unpin + 'static,
    Wr: AsyncWrite + Send + Unpin + 'static,
{
    fn into_transport(self) -> impl Transport<R, Error = std::io::Error> + 'static {
        AsyncRwTransport::new(self.0, self.1)
    }
}

impl<R, S> IntoTransport<R, std::io::Error, adapters::TransportAdapterCombinedRW> for S
where
    R: ServiceRole,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn into_transport(self) -> impl Transport<R, Error = std::io::Error> + 'static {
        let (reader, writer) = tokio::io::split(self);
        AsyncRwTransport::new(reader, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientJsonRpcMessage, ClientRequest, PingRequest, RequestId};
    use crate::service::RoleClient;

    #[tokio::test]
    async fn test_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let mut client: AsyncRwTransport<RoleClient, _, _> =
            AsyncRwTransport::new(left_read, left_write);
        let mut server: AsyncRwTransport<crate::service::RoleServer, _, _> =
            AsyncRwTransport::new(right_read, right_write);

        let message = ClientJsonRpcMessage::request(
            ClientRequest::PingRequest(PingRequest {
                method: Default::default(),
            }),
            RequestId::Number(1),
        );
        client.send(message.clone()).await.unwrap();
        let received = server.receive().await.unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (mut left, right) = tokio::io::duplex(1024);
        let (right_read, right_write) = tokio::io::split(right);
        let mut server: AsyncRwTransport<crate::service::RoleServer, _, _> =
            AsyncRwTransport::new(right_read, right_write);

        left.write_all(b"{this is not json}\n").await.unwrap();
        left.write_all(
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        )
        .await
        .unwrap();

        let received = server.receive().await.unwrap();
        assert!(matches!(
            received,
            crate::model::JsonRpcMessage::Request(_)
        ));
    }

    #[tokio::test]
    async fn test_batch_frame_is_refused() {
        let (mut left, right) = tokio::io::duplex(1024);
        let (right_read, right_write) = tokio::io::split(right);
        let mut server: AsyncRwTransport<crate::service::RoleServer, _, _> =
            AsyncRwTransport::new(right_read, right_write);

        left.write_all(b"[{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}]\n")
            .await
            .unwrap();
        drop(left);

        // The batch line is skipped, then the stream ends.
        assert!(server.receive().await.is_none());
    }
}
