//! A typed in-process transport pair, mainly for tests.

use tokio::sync::mpsc;

use super::Transport;
use crate::service::{
    RoleClient, RoleServer, RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage,
};

const CHANNEL_CAPACITY: usize = 64;

pub struct InMemoryTransport<R: ServiceRole> {
    tx: Option<mpsc::Sender<TxJsonRpcMessage<R>>>,
    rx: mpsc::Receiver<RxJsonRpcMessage<R>>,
}

/// Create a connected pair of in-memory transports, one per role.
pub fn in_memory() -> (InMemoryTransport<RoleClient>, InMemoryTransport<RoleServer>) {
    let (client_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (server_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        InMemoryTransport {
            tx: Some(client_tx),
            rx: client_rx,
        },
        InMemoryTransport {
            tx: Some(server_tx),
            rx: server_rx,
        },
    )
}

impl<R: ServiceRole> Transport<R> for InMemoryTransport<R> {
    type Error = std::io::Error;

    async fn send(&mut self, item: TxJsonRpcMessage<R>) -> Result<(), Self::Error> {
        match &self.tx {
            Some(tx) => tx.send(item).await.map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer transport closed")
            }),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport closed",
            )),
        }
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<R>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        // Dropping the sender lets the peer's receive side drain and end.
        self.tx.take();
        Ok(())
    }
}
