//! The session machinery shared by both roles: the request/response
//! correlator, the dispatch pipeline with its middleware chains, keepalive,
//! and orderly shutdown.
//!
//! Each live connection is driven by one event-loop task that owns the
//! transport. The loop is the single writer; concurrent callers reach it
//! through [`Peer`] handles over a channel and park on oneshot receivers
//! until their response is matched by id. Incoming requests are dispatched
//! on fresh tasks so handlers can issue reverse-direction calls.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::model::{
    CancelledNotificationParam, ErrorData, GetMethod, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::transport::Transport;

mod client;
mod server;

pub use client::{ClientInitializeError, RoleClient};
pub use server::RoleServer;

/// Marker for data that can cross the wire: serializable, deserializable,
/// and shareable between tasks.
pub trait TransferObject:
    fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> TransferObject for T where
    T: fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A result type that can stand in for "no data" when a notification passes
/// through the dispatch pipeline.
pub trait UnitResponse {
    fn unit() -> Self;
}

/// One side of the conversation. The two roles are mirror images: each
/// role's request set is the other's peer-request set, so a single session
/// implementation serves both.
pub trait ServiceRole:
    fmt::Debug + Send + Sync + Copy + Clone + Default + PartialEq + 'static
{
    type Req: TransferObject + GetMethod;
    type Resp: TransferObject + UnitResponse;
    type Not: TransferObject + GetMethod;
    type PeerReq: TransferObject + GetMethod;
    type PeerResp: TransferObject + UnitResponse;
    type PeerNot: TransferObject + GetMethod;
    type Info: TransferObject;
    type PeerInfo: TransferObject;

    const IS_CLIENT: bool;

    /// The ping request in this role's request vocabulary, used by keepalive.
    fn ping_request() -> Self::Req;

    /// Wrap a cancellation into this role's notification vocabulary.
    fn cancelled_notification(param: CancelledNotificationParam) -> Self::Not;

    /// Recognize an incoming cancellation so the correlator can route it to
    /// the matching in-flight request instead of the dispatch pipeline.
    fn as_cancelled(notification: &Self::PeerNot) -> Option<&CancelledNotificationParam>;
}

/// Message a peer of role `R` writes to the wire.
pub type TxJsonRpcMessage<R> = JsonRpcMessage<
    <R as ServiceRole>::Req,
    <R as ServiceRole>::Resp,
    <R as ServiceRole>::Not,
>;

/// Message a peer of role `R` reads from the wire.
pub type RxJsonRpcMessage<R> = JsonRpcMessage<
    <R as ServiceRole>::PeerReq,
    <R as ServiceRole>::PeerResp,
    <R as ServiceRole>::PeerNot,
>;

/// The method-handler side of a peer: resolves incoming requests and
/// notifications from the remote side.
pub trait Service<R: ServiceRole>: Send + Sync + 'static {
    fn handle_request(
        &self,
        request: R::PeerReq,
        context: RequestContext<R>,
    ) -> impl Future<Output = Result<R::Resp, ErrorData>> + Send + '_;

    fn handle_notification(
        &self,
        notification: R::PeerNot,
        context: NotificationContext<R>,
    ) -> impl Future<Output = Result<(), ErrorData>> + Send + '_;

    fn get_info(&self) -> R::Info;
}

/// Context handed to a request handler. The token is cancelled when the
/// remote peer sends `notifications/cancelled` for this request or the
/// session shuts down.
#[derive(Debug, Clone)]
pub struct RequestContext<R: ServiceRole> {
    pub ct: CancellationToken,
    pub id: RequestId,
    pub peer: Peer<R>,
}

#[derive(Debug, Clone)]
pub struct NotificationContext<R: ServiceRole> {
    pub peer: Peer<R>,
}

// =============================================================================
// Middleware
// =============================================================================

/// An outgoing request or notification traversing the sending chain.
#[derive(Debug, Clone)]
pub enum OutgoingMessage<R: ServiceRole> {
    Request(R::Req),
    Notification(R::Not),
}

/// An incoming request or notification traversing the receiving chain.
#[derive(Debug, Clone)]
pub enum IncomingMessage<R: ServiceRole> {
    Request(R::PeerReq),
    Notification(R::PeerNot),
}

impl<R: ServiceRole> GetMethod for OutgoingMessage<R> {
    fn method(&self) -> &str {
        match self {
            OutgoingMessage::Request(request) => request.method(),
            OutgoingMessage::Notification(notification) => notification.method(),
        }
    }
}

impl<R: ServiceRole> GetMethod for IncomingMessage<R> {
    fn method(&self) -> &str {
        match self {
            IncomingMessage::Request(request) => request.method(),
            IncomingMessage::Notification(notification) => notification.method(),
        }
    }
}

/// A layer wrapped around the dispatch pipeline.
///
/// Middleware runs for requests and notifications alike; for notifications
/// the output value is the unit result and must be ignored. Layers compose
/// in registration order, first-added outermost. Stacks are frozen when a
/// session is connected.
pub trait Middleware<M, O, E>: Send + Sync + 'static
where
    M: GetMethod + Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn call<'a>(&'a self, message: M, next: Next<'a, M, O, E>) -> BoxFuture<'a, Result<O, E>>;
}

/// The remainder of a middleware chain. Call [`Next::run`] to continue.
pub struct Next<'a, M, O, E> {
    chain: &'a [Arc<dyn Middleware<M, O, E>>],
    endpoint: &'a (dyn Endpoint<M, O, E> + 'a),
}

impl<'a, M, O, E> Next<'a, M, O, E>
where
    M: GetMethod + Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware<M, O, E>>],
        endpoint: &'a (dyn Endpoint<M, O, E> + 'a),
    ) -> Self {
        Next { chain, endpoint }
    }

    pub fn run(self, message: M) -> BoxFuture<'a, Result<O, E>> {
        match self.chain.split_first() {
            Some((head, rest)) => head.call(
                message,
                Next {
                    chain: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(message),
        }
    }
}

/// The innermost layer of a dispatch chain.
pub(crate) trait Endpoint<M, O, E>: Send + Sync {
    fn call<'a>(&'a self, message: M) -> BoxFuture<'a, Result<O, E>>;
}

/// Sending-side middleware for role `R`: sees this peer's own requests and
/// notifications on their way to the correlator.
pub type SendingMiddleware<R> = Arc<
    dyn Middleware<
            OutgoingMessage<R>,
            <R as ServiceRole>::PeerResp,
            ServiceError,
        >,
>;

/// Receiving-side middleware for role `R`: sees the remote peer's requests
/// and notifications on their way to the method handlers.
pub type ReceivingMiddleware<R> = Arc<
    dyn Middleware<IncomingMessage<R>, <R as ServiceRole>::Resp, ErrorData>,
>;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced to callers of [`Peer`] methods.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The remote peer answered with a JSON-RPC error object.
    #[error("mcp error: {0}")]
    McpError(ErrorData),
    #[error("transport send error: {0}")]
    TransportSend(Box<dyn std::error::Error + Send + Sync>),
    /// The session is closed; the call was failed locally.
    #[error("connection closed")]
    ConnectionClosed,
    /// The caller cancelled the request before a response arrived.
    #[error("request cancelled")]
    Cancelled { reason: Option<String> },
    /// The peer answered with a result of the wrong type for the method.
    #[error("unexpected response type")]
    UnexpectedResponse,
}

impl ServiceError {
    pub(crate) fn transport_send(
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ServiceError::TransportSend(Box::new(error))
    }
}

/// Error for a request that decoded into the custom tail: either a method
/// outside the catalog, or a known method whose params failed their typed
/// decode.
pub(crate) fn unknown_method_error(method: &str) -> ErrorData {
    if crate::model::KNOWN_METHODS.contains(&method) {
        ErrorData::invalid_params(format!("malformed parameters for method {method}"), None)
    } else {
        ErrorData::method_not_found(format!("method not found: {method}"))
    }
}

/// Why a session's event loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// Local close: `close()` was called or the cancellation token fired.
    Cancelled,
    /// The transport reached end of stream.
    Closed,
}

// =============================================================================
// Peer
// =============================================================================

/// Allocates monotonically increasing integer request ids for one outgoing
/// direction.
#[derive(Debug, Default)]
pub struct AtomicU32RequestIdProvider {
    id: AtomicU32,
}

impl AtomicU32RequestIdProvider {
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.id.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) enum PeerSinkMessage<R: ServiceRole> {
    Request {
        request: R::Req,
        id: RequestId,
        responder: oneshot::Sender<Result<R::PeerResp, ServiceError>>,
    },
    Notification {
        notification: R::Not,
        responder: oneshot::Sender<Result<(), ServiceError>>,
    },
    Cancel {
        id: RequestId,
        reason: Option<String>,
    },
}

/// A cloneable handle to one live session, used to issue requests and
/// notifications toward the remote peer.
pub struct Peer<R: ServiceRole> {
    inner: Arc<PeerInner<R>>,
}

struct PeerInner<R: ServiceRole> {
    tx: mpsc::Sender<PeerSinkMessage<R>>,
    id_provider: AtomicU32RequestIdProvider,
    peer_info: OnceLock<R::PeerInfo>,
    sending: Arc<[SendingMiddleware<R>]>,
}

impl<R: ServiceRole> Clone for Peer<R> {
    fn clone(&self) -> Self {
        Peer {
            inner: self.inner.clone(),
        }
    }
}

impl<R: ServiceRole> fmt::Debug for Peer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("role", &R::default())
            .field("peer_info", &self.inner.peer_info.get())
            .finish()
    }
}

impl<R: ServiceRole> Peer<R> {
    pub(crate) fn new(
        tx: mpsc::Sender<PeerSinkMessage<R>>,
        sending: Arc<[SendingMiddleware<R>]>,
    ) -> Self {
        Peer {
            inner: Arc::new(PeerInner {
                tx,
                id_provider: AtomicU32RequestIdProvider::default(),
                peer_info: OnceLock::new(),
                sending,
            }),
        }
    }

    /// The remote peer's implementation info, known once the initialization
    /// handshake has completed.
    pub fn peer_info(&self) -> Option<&R::PeerInfo> {
        self.inner.peer_info.get()
    }

    pub(crate) fn set_peer_info(&self, info: R::PeerInfo) {
        let _ = self.inner.peer_info.set(info);
    }

    /// Send a request and block the caller until the matching response,
    /// session shutdown, or cancellation.
    pub async fn send_request(&self, request: R::Req) -> Result<R::PeerResp, ServiceError> {
        self.send_request_inner(request, None).await
    }

    /// Like [`Peer::send_request`], but aborts when `ct` fires: the pending
    /// call is failed locally with [`ServiceError::Cancelled`] and
    /// `notifications/cancelled` is sent to the peer. A response that still
    /// arrives afterwards is discarded.
    pub async fn send_request_with_ct(
        &self,
        request: R::Req,
        ct: CancellationToken,
    ) -> Result<R::PeerResp, ServiceError> {
        self.send_request_inner(request, Some(ct)).await
    }

    pub async fn send_notification(&self, notification: R::Not) -> Result<(), ServiceError> {
        let endpoint = PeerEndpoint {
            peer: self,
            ct: None,
        };
        let sending = self.inner.sending.clone();
        Next::new(&sending, &endpoint)
            .run(OutgoingMessage::Notification(notification))
            .await
            .map(drop)
    }

    async fn send_request_inner(
        &self,
        request: R::Req,
        ct: Option<CancellationToken>,
    ) -> Result<R::PeerResp, ServiceError> {
        let endpoint = PeerEndpoint { peer: self, ct };
        let sending = self.inner.sending.clone();
        Next::new(&sending, &endpoint)
            .run(OutgoingMessage::Request(request))
            .await
    }

    async fn correlate_request(
        &self,
        request: R::Req,
        ct: Option<CancellationToken>,
    ) -> Result<R::PeerResp, ServiceError> {
        let id = self.inner.id_provider.next_request_id();
        let (responder, receiver) = oneshot::channel();
        self.inner
            .tx
            .send(PeerSinkMessage::Request {
                request,
                id: id.clone(),
                responder,
            })
            .await
            .map_err(|_| ServiceError::ConnectionClosed)?;

        match ct {
            Some(ct) => {
                tokio::select! {
                    received = receiver => match received {
                        Ok(result) => result,
                        Err(_) => Err(ServiceError::ConnectionClosed),
                    },
                    _ = ct.cancelled() => {
                        let _ = self
                            .inner
                            .tx
                            .send(PeerSinkMessage::Cancel { id, reason: None })
                            .await;
                        Err(ServiceError::Cancelled { reason: None })
                    }
                }
            }
            None => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::ConnectionClosed),
            },
        }
    }

    async fn write_notification(&self, notification: R::Not) -> Result<(), ServiceError> {
        let (responder, receiver) = oneshot::channel();
        self.inner
            .tx
            .send(PeerSinkMessage::Notification {
                notification,
                responder,
            })
            .await
            .map_err(|_| ServiceError::ConnectionClosed)?;
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::ConnectionClosed),
        }
    }
}

struct PeerEndpoint<'p, R: ServiceRole> {
    peer: &'p Peer<R>,
    ct: Option<CancellationToken>,
}

impl<R: ServiceRole> Endpoint<OutgoingMessage<R>, R::PeerResp, ServiceError>
    for PeerEndpoint<'_, R>
{
    fn call<'a>(
        &'a self,
        message: OutgoingMessage<R>,
    ) -> BoxFuture<'a, Result<R::PeerResp, ServiceError>> {
        Box::pin(async move {
            match message {
                OutgoingMessage::Request(request) => {
                    self.peer.correlate_request(request, self.ct.clone()).await
                }
                OutgoingMessage::Notification(notification) => {
                    self.peer.write_notification(notification).await?;
                    Ok(R::PeerResp::unit())
                }
            }
        })
    }
}

// =============================================================================
// Running session
// =============================================================================

/// The live half of a connected session: a [`Peer`] handle plus control over
/// the background event loop.
pub struct RunningSession<R: ServiceRole> {
    peer: Peer<R>,
    ct: CancellationToken,
    handle: Mutex<Option<JoinHandle<QuitReason>>>,
}

impl<R: ServiceRole> fmt::Debug for RunningSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningSession")
            .field("peer", &self.peer)
            .field("closed", &self.ct.is_cancelled())
            .finish()
    }
}

impl<R: ServiceRole> RunningSession<R> {
    pub fn peer(&self) -> &Peer<R> {
        &self.peer
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ct.clone()
    }

    /// Begin an orderly shutdown. Idempotent: closing an already-closed
    /// session is a no-op. After the first close, every subsequent call on
    /// the peer fails with [`ServiceError::ConnectionClosed`].
    pub fn close(&self) {
        self.ct.cancel();
    }

    /// Wait for the event loop to exit. The first waiter observes the real
    /// quit reason; later waiters resolve after shutdown with
    /// [`QuitReason::Cancelled`].
    pub async fn waiting(&self) -> QuitReason {
        let handle = self.handle.lock().expect("session handle lock").take();
        match handle {
            Some(handle) => match handle.await {
                Ok(reason) => reason,
                Err(_) => QuitReason::Cancelled,
            },
            None => {
                self.ct.cancelled().await;
                QuitReason::Cancelled
            }
        }
    }
}

pub(crate) struct ServeOptions<R: ServiceRole> {
    pub sending: Arc<[SendingMiddleware<R>]>,
    pub receiving: Arc<[ReceivingMiddleware<R>]>,
    pub keep_alive: Option<Duration>,
    pub on_close: Option<Box<dyn FnOnce() + Send>>,
    pub ct: CancellationToken,
}

/// Spawn the event loop for one connection and hand back the session.
pub(crate) fn serve_directly<R, S, T>(
    service: S,
    transport: T,
    options: ServeOptions<R>,
) -> RunningSession<R>
where
    R: ServiceRole,
    S: Service<R>,
    T: Transport<R> + 'static,
{
    let ServeOptions {
        sending,
        receiving,
        keep_alive,
        on_close,
        ct,
    } = options;
    let (tx, rx) = mpsc::channel(64);
    let peer = Peer::new(tx, sending);
    let service = Arc::new(service);
    if let Some(interval) = keep_alive {
        spawn_keepalive(peer.clone(), interval, ct.clone());
    }
    let handle = tokio::spawn(serve_loop(
        service,
        transport,
        peer.clone(),
        rx,
        receiving,
        ct.clone(),
        on_close,
    ));
    RunningSession {
        peer,
        ct,
        handle: Mutex::new(Some(handle)),
    }
}

fn spawn_keepalive<R: ServiceRole>(peer: Peer<R>, interval: Duration, ct: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval resolves immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {
                    let ping = peer.send_request(R::ping_request());
                    match tokio::time::timeout(interval, ping).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(error)) => {
                            tracing::warn!(error = %error, "keepalive ping failed, closing session");
                            ct.cancel();
                            break;
                        }
                        Err(_) => {
                            tracing::warn!("keepalive ping timed out, closing session");
                            ct.cancel();
                            break;
                        }
                    }
                }
            }
        }
    });
}

struct HandlerOutcome<R: ServiceRole> {
    id: RequestId,
    result: Result<R::Resp, ErrorData>,
}

enum LoopEvent<R: ServiceRole> {
    Outbound(PeerSinkMessage<R>),
    Inbound(RxJsonRpcMessage<R>),
    Outcome(HandlerOutcome<R>),
    PeerClosed,
    Cancelled,
    Idle,
}

enum DispatchContext<R: ServiceRole> {
    Request(RequestContext<R>),
    Notification(NotificationContext<R>),
}

struct ServiceEndpoint<R: ServiceRole, S> {
    service: Arc<S>,
    context: DispatchContext<R>,
}

impl<R, S> Endpoint<IncomingMessage<R>, R::Resp, ErrorData> for ServiceEndpoint<R, S>
where
    R: ServiceRole,
    S: Service<R>,
{
    fn call<'a>(
        &'a self,
        message: IncomingMessage<R>,
    ) -> BoxFuture<'a, Result<R::Resp, ErrorData>> {
        Box::pin(async move {
            match (message, &self.context) {
                (IncomingMessage::Request(request), DispatchContext::Request(context)) => {
                    self.service.handle_request(request, context.clone()).await
                }
                (
                    IncomingMessage::Notification(notification),
                    DispatchContext::Notification(context),
                ) => {
                    self.service
                        .handle_notification(notification, context.clone())
                        .await?;
                    Ok(R::Resp::unit())
                }
                _ => Err(ErrorData::internal_error("dispatch context mismatch", None)),
            }
        })
    }
}

async fn serve_loop<R, S, T>(
    service: Arc<S>,
    mut transport: T,
    peer: Peer<R>,
    mut peer_rx: mpsc::Receiver<PeerSinkMessage<R>>,
    receiving: Arc<[ReceivingMiddleware<R>]>,
    ct: CancellationToken,
    on_close: Option<Box<dyn FnOnce() + Send>>,
) -> QuitReason
where
    R: ServiceRole,
    S: Service<R>,
    T: Transport<R> + 'static,
{
    let mut pending: HashMap<RequestId, oneshot::Sender<Result<R::PeerResp, ServiceError>>> =
        HashMap::new();
    let mut incoming: HashMap<RequestId, CancellationToken> = HashMap::new();
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<HandlerOutcome<R>>(16);

    let reason = loop {
        let event: LoopEvent<R> = tokio::select! {
            _ = ct.cancelled() => LoopEvent::Cancelled,
            outbound = peer_rx.recv() => match outbound {
                Some(message) => LoopEvent::Outbound(message),
                None => LoopEvent::Cancelled,
            },
            inbound = transport.receive() => match inbound {
                Some(message) => LoopEvent::Inbound(message),
                None => LoopEvent::PeerClosed,
            },
            outcome = outcome_rx.recv() => match outcome {
                Some(outcome) => LoopEvent::Outcome(outcome),
                None => LoopEvent::Idle,
            },
        };

        match event {
            LoopEvent::Cancelled => break QuitReason::Cancelled,
            LoopEvent::PeerClosed => break QuitReason::Closed,
            LoopEvent::Idle => {}
            LoopEvent::Outbound(PeerSinkMessage::Request {
                request,
                id,
                responder,
            }) => {
                pending.insert(id.clone(), responder);
                let message = TxJsonRpcMessage::<R>::request(request, id.clone());
                if let Err(error) = transport.send(message).await {
                    if let Some(responder) = pending.remove(&id) {
                        let _ = responder.send(Err(ServiceError::transport_send(error)));
                    }
                }
            }
            LoopEvent::Outbound(PeerSinkMessage::Notification {
                notification,
                responder,
            }) => {
                let message = TxJsonRpcMessage::<R>::notification(notification);
                let result = transport
                    .send(message)
                    .await
                    .map_err(ServiceError::transport_send);
                let _ = responder.send(result);
            }
            LoopEvent::Outbound(PeerSinkMessage::Cancel { id, reason }) => {
                // Dropping the pending entry makes a late response a no-op.
                if pending.remove(&id).is_some() {
                    let notification = R::cancelled_notification(CancelledNotificationParam {
                        request_id: id,
                        reason,
                    });
                    let message = TxJsonRpcMessage::<R>::notification(notification);
                    if let Err(error) = transport.send(message).await {
                        tracing::debug!(error = %error, "failed to send cancellation");
                    }
                }
            }
            LoopEvent::Inbound(JsonRpcMessage::Request(JsonRpcRequest { id, request, .. })) => {
                let request_ct = ct.child_token();
                incoming.insert(id.clone(), request_ct.clone());
                let context = RequestContext {
                    ct: request_ct,
                    id: id.clone(),
                    peer: peer.clone(),
                };
                let endpoint = ServiceEndpoint {
                    service: service.clone(),
                    context: DispatchContext::Request(context),
                };
                let receiving = receiving.clone();
                let outcome_tx = outcome_tx.clone();
                tokio::spawn(async move {
                    let result = Next::new(&receiving, &endpoint)
                        .run(IncomingMessage::Request(request))
                        .await;
                    let _ = outcome_tx.send(HandlerOutcome { id, result }).await;
                });
            }
            LoopEvent::Inbound(JsonRpcMessage::Response(JsonRpcResponse {
                id, result, ..
            })) => match pending.remove(&id) {
                Some(responder) => {
                    let _ = responder.send(Ok(result));
                }
                None => tracing::trace!(%id, "discarding response with no pending request"),
            },
            LoopEvent::Inbound(JsonRpcMessage::Error(JsonRpcError { id, error, .. })) => {
                match pending.remove(&id) {
                    Some(responder) => {
                        let _ = responder.send(Err(ServiceError::McpError(error)));
                    }
                    None => tracing::trace!(%id, "discarding error with no pending request"),
                }
            }
            LoopEvent::Inbound(JsonRpcMessage::Notification(JsonRpcNotification {
                notification,
                ..
            })) => {
                if let Some(param) = R::as_cancelled(&notification) {
                    if let Some(request_ct) = incoming.remove(&param.request_id) {
                        request_ct.cancel();
                    }
                    continue;
                }
                // Notifications are dispatched inline so they are observed
                // in arrival order; in particular `notifications/initialized`
                // must take effect before any request that follows it.
                // Handlers must not park on responses from this session.
                let endpoint = ServiceEndpoint {
                    service: service.clone(),
                    context: DispatchContext::Notification(NotificationContext {
                        peer: peer.clone(),
                    }),
                };
                if let Err(error) = Next::new(&receiving, &endpoint)
                    .run(IncomingMessage::Notification(notification))
                    .await
                {
                    tracing::warn!(error = %error, "notification handler failed");
                }
            }
            LoopEvent::Outcome(HandlerOutcome { id, result }) => {
                incoming.remove(&id);
                let message = match result {
                    Ok(result) => TxJsonRpcMessage::<R>::response(result, id),
                    Err(error) => TxJsonRpcMessage::<R>::error(error, id),
                };
                if let Err(error) = transport.send(message).await {
                    tracing::error!(error = %error, "failed to send response");
                    break QuitReason::Closed;
                }
            }
        }
    };

    // Shutdown: mark closing so keepalive and owners observe it, fail every
    // parked caller, cancel every in-flight incoming handler, then release
    // the transport.
    ct.cancel();
    for (_, responder) in pending.drain() {
        let _ = responder.send(Err(ServiceError::ConnectionClosed));
    }
    for (_, request_ct) in incoming.drain() {
        request_ct.cancel();
    }
    peer_rx.close();
    while let Some(queued) = peer_rx.recv().await {
        match queued {
            PeerSinkMessage::Request { responder, .. } => {
                let _ = responder.send(Err(ServiceError::ConnectionClosed));
            }
            PeerSinkMessage::Notification { responder, .. } => {
                let _ = responder.send(Err(ServiceError::ConnectionClosed));
            }
            PeerSinkMessage::Cancel { .. } => {}
        }
    }
    if let Err(error) = transport.close().await {
        tracing::debug!(error = %error, "transport close failed");
    }
    if let Some(on_close) = on_close {
        on_close();
    }
    reason
}
