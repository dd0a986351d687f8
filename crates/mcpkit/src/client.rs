//! The client facade: the roots registry, server-initiated method handling,
//! and the connect flow that performs the initialization handshake.

use std::{
    collections::BTreeMap,
    future::Future,
    ops::Deref,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::model::{
    ClientCapabilities, ClientInfo, ClientResult, CreateMessageRequestParam, CreateMessageResult,
    ErrorData, Implementation, ListRootsResult, LoggingMessageNotificationParam,
    ProgressNotificationParam, ProtocolVersion, ResourceUpdatedNotificationParam, Root,
    ServerNotification, ServerRequest,
};
use crate::service::{
    ClientInitializeError, IncomingMessage, Middleware, NotificationContext, OutgoingMessage,
    Peer, QuitReason, ReceivingMiddleware, RequestContext, RoleClient, RunningSession,
    SendingMiddleware, ServeOptions, Service, ServiceError, serve_directly, unknown_method_error,
};
use crate::transport::IntoTransport;

type CreateMessageHandler = Box<
    dyn Fn(
            Peer<RoleClient>,
            CreateMessageRequestParam,
        ) -> BoxFuture<'static, Result<CreateMessageResult, ErrorData>>
        + Send
        + Sync,
>;
type SessionHook = Box<dyn Fn(Peer<RoleClient>) -> BoxFuture<'static, ()> + Send + Sync>;
type SessionParamHook<P> =
    Box<dyn Fn(Peer<RoleClient>, P) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional per-client configuration, set through the builder methods.
#[derive(Default)]
pub struct ClientOptions {
    create_message_handler: Option<CreateMessageHandler>,
    tool_list_changed_handler: Option<SessionHook>,
    prompt_list_changed_handler: Option<SessionHook>,
    resource_list_changed_handler: Option<SessionHook>,
    resource_updated_handler: Option<SessionParamHook<ResourceUpdatedNotificationParam>>,
    logging_message_handler: Option<SessionParamHook<LoggingMessageNotificationParam>>,
    progress_handler: Option<SessionParamHook<ProgressNotificationParam>>,
    keep_alive: Option<Duration>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodically ping the server; a failed ping closes the session.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// Serve `sampling/createMessage`. Setting a handler also declares the
    /// sampling capability during initialization.
    pub fn on_create_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>, CreateMessageRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CreateMessageResult, ErrorData>> + Send + 'static,
    {
        self.create_message_handler = Some(Box::new(move |peer, params| {
            Box::pin(handler(peer, params))
        }));
        self
    }

    pub fn on_tool_list_changed<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tool_list_changed_handler = Some(Box::new(move |peer| Box::pin(handler(peer))));
        self
    }

    pub fn on_prompt_list_changed<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.prompt_list_changed_handler = Some(Box::new(move |peer| Box::pin(handler(peer))));
        self
    }

    pub fn on_resource_list_changed<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.resource_list_changed_handler =
            Some(Box::new(move |peer| Box::pin(handler(peer))));
        self
    }

    pub fn on_resource_updated<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>, ResourceUpdatedNotificationParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.resource_updated_handler = Some(Box::new(move |peer, params| {
            Box::pin(handler(peer, params))
        }));
        self
    }

    pub fn on_logging_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>, LoggingMessageNotificationParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.logging_message_handler = Some(Box::new(move |peer, params| {
            Box::pin(handler(peer, params))
        }));
        self
    }

    pub fn on_progress<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleClient>, ProgressNotificationParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.progress_handler = Some(Box::new(move |peer, params| {
            Box::pin(handler(peer, params))
        }));
        self
    }
}

struct ClientInner {
    info: Implementation,
    options: ClientOptions,
    roots: Mutex<BTreeMap<String, Root>>,
    sessions: Mutex<Vec<(u64, Peer<RoleClient>)>>,
    sending: Mutex<Vec<SendingMiddleware<RoleClient>>>,
    receiving: Mutex<Vec<ReceivingMiddleware<RoleClient>>>,
    next_session_id: AtomicU64,
}

/// An application-embedding peer. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(info: Implementation, options: ClientOptions) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                info,
                options,
                roots: Mutex::new(BTreeMap::new()),
                sessions: Mutex::new(Vec::new()),
                sending: Mutex::new(Vec::new()),
                receiving: Mutex::new(Vec::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Add roots; one call is one logical mutation and emits a single
    /// `notifications/roots/list_changed` per session.
    pub fn add_roots(&self, roots: impl IntoIterator<Item = Root>) {
        {
            let mut registry = self.inner.roots.lock().expect("roots lock");
            for root in roots {
                registry.insert(root.uri.clone(), root);
            }
        }
        self.notify_roots_changed();
    }

    pub fn remove_root(&self, uri: &str) -> bool {
        let removed = self
            .inner
            .roots
            .lock()
            .expect("roots lock")
            .remove(uri)
            .is_some();
        if removed {
            self.notify_roots_changed();
        }
        removed
    }

    pub fn roots(&self) -> Vec<Root> {
        self.inner
            .roots
            .lock()
            .expect("roots lock")
            .values()
            .cloned()
            .collect()
    }

    /// Push a sending middleware layer. Layers added first run outermost.
    /// Stacks are frozen per session at connect time.
    pub fn add_sending_middleware<M>(&self, middleware: M)
    where
        M: Middleware<OutgoingMessage<RoleClient>, crate::model::ServerResult, ServiceError>,
    {
        self.inner
            .sending
            .lock()
            .expect("sending middleware lock")
            .push(Arc::new(middleware));
    }

    pub fn add_receiving_middleware<M>(&self, middleware: M)
    where
        M: Middleware<IncomingMessage<RoleClient>, ClientResult, ErrorData>,
    {
        self.inner
            .receiving
            .lock()
            .expect("receiving middleware lock")
            .push(Arc::new(middleware));
    }

    /// Connect a transport and run the initialization handshake: send
    /// `initialize`, verify the negotiated protocol version, then send
    /// `notifications/initialized`. The handshake traverses the normal
    /// dispatch pipeline, so middleware observes it like any other traffic.
    pub async fn connect<T, E, A>(
        &self,
        transport: T,
    ) -> Result<ClientSession, ClientInitializeError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let sending: Arc<[SendingMiddleware<RoleClient>]> = self
            .inner
            .sending
            .lock()
            .expect("sending middleware lock")
            .clone()
            .into();
        let receiving: Arc<[ReceivingMiddleware<RoleClient>]> = self
            .inner
            .receiving
            .lock()
            .expect("receiving middleware lock")
            .clone()
            .into();
        let client = self.clone();
        let on_close = Box::new(move || client.remove_session(id));
        let service = ClientService {
            client: self.clone(),
        };
        let running = serve_directly(
            service,
            transport.into_transport(),
            ServeOptions {
                sending,
                receiving,
                keep_alive: self.inner.options.keep_alive,
                on_close: Some(on_close),
                ct: CancellationToken::new(),
            },
        );

        let handshake = async {
            let server_info = running.peer().initialize(self.client_info()).await?;
            running.peer().set_peer_info(server_info);
            running.peer().notify_initialized().await?;
            Ok(())
        };
        if let Err(error) = handshake.await {
            running.close();
            running.waiting().await;
            return Err(error);
        }

        self.inner
            .sessions
            .lock()
            .expect("sessions lock")
            .push((id, running.peer().clone()));
        Ok(ClientSession { running })
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.capabilities(),
            client_info: self.inner.info.clone(),
        }
    }

    fn capabilities(&self) -> ClientCapabilities {
        let mut builder = ClientCapabilities::builder().enable_roots();
        if self.inner.options.create_message_handler.is_some() {
            builder = builder.enable_sampling();
        }
        builder.build()
    }

    fn remove_session(&self, id: u64) {
        self.inner
            .sessions
            .lock()
            .expect("sessions lock")
            .retain(|(session_id, _)| *session_id != id);
    }

    fn notify_roots_changed(&self) {
        let peers: Vec<Peer<RoleClient>> = self
            .inner
            .sessions
            .lock()
            .expect("sessions lock")
            .iter()
            .map(|(_, peer)| peer.clone())
            .collect();
        for peer in peers {
            tokio::spawn(async move {
                if let Err(error) = peer.notify_roots_list_changed().await {
                    tracing::debug!(error = %error, "roots list-changed notification failed");
                }
            });
        }
    }

    async fn dispatch_request(
        &self,
        request: ServerRequest,
        context: RequestContext<RoleClient>,
    ) -> Result<ClientResult, ErrorData> {
        match request {
            ServerRequest::PingRequest(_) => Ok(ClientResult::empty()),
            ServerRequest::ListRootsRequest(_) => Ok(ClientResult::ListRootsResult(
                ListRootsResult {
                    roots: self.roots(),
                },
            )),
            ServerRequest::CreateMessageRequest(request) => {
                match &self.inner.options.create_message_handler {
                    Some(handler) => handler(context.peer.clone(), request.params)
                        .await
                        .map(ClientResult::CreateMessageResult),
                    None => Err(ErrorData::method_not_found(
                        "sampling/createMessage is not supported by this client",
                    )),
                }
            }
            ServerRequest::CustomRequest(request) => Err(unknown_method_error(&request.method)),
        }
    }

    async fn dispatch_notification(
        &self,
        notification: ServerNotification,
        context: NotificationContext<RoleClient>,
    ) -> Result<(), ErrorData> {
        match notification {
            // Cancellations are routed to in-flight requests by the
            // correlator before dispatch.
            ServerNotification::CancelledNotification(_) => Ok(()),
            ServerNotification::ProgressNotification(notification) => {
                if let Some(handler) = &self.inner.options.progress_handler {
                    handler(context.peer.clone(), notification.params).await;
                }
                Ok(())
            }
            ServerNotification::LoggingMessageNotification(notification) => {
                if let Some(handler) = &self.inner.options.logging_message_handler {
                    handler(context.peer.clone(), notification.params).await;
                }
                Ok(())
            }
            ServerNotification::ResourceUpdatedNotification(notification) => {
                if let Some(handler) = &self.inner.options.resource_updated_handler {
                    handler(context.peer.clone(), notification.params).await;
                }
                Ok(())
            }
            ServerNotification::ResourceListChangedNotification(_) => {
                if let Some(handler) = &self.inner.options.resource_list_changed_handler {
                    handler(context.peer.clone()).await;
                }
                Ok(())
            }
            ServerNotification::ToolListChangedNotification(_) => {
                if let Some(handler) = &self.inner.options.tool_list_changed_handler {
                    handler(context.peer.clone()).await;
                }
                Ok(())
            }
            ServerNotification::PromptListChangedNotification(_) => {
                if let Some(handler) = &self.inner.options.prompt_list_changed_handler {
                    handler(context.peer.clone()).await;
                }
                Ok(())
            }
            ServerNotification::CustomNotification(notification) => {
                tracing::debug!(method = %notification.method, "ignoring unknown notification");
                Ok(())
            }
        }
    }
}

struct ClientService {
    client: Client,
}

impl Service<RoleClient> for ClientService {
    fn handle_request(
        &self,
        request: ServerRequest,
        context: RequestContext<RoleClient>,
    ) -> impl Future<Output = Result<ClientResult, ErrorData>> + Send + '_ {
        async move { self.client.dispatch_request(request, context).await }
    }

    fn handle_notification(
        &self,
        notification: ServerNotification,
        context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = Result<(), ErrorData>> + Send + '_ {
        async move { self.client.dispatch_notification(notification, context).await }
    }

    fn get_info(&self) -> ClientInfo {
        self.client.client_info()
    }
}

/// One live connection to a server, returned once the handshake completed.
pub struct ClientSession {
    running: RunningSession<RoleClient>,
}

impl ClientSession {
    pub fn peer(&self) -> &Peer<RoleClient> {
        self.running.peer()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.running.cancellation_token()
    }

    /// Orderly, idempotent shutdown. After the first close, every call on
    /// this session fails with [`ServiceError::ConnectionClosed`].
    pub fn close(&self) {
        self.running.close();
    }

    /// Wait until the session's event loop has exited.
    pub async fn waiting(&self) -> QuitReason {
        self.running.waiting().await
    }
}

impl Deref for ClientSession {
    type Target = Peer<RoleClient>;

    fn deref(&self) -> &Self::Target {
        self.running.peer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_are_sorted_and_deduplicated_by_uri() {
        let client = Client::new(Implementation::new("test", "v1"), ClientOptions::new());
        client.add_roots([
            Root {
                uri: "file:///b".into(),
                name: None,
            },
            Root {
                uri: "file:///a".into(),
                name: None,
            },
            Root {
                uri: "file:///b".into(),
                name: Some("again".into()),
            },
        ]);
        let uris: Vec<_> = client.roots().into_iter().map(|root| root.uri).collect();
        assert_eq!(uris, vec!["file:///a", "file:///b"]);
    }

    #[test]
    fn test_sampling_capability_follows_handler() {
        let plain = Client::new(Implementation::new("test", "v1"), ClientOptions::new());
        assert!(plain.capabilities().sampling.is_none());

        let sampling = Client::new(
            Implementation::new("test", "v1"),
            ClientOptions::new().on_create_message(|_peer, _params| async {
                Err(ErrorData::internal_error("unused", None))
            }),
        );
        assert!(sampling.capabilities().sampling.is_some());
    }
}
