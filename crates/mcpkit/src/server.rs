//! The server facade: entity registries, live sessions, and the
//! server-side method dispatch.
//!
//! A [`Server`] owns the tools, prompts, resources, and resource templates
//! it exposes. Connecting a transport yields a [`ServerSession`]; one server
//! may serve many sessions at once. Every registry mutation notifies each
//! initialized session exactly once with the matching list-changed
//! notification; mutations racing an unfinished handshake are queued on the
//! session and flushed right after `notifications/initialized` arrives.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
    ops::Deref,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::model::{
    CallToolRequestParam, CallToolResult, ClientNotification, ClientRequest, CompleteRequestParam,
    CompleteResult, ErrorCode, ErrorData, GetPromptRequestParam, GetPromptResult, Implementation,
    InitializeRequestParam, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, LoggingLevel, LoggingMessageNotificationParam,
    ProgressNotificationParam, Prompt, ProtocolVersion, ReadResourceRequestParam,
    ReadResourceResult, Resource, ResourceTemplate, ResourceUpdatedNotificationParam,
    ServerCapabilities, ServerInfo, ServerResult, SubscribeRequestParam, Tool,
    UnsubscribeRequestParam,
};
use crate::service::{
    IncomingMessage, Middleware, NotificationContext, OutgoingMessage, Peer, QuitReason,
    ReceivingMiddleware, RequestContext, RoleServer, RunningSession, SendingMiddleware,
    ServeOptions, Service, ServiceError, serve_directly, unknown_method_error,
};
use crate::transport::IntoTransport;

mod resources;

pub use resources::file_resource_handler;
use resources::UriTemplate;

pub type CallToolHandler = dyn Fn(
        RequestContext<RoleServer>,
        CallToolRequestParam,
    ) -> BoxFuture<'static, Result<CallToolResult, ErrorData>>
    + Send
    + Sync;

pub type GetPromptHandler = dyn Fn(
        RequestContext<RoleServer>,
        GetPromptRequestParam,
    ) -> BoxFuture<'static, Result<GetPromptResult, ErrorData>>
    + Send
    + Sync;

pub type ReadResourceHandler = dyn Fn(
        RequestContext<RoleServer>,
        ReadResourceRequestParam,
    ) -> BoxFuture<'static, Result<ReadResourceResult, ErrorData>>
    + Send
    + Sync;

pub type CompletionHandler = dyn Fn(
        RequestContext<RoleServer>,
        CompleteRequestParam,
    ) -> BoxFuture<'static, Result<CompleteResult, ErrorData>>
    + Send
    + Sync;

type SessionHook = Box<dyn Fn(Peer<RoleServer>) -> BoxFuture<'static, ()> + Send + Sync>;
type SessionParamHook<P> =
    Box<dyn Fn(Peer<RoleServer>, P) -> BoxFuture<'static, ()> + Send + Sync>;
type AuditHook<P> = Box<dyn Fn(P) -> BoxFuture<'static, Result<(), ErrorData>> + Send + Sync>;

/// Optional per-server configuration, set through the builder methods.
#[derive(Default)]
pub struct ServerOptions {
    instructions: Option<String>,
    initialized_handler: Option<SessionHook>,
    roots_list_changed_handler: Option<SessionHook>,
    progress_handler: Option<SessionParamHook<ProgressNotificationParam>>,
    subscribe_handler: Option<AuditHook<SubscribeRequestParam>>,
    unsubscribe_handler: Option<AuditHook<UnsubscribeRequestParam>>,
    completion_handler: Option<Box<CompletionHandler>>,
    keep_alive: Option<Duration>,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Periodically ping the client; a failed ping closes the session.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// Called after a session's `notifications/initialized` is observed.
    pub fn on_initialized<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleServer>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.initialized_handler = Some(Box::new(move |peer| Box::pin(handler(peer))));
        self
    }

    pub fn on_roots_list_changed<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleServer>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.roots_list_changed_handler = Some(Box::new(move |peer| Box::pin(handler(peer))));
        self
    }

    pub fn on_progress<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Peer<RoleServer>, ProgressNotificationParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.progress_handler = Some(Box::new(move |peer, params| {
            Box::pin(handler(peer, params))
        }));
        self
    }

    /// Audit subscriptions; returning an error rejects the subscribe call.
    pub fn on_subscribe<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(SubscribeRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ErrorData>> + Send + 'static,
    {
        self.subscribe_handler = Some(Box::new(move |params| Box::pin(handler(params))));
        self
    }

    pub fn on_unsubscribe<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(UnsubscribeRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ErrorData>> + Send + 'static,
    {
        self.unsubscribe_handler = Some(Box::new(move |params| Box::pin(handler(params))));
        self
    }

    /// Serve `completion/complete`. Without a handler the method answers
    /// method-not-found.
    pub fn on_completion<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RequestContext<RoleServer>, CompleteRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CompleteResult, ErrorData>> + Send + 'static,
    {
        self.completion_handler = Some(Box::new(move |context, params| {
            Box::pin(handler(context, params))
        }));
        self
    }
}

#[derive(Clone)]
struct ToolEntry {
    tool: Tool,
    handler: Arc<CallToolHandler>,
    validator: Option<Arc<jsonschema::Validator>>,
}

#[derive(Clone)]
struct PromptEntry {
    prompt: Prompt,
    handler: Arc<GetPromptHandler>,
}

#[derive(Clone)]
struct ResourceEntry {
    resource: Resource,
    handler: Arc<ReadResourceHandler>,
}

#[derive(Clone)]
struct TemplateEntry {
    template: ResourceTemplate,
    matcher: UriTemplate,
    handler: Arc<ReadResourceHandler>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RegistryKind {
    Tools,
    Prompts,
    Resources,
}

/// Per-session state shared between the server and the session's dispatch.
pub(crate) struct SessionState {
    id: u64,
    peer: OnceLock<Peer<RoleServer>>,
    initialized: AtomicBool,
    min_level: Mutex<Option<LoggingLevel>>,
    pending_changes: Mutex<HashSet<RegistryKind>>,
}

impl SessionState {
    fn new(id: u64) -> Self {
        SessionState {
            id,
            peer: OnceLock::new(),
            initialized: AtomicBool::new(false),
            min_level: Mutex::new(None),
            pending_changes: Mutex::new(HashSet::new()),
        }
    }

    fn peer(&self) -> Option<&Peer<RoleServer>> {
        self.peer.get()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn queue_change(&self, kind: RegistryKind) {
        self.pending_changes
            .lock()
            .expect("pending changes lock")
            .insert(kind);
    }

    fn take_pending_changes(&self) -> Vec<RegistryKind> {
        self.pending_changes
            .lock()
            .expect("pending changes lock")
            .drain()
            .collect()
    }

    fn set_min_level(&self, level: LoggingLevel) {
        *self.min_level.lock().expect("level lock") = Some(level);
    }

    /// Below-threshold records are dropped; with no level set, everything is.
    pub(crate) fn should_log(&self, level: LoggingLevel) -> bool {
        self.min_level
            .lock()
            .expect("level lock")
            .is_some_and(|min| level >= min)
    }
}

struct SessionEntry {
    id: u64,
    state: Arc<SessionState>,
}

struct ServerInner {
    info: Implementation,
    options: ServerOptions,
    tools: Mutex<BTreeMap<String, ToolEntry>>,
    prompts: Mutex<BTreeMap<String, PromptEntry>>,
    resources: Mutex<BTreeMap<String, ResourceEntry>>,
    templates: Mutex<Vec<TemplateEntry>>,
    sessions: Mutex<Vec<SessionEntry>>,
    subscriptions: Mutex<HashMap<String, HashSet<u64>>>,
    sending: Mutex<Vec<SendingMiddleware<RoleServer>>>,
    receiving: Mutex<Vec<ReceivingMiddleware<RoleServer>>>,
    next_session_id: AtomicU64,
}

/// A capability provider. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(info: Implementation, options: ServerOptions) -> Self {
        Server {
            inner: Arc::new(ServerInner {
                info,
                options,
                tools: Mutex::new(BTreeMap::new()),
                prompts: Mutex::new(BTreeMap::new()),
                resources: Mutex::new(BTreeMap::new()),
                templates: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(HashMap::new()),
                sending: Mutex::new(Vec::new()),
                receiving: Mutex::new(Vec::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a tool with a raw handler. Replacing an existing tool of the
    /// same name is one logical mutation.
    ///
    /// Panics if the tool's input schema is not a valid JSON Schema; that is
    /// a programming error at registration time.
    pub fn add_tool<F, Fut>(&self, tool: Tool, handler: F)
    where
        F: Fn(RequestContext<RoleServer>, CallToolRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
    {
        let validator = compile_validator(&tool);
        let handler: Arc<CallToolHandler> =
            Arc::new(move |context, params| Box::pin(handler(context, params)));
        self.inner.tools.lock().expect("tools lock").insert(
            tool.name.to_string(),
            ToolEntry {
                tool,
                handler,
                validator,
            },
        );
        self.notify_changed(RegistryKind::Tools);
    }

    /// Register a tool whose arguments deserialize into `A`. When the tool
    /// carries no input schema, one is generated from `A`.
    pub fn add_tool_typed<A, F, Fut>(&self, mut tool: Tool, handler: F)
    where
        A: serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static,
        F: Fn(RequestContext<RoleServer>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
    {
        if tool.input_schema.is_empty() {
            tool.input_schema = Arc::new(schema_for_type::<A>());
        }
        let handler = Arc::new(handler);
        self.add_tool(tool, move |context, params: CallToolRequestParam| {
            let handler = handler.clone();
            async move {
                let arguments =
                    serde_json::Value::Object(params.arguments.unwrap_or_default());
                match serde_json::from_value::<A>(arguments) {
                    Ok(arguments) => handler(context, arguments).await,
                    Err(error) => Ok(CallToolResult::error(format!(
                        "invalid arguments: {error}"
                    ))),
                }
            }
        });
    }

    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = self
            .inner
            .tools
            .lock()
            .expect("tools lock")
            .remove(name)
            .is_some();
        if removed {
            self.notify_changed(RegistryKind::Tools);
        }
        removed
    }

    pub fn add_prompt<F, Fut>(&self, prompt: Prompt, handler: F)
    where
        F: Fn(RequestContext<RoleServer>, GetPromptRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult, ErrorData>> + Send + 'static,
    {
        let handler: Arc<GetPromptHandler> =
            Arc::new(move |context, params| Box::pin(handler(context, params)));
        self.inner
            .prompts
            .lock()
            .expect("prompts lock")
            .insert(prompt.name.to_string(), PromptEntry { prompt, handler });
        self.notify_changed(RegistryKind::Prompts);
    }

    pub fn remove_prompt(&self, name: &str) -> bool {
        let removed = self
            .inner
            .prompts
            .lock()
            .expect("prompts lock")
            .remove(name)
            .is_some();
        if removed {
            self.notify_changed(RegistryKind::Prompts);
        }
        removed
    }

    pub fn add_resource<F, Fut>(&self, resource: Resource, handler: F)
    where
        F: Fn(RequestContext<RoleServer>, ReadResourceRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, ErrorData>> + Send + 'static,
    {
        let handler: Arc<ReadResourceHandler> =
            Arc::new(move |context, params| Box::pin(handler(context, params)));
        self.inner.resources.lock().expect("resources lock").insert(
            resource.uri.clone(),
            ResourceEntry { resource, handler },
        );
        self.notify_changed(RegistryKind::Resources);
    }

    pub fn remove_resource(&self, uri: &str) -> bool {
        let removed = self
            .inner
            .resources
            .lock()
            .expect("resources lock")
            .remove(uri)
            .is_some();
        if removed {
            self.notify_changed(RegistryKind::Resources);
        }
        removed
    }

    /// Register a resource template. Templates are tried in registration
    /// order during read resolution; the first match wins.
    ///
    /// Panics if the URI template is malformed.
    pub fn add_resource_template<F, Fut>(&self, template: ResourceTemplate, handler: F)
    where
        F: Fn(RequestContext<RoleServer>, ReadResourceRequestParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, ErrorData>> + Send + 'static,
    {
        let matcher = UriTemplate::parse(&template.uri_template)
            .unwrap_or_else(|error| panic!("invalid resource template: {error}"));
        let handler: Arc<ReadResourceHandler> =
            Arc::new(move |context, params| Box::pin(handler(context, params)));
        let entry = TemplateEntry {
            template,
            matcher,
            handler,
        };
        let mut templates = self.inner.templates.lock().expect("templates lock");
        match templates
            .iter_mut()
            .find(|existing| existing.template.name == entry.template.name)
        {
            Some(existing) => *existing = entry,
            None => templates.push(entry),
        }
        drop(templates);
        self.notify_changed(RegistryKind::Resources);
    }

    pub fn remove_resource_template(&self, name: &str) -> bool {
        let mut templates = self.inner.templates.lock().expect("templates lock");
        let before = templates.len();
        templates.retain(|entry| entry.template.name != name);
        let removed = templates.len() != before;
        drop(templates);
        if removed {
            self.notify_changed(RegistryKind::Resources);
        }
        removed
    }

    /// Fan `notifications/resources/updated` out to the sessions currently
    /// subscribed to `uri`.
    pub async fn resource_updated(&self, uri: impl Into<String>) {
        let uri = uri.into();
        let subscriber_ids = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .get(&uri)
            .cloned()
            .unwrap_or_default();
        if subscriber_ids.is_empty() {
            return;
        }
        let peers: Vec<Peer<RoleServer>> = self
            .inner
            .sessions
            .lock()
            .expect("sessions lock")
            .iter()
            .filter(|entry| subscriber_ids.contains(&entry.id))
            .filter_map(|entry| entry.state.peer().cloned())
            .collect();
        for peer in peers {
            let result = peer
                .notify_resource_updated(ResourceUpdatedNotificationParam { uri: uri.clone() })
                .await;
            if let Err(error) = result {
                tracing::debug!(error = %error, %uri, "resource update notification failed");
            }
        }
    }

    /// Peers of the currently live sessions.
    pub fn sessions(&self) -> Vec<Peer<RoleServer>> {
        self.inner
            .sessions
            .lock()
            .expect("sessions lock")
            .iter()
            .filter_map(|entry| entry.state.peer().cloned())
            .collect()
    }

    /// Push a sending middleware layer. Layers added first run outermost.
    /// Stacks are frozen per session at connect time.
    pub fn add_sending_middleware<M>(&self, middleware: M)
    where
        M: Middleware<OutgoingMessage<RoleServer>, crate::model::ClientResult, ServiceError>,
    {
        self.inner
            .sending
            .lock()
            .expect("sending middleware lock")
            .push(Arc::new(middleware));
    }

    pub fn add_receiving_middleware<M>(&self, middleware: M)
    where
        M: Middleware<IncomingMessage<RoleServer>, ServerResult, ErrorData>,
    {
        self.inner
            .receiving
            .lock()
            .expect("receiving middleware lock")
            .push(Arc::new(middleware));
    }

    /// Attach a transport and start serving it. The handshake proceeds in
    /// the background; requests other than `initialize` and `ping` are
    /// rejected until the client's `notifications/initialized` arrives.
    pub fn connect<T, E, A>(&self, transport: T) -> ServerSession
    where
        T: IntoTransport<RoleServer, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SessionState::new(id));
        let service = ServerSessionService {
            server: self.clone(),
            state: state.clone(),
        };
        let sending: Arc<[SendingMiddleware<RoleServer>]> = self
            .inner
            .sending
            .lock()
            .expect("sending middleware lock")
            .clone()
            .into();
        let receiving: Arc<[ReceivingMiddleware<RoleServer>]> = self
            .inner
            .receiving
            .lock()
            .expect("receiving middleware lock")
            .clone()
            .into();
        let server = self.clone();
        let on_close = Box::new(move || server.remove_session(id));
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
        let _ = state.peer.set(running.peer().clone());
        self.inner
            .sessions
            .lock()
            .expect("sessions lock")
            .push(SessionEntry {
                id,
                state: state.clone(),
            });
        ServerSession { running, state }
    }

    fn remove_session(&self, id: u64) {
        self.inner
            .sessions
            .lock()
            .expect("sessions lock")
            .retain(|entry| entry.id != id);
        let mut subscriptions = self.inner.subscriptions.lock().expect("subscriptions lock");
        subscriptions.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
    }

    fn capabilities(&self) -> ServerCapabilities {
        let mut builder = ServerCapabilities::builder()
            .enable_logging()
            .enable_tools()
            .enable_prompts()
            .enable_resources();
        if self.inner.options.completion_handler.is_some() {
            builder = builder.enable_completions();
        }
        builder.build()
    }

    fn server_info(&self) -> ServerInfo {
        InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.capabilities(),
            server_info: self.inner.info.clone(),
            instructions: self.inner.options.instructions.clone(),
        }
    }

    fn notify_changed(&self, kind: RegistryKind) {
        let states: Vec<Arc<SessionState>> = self
            .inner
            .sessions
            .lock()
            .expect("sessions lock")
            .iter()
            .map(|entry| entry.state.clone())
            .collect();
        for state in states {
            if !state.is_initialized() {
                state.queue_change(kind);
                continue;
            }
            let Some(peer) = state.peer().cloned() else {
                continue;
            };
            tokio::spawn(async move {
                if let Err(error) = send_list_changed(&peer, kind).await {
                    tracing::debug!(error = %error, ?kind, "list-changed notification failed");
                }
            });
        }
    }

    // ---- dispatch ----------------------------------------------------------

    async fn dispatch_request(
        &self,
        state: &SessionState,
        request: ClientRequest,
        context: RequestContext<RoleServer>,
    ) -> Result<ServerResult, ErrorData> {
        if !state.is_initialized()
            && !matches!(
                request,
                ClientRequest::InitializeRequest(_) | ClientRequest::PingRequest(_)
            )
        {
            return Err(ErrorData::new(
                ErrorCode::SERVER_CLOSING,
                "server has not completed initialization",
                None,
            ));
        }
        match request {
            ClientRequest::InitializeRequest(request) => {
                self.handle_initialize(state, request.params, &context)
            }
            ClientRequest::PingRequest(_) => Ok(ServerResult::empty()),
            ClientRequest::ListToolsRequest(_) => {
                Ok(ServerResult::ListToolsResult(self.list_tools()))
            }
            ClientRequest::CallToolRequest(request) => self
                .call_tool(request.params, context)
                .await
                .map(ServerResult::CallToolResult),
            ClientRequest::ListPromptsRequest(_) => {
                Ok(ServerResult::ListPromptsResult(self.list_prompts()))
            }
            ClientRequest::GetPromptRequest(request) => self
                .get_prompt(request.params, context)
                .await
                .map(ServerResult::GetPromptResult),
            ClientRequest::ListResourcesRequest(_) => {
                Ok(ServerResult::ListResourcesResult(self.list_resources()))
            }
            ClientRequest::ListResourceTemplatesRequest(_) => Ok(
                ServerResult::ListResourceTemplatesResult(self.list_resource_templates()),
            ),
            ClientRequest::ReadResourceRequest(request) => self
                .read_resource(request.params, context)
                .await
                .map(ServerResult::ReadResourceResult),
            ClientRequest::SubscribeRequest(request) => {
                self.subscribe(state, request.params).await?;
                Ok(ServerResult::empty())
            }
            ClientRequest::UnsubscribeRequest(request) => {
                self.unsubscribe(state, request.params).await?;
                Ok(ServerResult::empty())
            }
            ClientRequest::SetLevelRequest(request) => {
                state.set_min_level(request.params.level);
                Ok(ServerResult::empty())
            }
            ClientRequest::CompleteRequest(request) => {
                match &self.inner.options.completion_handler {
                    Some(handler) => handler(context, request.params)
                        .await
                        .map(ServerResult::CompleteResult),
                    None => Err(ErrorData::method_not_found(
                        "completion/complete is not supported by this server",
                    )),
                }
            }
            ClientRequest::CustomRequest(request) => Err(unknown_method_error(&request.method)),
        }
    }

    async fn dispatch_notification(
        &self,
        state: &SessionState,
        notification: ClientNotification,
        context: NotificationContext<RoleServer>,
    ) -> Result<(), ErrorData> {
        match notification {
            ClientNotification::InitializedNotification(_) => {
                state.set_initialized();
                let pending = state.take_pending_changes();
                if !pending.is_empty() {
                    // This dispatch runs on the session's reader task, so
                    // queued notifications go out on a fresh task.
                    let peer = context.peer.clone();
                    tokio::spawn(async move {
                        for kind in pending {
                            if let Err(error) = send_list_changed(&peer, kind).await {
                                tracing::debug!(error = %error, ?kind, "queued list-changed failed");
                            }
                        }
                    });
                }
                if let Some(handler) = &self.inner.options.initialized_handler {
                    handler(context.peer.clone()).await;
                }
                Ok(())
            }
            // Cancellations are routed to in-flight requests by the
            // correlator before dispatch.
            ClientNotification::CancelledNotification(_) => Ok(()),
            ClientNotification::ProgressNotification(notification) => {
                if let Some(handler) = &self.inner.options.progress_handler {
                    handler(context.peer.clone(), notification.params).await;
                }
                Ok(())
            }
            ClientNotification::RootsListChangedNotification(_) => {
                if let Some(handler) = &self.inner.options.roots_list_changed_handler {
                    handler(context.peer.clone()).await;
                }
                Ok(())
            }
            ClientNotification::CustomNotification(notification) => {
                tracing::debug!(method = %notification.method, "ignoring unknown notification");
                Ok(())
            }
        }
    }

    fn handle_initialize(
        &self,
        state: &SessionState,
        params: InitializeRequestParam,
        context: &RequestContext<RoleServer>,
    ) -> Result<ServerResult, ErrorData> {
        if state.is_initialized() {
            return Err(ErrorData::invalid_request(
                "initialize received after initialization",
                None,
            ));
        }
        let requested_version = params.protocol_version.clone();
        context.peer.set_peer_info(params);
        let mut result = self.server_info();
        if requested_version.is_supported() {
            result.protocol_version = requested_version;
        }
        Ok(ServerResult::InitializeResult(result))
    }

    fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self
                .inner
                .tools
                .lock()
                .expect("tools lock")
                .values()
                .map(|entry| entry.tool.clone())
                .collect(),
            next_cursor: None,
        }
    }

    fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self
                .inner
                .prompts
                .lock()
                .expect("prompts lock")
                .values()
                .map(|entry| entry.prompt.clone())
                .collect(),
            next_cursor: None,
        }
    }

    fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self
                .inner
                .resources
                .lock()
                .expect("resources lock")
                .values()
                .map(|entry| entry.resource.clone())
                .collect(),
            next_cursor: None,
        }
    }

    fn list_resource_templates(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult {
            resource_templates: self
                .inner
                .templates
                .lock()
                .expect("templates lock")
                .iter()
                .map(|entry| entry.template.clone())
                .collect(),
            next_cursor: None,
        }
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let entry = self
            .inner
            .tools
            .lock()
            .expect("tools lock")
            .get(params.name.as_ref())
            .cloned()
            .ok_or_else(|| {
                ErrorData::method_not_found(format!("unknown tool: {}", params.name))
            })?;
        if let Some(validator) = &entry.validator {
            let arguments =
                serde_json::Value::Object(params.arguments.clone().unwrap_or_default());
            if let Err(error) = validator.validate(&arguments) {
                return Ok(CallToolResult::error(format!(
                    "invalid arguments for tool {}: {error}",
                    params.name
                )));
            }
        }
        match (entry.handler)(context, params).await {
            Ok(result) => Ok(result),
            // A failing tool is a model-visible outcome, not a wire error.
            Err(error) => Ok(CallToolResult::error(error.message)),
        }
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        let entry = self
            .inner
            .prompts
            .lock()
            .expect("prompts lock")
            .get(params.name.as_ref())
            .cloned()
            .ok_or_else(|| {
                ErrorData::method_not_found(format!("unknown prompt: {}", params.name))
            })?;
        if let Some(declared) = &entry.prompt.arguments {
            for argument in declared {
                let provided = params
                    .arguments
                    .as_ref()
                    .is_some_and(|arguments| arguments.contains_key(&argument.name));
                if argument.required == Some(true) && !provided {
                    return Err(ErrorData::invalid_params(
                        format!("missing required argument: {}", argument.name),
                        None,
                    ));
                }
            }
        }
        (entry.handler)(context, params).await
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let Some((handler, mime_type)) = self.resolve_read_handler(&params.uri) else {
            return Err(ErrorData::resource_not_found(&params.uri));
        };
        let mut result = handler(context, params).await?;
        for contents in &mut result.contents {
            contents.set_mime_type_if_absent(mime_type.as_deref());
        }
        Ok(result)
    }

    fn resolve_read_handler(
        &self,
        uri: &str,
    ) -> Option<(Arc<ReadResourceHandler>, Option<String>)> {
        if let Some(entry) = self
            .inner
            .resources
            .lock()
            .expect("resources lock")
            .get(uri)
        {
            return Some((entry.handler.clone(), entry.resource.mime_type.clone()));
        }
        self.inner
            .templates
            .lock()
            .expect("templates lock")
            .iter()
            .find(|entry| entry.matcher.matches(uri))
            .map(|entry| (entry.handler.clone(), entry.template.mime_type.clone()))
    }

    async fn subscribe(
        &self,
        state: &SessionState,
        params: SubscribeRequestParam,
    ) -> Result<(), ErrorData> {
        if let Some(handler) = &self.inner.options.subscribe_handler {
            handler(params.clone()).await?;
        }
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .entry(params.uri)
            .or_default()
            .insert(state.id);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        state: &SessionState,
        params: UnsubscribeRequestParam,
    ) -> Result<(), ErrorData> {
        if let Some(handler) = &self.inner.options.unsubscribe_handler {
            handler(params.clone()).await?;
        }
        let mut subscriptions = self.inner.subscriptions.lock().expect("subscriptions lock");
        if let Some(subscribers) = subscriptions.get_mut(&params.uri) {
            subscribers.remove(&state.id);
            if subscribers.is_empty() {
                subscriptions.remove(&params.uri);
            }
        }
        Ok(())
    }
}

async fn send_list_changed(
    peer: &Peer<RoleServer>,
    kind: RegistryKind,
) -> Result<(), ServiceError> {
    match kind {
        RegistryKind::Tools => peer.notify_tool_list_changed().await,
        RegistryKind::Prompts => peer.notify_prompt_list_changed().await,
        RegistryKind::Resources => peer.notify_resource_list_changed().await,
    }
}

fn compile_validator(tool: &Tool) -> Option<Arc<jsonschema::Validator>> {
    if tool.input_schema.is_empty() {
        return None;
    }
    let schema = serde_json::Value::Object((*tool.input_schema).clone());
    let validator = jsonschema::validator_for(&schema)
        .unwrap_or_else(|error| panic!("invalid input schema for tool {}: {error}", tool.name));
    Some(Arc::new(validator))
}

/// Generate a JSON schema object for `A` using its [`schemars::JsonSchema`]
/// implementation.
pub fn schema_for_type<A: schemars::JsonSchema>() -> crate::model::JsonObject {
    let schema = schemars::r#gen::SchemaGenerator::default().into_root_schema_for::<A>();
    match serde_json::to_value(schema) {
        Ok(serde_json::Value::Object(object)) => object,
        _ => crate::model::JsonObject::new(),
    }
}

struct ServerSessionService {
    server: Server,
    state: Arc<SessionState>,
}

impl Service<RoleServer> for ServerSessionService {
    fn handle_request(
        &self,
        request: ClientRequest,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ServerResult, ErrorData>> + Send + '_ {
        async move {
            self.server
                .dispatch_request(&self.state, request, context)
                .await
        }
    }

    fn handle_notification(
        &self,
        notification: ClientNotification,
        context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = Result<(), ErrorData>> + Send + '_ {
        async move {
            self.server
                .dispatch_notification(&self.state, notification, context)
                .await
        }
    }

    fn get_info(&self) -> ServerInfo {
        self.server.server_info()
    }
}

/// One live connection to a client.
pub struct ServerSession {
    running: RunningSession<RoleServer>,
    state: Arc<SessionState>,
}

impl ServerSession {
    pub fn peer(&self) -> &Peer<RoleServer> {
        self.running.peer()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.running.cancellation_token()
    }

    /// Orderly, idempotent shutdown of this session.
    pub fn close(&self) {
        self.running.close();
    }

    /// Wait until the session's event loop has exited.
    pub async fn waiting(&self) -> QuitReason {
        self.running.waiting().await
    }

    /// Emit `notifications/message` if `params.level` clears the session's
    /// minimum level. With no level set by the client, nothing is emitted.
    pub async fn log(
        &self,
        params: LoggingMessageNotificationParam,
    ) -> Result<(), ServiceError> {
        if !self.state.should_log(params.level) {
            return Ok(());
        }
        self.peer().notify_logging_message(params).await
    }

    pub(crate) fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }
}

impl Deref for ServerSession {
    type Target = Peer<RoleServer>;

    fn deref(&self) -> &Self::Target {
        self.running.peer()
    }
}
