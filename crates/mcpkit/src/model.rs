//! Basic data types of the protocol: the JSON-RPC envelope, request ids,
//! error codes, and the typed method catalog for both peer roles.
//!
//! The wire shape is the combined envelope
//! `{jsonrpc, id?, method?, params?, result?, error?}`; decoding
//! disambiguates through the untagged [`JsonRpcMessage`] enum. Absent
//! optional fields are omitted on encode and never serialized as `null`:
//! downstream tooling chokes on JSON nulls, so the codec must not emit the
//! token at all.

use std::{borrow::Cow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod capabilities;
mod content;
mod prompt;
mod resource;
mod tool;

pub use capabilities::*;
pub use content::*;
pub use prompt::*;
pub use resource::*;
pub use tool::*;

pub type JsonObject<F = Value> = serde_json::Map<String, F>;

/// Unwrap a JSON value into an object, discarding anything else.
pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(object) => object,
        _ => JsonObject::new(),
    }
}

/// A JSON-RPC id: either an integer or a string.
///
/// The runtime generates monotonically increasing integers for its own
/// outgoing requests; string ids are accepted from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u32),
    String(Arc<str>),
}

impl fmt::Display for NumberOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrString::Number(n) => n.fmt(f),
            NumberOrString::String(s) => s.fmt(f),
        }
    }
}

impl From<u32> for NumberOrString {
    fn from(value: u32) -> Self {
        NumberOrString::Number(value)
    }
}

impl From<String> for NumberOrString {
    fn from(value: String) -> Self {
        NumberOrString::String(value.into())
    }
}

pub type RequestId = NumberOrString;

/// Opaque token correlating progress notifications with a long-running
/// operation, chosen by the operation's initiator.
pub type ProgressToken = NumberOrString;

/// A protocol revision date, e.g. `"2025-03-26"`.
///
/// Revisions are dated, so lexicographic order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(Cow<'static, str>);

impl ProtocolVersion {
    pub const V_2024_11_05: Self = ProtocolVersion(Cow::Borrowed("2024-11-05"));
    pub const V_2025_03_26: Self = ProtocolVersion(Cow::Borrowed("2025-03-26"));
    pub const LATEST: Self = Self::V_2025_03_26;
    pub const SUPPORTED: &'static [ProtocolVersion] =
        &[Self::V_2024_11_05, Self::V_2025_03_26];

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name and version of a connected peer implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self::from_build_env()
    }
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Implementation {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn from_build_env() -> Self {
        Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// Error objects
// =============================================================================

/// A JSON-RPC error code.
///
/// Two protocol errors are considered the same kind when their codes match,
/// regardless of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    // Codes reserved by the JSON-RPC 2.0 specification.
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);

    // Compliant extension codes.
    pub const OVERLOADED: Self = Self(-32000);
    pub const UNKNOWN: Self = Self(-32001);
    pub const RESOURCE_NOT_FOUND: Self = Self(-32002);
    pub const CLIENT_CLOSING: Self = Self(-32003);
    pub const SERVER_CLOSING: Self = Self(-32004);
}

/// The error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    pub fn new(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        data: Option<Value>,
    ) -> Self {
        ErrorData {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message, data)
    }

    pub fn invalid_request(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message, data)
    }

    pub fn method_not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, message, None)
    }

    pub fn invalid_params(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message, data)
    }

    pub fn internal_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message, data)
    }

    pub fn resource_not_found(uri: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RESOURCE_NOT_FOUND,
            format!("resource not found: {uri}"),
            None,
        )
    }
}

/// Result type for methods whose success carries no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyObject {}

pub type EmptyResult = EmptyObject;

// =============================================================================
// Generic message carriers and method markers
// =============================================================================

macro_rules! const_string {
    ($name:ident = $value:literal) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $name {
            pub const VALUE: &'static str = $value;
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str($value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s: String = Deserialize::deserialize(deserializer)?;
                if s == $value {
                    Ok($name)
                } else {
                    Err(serde::de::Error::custom(format!(
                        concat!("expected ", $value, ", got {}"),
                        s
                    )))
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<M, P> {
    pub method: M,
    pub params: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptionalParam<M, P> {
    pub method: M,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNoParam<M> {
    pub method: M,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification<M, P> {
    pub method: M,
    pub params: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationNoParam<M> {
    pub method: M,
}

impl<M: Default, P> Request<M, P> {
    pub fn new(params: P) -> Self {
        Request {
            method: Default::default(),
            params,
        }
    }
}

impl<M: Default, P> RequestOptionalParam<M, P> {
    pub fn with_param(params: P) -> Self {
        RequestOptionalParam {
            method: Default::default(),
            params: Some(params),
        }
    }
}

impl<M: Default, P> Notification<M, P> {
    pub fn new(params: P) -> Self {
        Notification {
            method: Default::default(),
            params,
        }
    }
}

/// A request or notification whose method is not part of the catalog.
///
/// Keeping a decodable tail variant lets the dispatcher answer unknown
/// methods with a method-not-found error instead of dropping the message at
/// the codec layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Access to the wire method name of a typed message.
pub trait GetMethod {
    fn method(&self) -> &str;
}

// =============================================================================
// Method catalog
// =============================================================================

const_string!(InitializeRequestMethod = "initialize");
const_string!(PingRequestMethod = "ping");
const_string!(ListToolsRequestMethod = "tools/list");
const_string!(CallToolRequestMethod = "tools/call");
const_string!(ListPromptsRequestMethod = "prompts/list");
const_string!(GetPromptRequestMethod = "prompts/get");
const_string!(ListResourcesRequestMethod = "resources/list");
const_string!(ListResourceTemplatesRequestMethod = "resources/templates/list");
const_string!(ReadResourceRequestMethod = "resources/read");
const_string!(SubscribeRequestMethod = "resources/subscribe");
const_string!(UnsubscribeRequestMethod = "resources/unsubscribe");
const_string!(SetLevelRequestMethod = "logging/setLevel");
const_string!(CompleteRequestMethod = "completion/complete");
const_string!(ListRootsRequestMethod = "roots/list");
const_string!(CreateMessageRequestMethod = "sampling/createMessage");

const_string!(InitializedNotificationMethod = "notifications/initialized");
const_string!(CancelledNotificationMethod = "notifications/cancelled");
const_string!(ProgressNotificationMethod = "notifications/progress");
const_string!(LoggingMessageNotificationMethod = "notifications/message");
const_string!(RootsListChangedNotificationMethod = "notifications/roots/list_changed");
const_string!(ToolListChangedNotificationMethod = "notifications/tools/list_changed");
const_string!(PromptListChangedNotificationMethod = "notifications/prompts/list_changed");
const_string!(ResourceListChangedNotificationMethod = "notifications/resources/list_changed");
const_string!(ResourceUpdatedNotificationMethod = "notifications/resources/updated");

// ---- initialize -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParam {
    pub protocol_version: ProtocolVersion,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: ProtocolVersion,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

pub type ClientInfo = InitializeRequestParam;
pub type ServerInfo = InitializeResult;

impl Default for InitializeRequestParam {
    fn default() -> Self {
        InitializeRequestParam {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::from_build_env(),
        }
    }
}

impl Default for InitializeResult {
    fn default() -> Self {
        InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::from_build_env(),
            instructions: None,
        }
    }
}

pub type InitializeRequest = Request<InitializeRequestMethod, InitializeRequestParam>;
pub type PingRequest = RequestNoParam<PingRequestMethod>;

// ---- pagination -------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedRequestParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

pub type ListToolsRequest = RequestOptionalParam<ListToolsRequestMethod, PaginatedRequestParam>;
pub type CallToolRequest = Request<CallToolRequestMethod, CallToolRequestParam>;
pub type ListPromptsRequest = RequestOptionalParam<ListPromptsRequestMethod, PaginatedRequestParam>;
pub type GetPromptRequest = Request<GetPromptRequestMethod, GetPromptRequestParam>;
pub type ListResourcesRequest =
    RequestOptionalParam<ListResourcesRequestMethod, PaginatedRequestParam>;
pub type ListResourceTemplatesRequest =
    RequestOptionalParam<ListResourceTemplatesRequestMethod, PaginatedRequestParam>;
pub type ReadResourceRequest = Request<ReadResourceRequestMethod, ReadResourceRequestParam>;
pub type SubscribeRequest = Request<SubscribeRequestMethod, SubscribeRequestParam>;
pub type UnsubscribeRequest = Request<UnsubscribeRequestMethod, UnsubscribeRequestParam>;
pub type SetLevelRequest = Request<SetLevelRequestMethod, SetLevelRequestParam>;
pub type CompleteRequest = Request<CompleteRequestMethod, CompleteRequestParam>;
pub type ListRootsRequest = RequestNoParam<ListRootsRequestMethod>;
pub type CreateMessageRequest = Request<CreateMessageRequestMethod, CreateMessageRequestParam>;

// ---- logging ----------------------------------------------------------------

/// Severity of a protocol log message, in ascending syslog order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLevelRequestParam {
    pub level: LoggingLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingMessageNotificationParam {
    pub level: LoggingLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}

// ---- progress and cancellation ----------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParam {
    pub progress_token: ProgressToken,
    /// Progress so far, in the initiator's chosen unit. Should increase
    /// monotonically even when the total is unknown.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParam {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---- roots ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}

// ---- sampling ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingMessage {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequestParam {
    pub messages: Vec<SamplingMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    #[serde(default)]
    pub role: Role,
    pub content: Content,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

// ---- completion -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reference {
    #[serde(rename = "ref/prompt")]
    Prompt { name: String },
    #[serde(rename = "ref/resource")]
    Resource { uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentInfo {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequestParam {
    #[serde(rename = "ref")]
    pub reference: Reference,
    pub argument: ArgumentInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResult {
    pub completion: CompletionInfo,
}

// ---- notifications ----------------------------------------------------------

pub type InitializedNotification = NotificationNoParam<InitializedNotificationMethod>;
pub type CancelledNotification =
    Notification<CancelledNotificationMethod, CancelledNotificationParam>;
pub type ProgressNotification = Notification<ProgressNotificationMethod, ProgressNotificationParam>;
pub type LoggingMessageNotification =
    Notification<LoggingMessageNotificationMethod, LoggingMessageNotificationParam>;
pub type RootsListChangedNotification = NotificationNoParam<RootsListChangedNotificationMethod>;
pub type ToolListChangedNotification = NotificationNoParam<ToolListChangedNotificationMethod>;
pub type PromptListChangedNotification = NotificationNoParam<PromptListChangedNotificationMethod>;
pub type ResourceListChangedNotification =
    NotificationNoParam<ResourceListChangedNotificationMethod>;
pub type ResourceUpdatedNotification =
    Notification<ResourceUpdatedNotificationMethod, ResourceUpdatedNotificationParam>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdatedNotificationParam {
    pub uri: String,
}

// =============================================================================
// Role enums
// =============================================================================

/// Requests a client may send to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientRequest {
    InitializeRequest(InitializeRequest),
    PingRequest(PingRequest),
    ListToolsRequest(ListToolsRequest),
    CallToolRequest(CallToolRequest),
    ListPromptsRequest(ListPromptsRequest),
    GetPromptRequest(GetPromptRequest),
    ListResourcesRequest(ListResourcesRequest),
    ListResourceTemplatesRequest(ListResourceTemplatesRequest),
    ReadResourceRequest(ReadResourceRequest),
    SubscribeRequest(SubscribeRequest),
    UnsubscribeRequest(UnsubscribeRequest),
    SetLevelRequest(SetLevelRequest),
    CompleteRequest(CompleteRequest),
    CustomRequest(CustomRequest),
}

/// Notifications a client may send to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientNotification {
    InitializedNotification(InitializedNotification),
    CancelledNotification(CancelledNotification),
    ProgressNotification(ProgressNotification),
    RootsListChangedNotification(RootsListChangedNotification),
    CustomNotification(CustomNotification),
}

/// Results a client may produce for server-initiated requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientResult {
    CreateMessageResult(CreateMessageResult),
    ListRootsResult(ListRootsResult),
    EmptyResult(EmptyResult),
}

/// Requests a server may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerRequest {
    PingRequest(PingRequest),
    ListRootsRequest(ListRootsRequest),
    CreateMessageRequest(CreateMessageRequest),
    CustomRequest(CustomRequest),
}

/// Notifications a server may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerNotification {
    CancelledNotification(CancelledNotification),
    ProgressNotification(ProgressNotification),
    LoggingMessageNotification(LoggingMessageNotification),
    ResourceUpdatedNotification(ResourceUpdatedNotification),
    ResourceListChangedNotification(ResourceListChangedNotification),
    ToolListChangedNotification(ToolListChangedNotification),
    PromptListChangedNotification(PromptListChangedNotification),
    CustomNotification(CustomNotification),
}

/// Results a server may produce for client-initiated requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerResult {
    InitializeResult(InitializeResult),
    ListToolsResult(ListToolsResult),
    CallToolResult(CallToolResult),
    ListPromptsResult(ListPromptsResult),
    GetPromptResult(GetPromptResult),
    ListResourcesResult(ListResourcesResult),
    ListResourceTemplatesResult(ListResourceTemplatesResult),
    ReadResourceResult(ReadResourceResult),
    CompleteResult(CompleteResult),
    EmptyResult(EmptyResult),
}

impl ClientResult {
    pub fn empty() -> ClientResult {
        ClientResult::EmptyResult(EmptyObject {})
    }
}

impl ServerResult {
    pub fn empty() -> ServerResult {
        ServerResult::EmptyResult(EmptyObject {})
    }
}

impl GetMethod for ClientRequest {
    fn method(&self) -> &str {
        match self {
            ClientRequest::InitializeRequest(_) => InitializeRequestMethod::VALUE,
            ClientRequest::PingRequest(_) => PingRequestMethod::VALUE,
            ClientRequest::ListToolsRequest(_) => ListToolsRequestMethod::VALUE,
            ClientRequest::CallToolRequest(_) => CallToolRequestMethod::VALUE,
            ClientRequest::ListPromptsRequest(_) => ListPromptsRequestMethod::VALUE,
            ClientRequest::GetPromptRequest(_) => GetPromptRequestMethod::VALUE,
            ClientRequest::ListResourcesRequest(_) => ListResourcesRequestMethod::VALUE,
            ClientRequest::ListResourceTemplatesRequest(_) => {
                ListResourceTemplatesRequestMethod::VALUE
            }
            ClientRequest::ReadResourceRequest(_) => ReadResourceRequestMethod::VALUE,
            ClientRequest::SubscribeRequest(_) => SubscribeRequestMethod::VALUE,
            ClientRequest::UnsubscribeRequest(_) => UnsubscribeRequestMethod::VALUE,
            ClientRequest::SetLevelRequest(_) => SetLevelRequestMethod::VALUE,
            ClientRequest::CompleteRequest(_) => CompleteRequestMethod::VALUE,
            ClientRequest::CustomRequest(request) => &request.method,
        }
    }
}

impl GetMethod for ClientNotification {
    fn method(&self) -> &str {
        match self {
            ClientNotification::InitializedNotification(_) => InitializedNotificationMethod::VALUE,
            ClientNotification::CancelledNotification(_) => CancelledNotificationMethod::VALUE,
            ClientNotification::ProgressNotification(_) => ProgressNotificationMethod::VALUE,
            ClientNotification::RootsListChangedNotification(_) => {
                RootsListChangedNotificationMethod::VALUE
            }
            ClientNotification::CustomNotification(notification) => &notification.method,
        }
    }
}

impl GetMethod for ServerRequest {
    fn method(&self) -> &str {
        match self {
            ServerRequest::PingRequest(_) => PingRequestMethod::VALUE,
            ServerRequest::ListRootsRequest(_) => ListRootsRequestMethod::VALUE,
            ServerRequest::CreateMessageRequest(_) => CreateMessageRequestMethod::VALUE,
            ServerRequest::CustomRequest(request) => &request.method,
        }
    }
}

impl GetMethod for ServerNotification {
    fn method(&self) -> &str {
        match self {
            ServerNotification::CancelledNotification(_) => CancelledNotificationMethod::VALUE,
            ServerNotification::ProgressNotification(_) => ProgressNotificationMethod::VALUE,
            ServerNotification::LoggingMessageNotification(_) => {
                LoggingMessageNotificationMethod::VALUE
            }
            ServerNotification::ResourceUpdatedNotification(_) => {
                ResourceUpdatedNotificationMethod::VALUE
            }
            ServerNotification::ResourceListChangedNotification(_) => {
                ResourceListChangedNotificationMethod::VALUE
            }
            ServerNotification::ToolListChangedNotification(_) => {
                ToolListChangedNotificationMethod::VALUE
            }
            ServerNotification::PromptListChangedNotification(_) => {
                PromptListChangedNotificationMethod::VALUE
            }
            ServerNotification::CustomNotification(notification) => &notification.method,
        }
    }
}

/// Method names in the catalog, used to distinguish "unknown method" from
/// "known method with malformed params" when a message lands in the custom
/// tail variant.
pub(crate) const KNOWN_METHODS: &[&str] = &[
    InitializeRequestMethod::VALUE,
    PingRequestMethod::VALUE,
    ListToolsRequestMethod::VALUE,
    CallToolRequestMethod::VALUE,
    ListPromptsRequestMethod::VALUE,
    GetPromptRequestMethod::VALUE,
    ListResourcesRequestMethod::VALUE,
    ListResourceTemplatesRequestMethod::VALUE,
    ReadResourceRequestMethod::VALUE,
    SubscribeRequestMethod::VALUE,
    UnsubscribeRequestMethod::VALUE,
    SetLevelRequestMethod::VALUE,
    CompleteRequestMethod::VALUE,
    ListRootsRequestMethod::VALUE,
    CreateMessageRequestMethod::VALUE,
];

// =============================================================================
// JSON-RPC envelope
// =============================================================================

const_string!(JsonRpcVersion2_0 = "2.0");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest<R> {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    #[serde(flatten)]
    pub request: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse<R> {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub result: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub error: ErrorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification<N> {
    pub jsonrpc: JsonRpcVersion2_0,
    #[serde(flatten)]
    pub notification: N,
}

/// One decoded wire message. Batch arrays are deliberately not decodable:
/// a batched `initialize` deadlocks the lifecycle, so the protocol dropped
/// batching altogether.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage<Req, Resp, Not> {
    Request(JsonRpcRequest<Req>),
    Response(JsonRpcResponse<Resp>),
    Notification(JsonRpcNotification<Not>),
    Error(JsonRpcError),
}

impl<Req, Resp, Not> JsonRpcMessage<Req, Resp, Not> {
    pub fn request(request: Req, id: RequestId) -> Self {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JsonRpcVersion2_0,
            id,
            request,
        })
    }

    pub fn response(result: Resp, id: RequestId) -> Self {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id,
            result,
        })
    }

    pub fn error(error: ErrorData, id: RequestId) -> Self {
        JsonRpcMessage::Error(JsonRpcError {
            jsonrpc: JsonRpcVersion2_0,
            id,
            error,
        })
    }

    pub fn notification(notification: Not) -> Self {
        JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            notification,
        })
    }

    pub fn into_request(self) -> Option<(Req, RequestId)> {
        match self {
            JsonRpcMessage::Request(JsonRpcRequest { id, request, .. }) => Some((request, id)),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<(Resp, RequestId)> {
        match self {
            JsonRpcMessage::Response(JsonRpcResponse { id, result, .. }) => Some((result, id)),
            _ => None,
        }
    }

    pub fn into_notification(self) -> Option<Not> {
        match self {
            JsonRpcMessage::Notification(JsonRpcNotification { notification, .. }) => {
                Some(notification)
            }
            _ => None,
        }
    }
}

pub type ClientJsonRpcMessage = JsonRpcMessage<ClientRequest, ClientResult, ClientNotification>;
pub type ServerJsonRpcMessage = JsonRpcMessage<ServerRequest, ServerResult, ServerNotification>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_disambiguation() {
        let request: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "ping",
        }))
        .unwrap();
        assert!(matches!(
            request,
            JsonRpcMessage::Request(JsonRpcRequest {
                request: ClientRequest::PingRequest(_),
                ..
            })
        ));

        let notification: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(matches!(
            notification,
            JsonRpcMessage::Notification(JsonRpcNotification {
                notification: ClientNotification::InitializedNotification(_),
                ..
            })
        ));

        let response: ServerJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {},
        }))
        .unwrap();
        assert!(matches!(
            response,
            JsonRpcMessage::Response(JsonRpcResponse {
                result: ServerResult::EmptyResult(_),
                ..
            })
        ));

        let error: ServerJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32601, "message": "method not found"},
        }))
        .unwrap();
        assert!(matches!(error, JsonRpcMessage::Error(_)));
    }

    #[test]
    fn test_batch_arrays_are_refused() {
        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"jsonrpc": "2.0", "id": 2, "method": "ping"},
        ]);
        assert!(serde_json::from_value::<ClientJsonRpcMessage>(batch).is_err());
    }

    #[test]
    fn test_unknown_method_decodes_into_custom_tail() {
        let message: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "frobnicate/run",
            "params": {"x": 1},
        }))
        .unwrap();
        let (request, _id) = message.into_request().unwrap();
        assert_eq!(request.method(), "frobnicate/run");
        assert!(matches!(request, ClientRequest::CustomRequest(_)));
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let message = ClientJsonRpcMessage::request(
            ClientRequest::ListToolsRequest(ListToolsRequest {
                method: Default::default(),
                params: None,
            }),
            RequestId::Number(0),
        );
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(!encoded.contains("null"), "encoded message: {encoded}");
        assert!(!encoded.contains("params"));

        let result = ServerJsonRpcMessage::response(
            ServerResult::CallToolResult(CallToolResult::success(vec![Content::text("hi")])),
            RequestId::Number(0),
        );
        let encoded = serde_json::to_string(&result).unwrap();
        assert!(!encoded.contains("null"), "encoded message: {encoded}");
        assert!(!encoded.contains("isError"));
    }

    #[test]
    fn test_error_kind_is_identified_by_code() {
        let a = ErrorData::new(ErrorCode::SERVER_CLOSING, "server is closing", None);
        let b = ErrorData::new(ErrorCode::SERVER_CLOSING, "shutting down now", None);
        assert_eq!(a.code, b.code);
        assert_eq!(ErrorCode::PARSE_ERROR.0, -32700);
        assert_eq!(ErrorCode::INVALID_REQUEST.0, -32600);
        assert_eq!(ErrorCode::METHOD_NOT_FOUND.0, -32601);
        assert_eq!(ErrorCode::INVALID_PARAMS.0, -32602);
        assert_eq!(ErrorCode::INTERNAL_ERROR.0, -32603);
        assert_eq!(ErrorCode::OVERLOADED.0, -32000);
        assert_eq!(ErrorCode::UNKNOWN.0, -32001);
        assert_eq!(ErrorCode::RESOURCE_NOT_FOUND.0, -32002);
        assert_eq!(ErrorCode::CLIENT_CLOSING.0, -32003);
        assert_eq!(ErrorCode::SERVER_CLOSING.0, -32004);
    }

    #[test]
    fn test_logging_level_ordering() {
        use LoggingLevel::*;
        let ascending = [
            Debug, Info, Notice, Warning, Error, Critical, Alert, Emergency,
        ];
        for pair in ascending.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should be below {:?}", pair[0], pair[1]);
        }
        assert_eq!(
            serde_json::to_value(Warning).unwrap(),
            serde_json::json!("warning")
        );
    }

    #[test]
    fn test_protocol_version_ordering() {
        assert!(ProtocolVersion::V_2024_11_05 < ProtocolVersion::V_2025_03_26);
        assert!(ProtocolVersion::LATEST.is_supported());
        let decoded: ProtocolVersion = serde_json::from_value(json!("2024-11-05")).unwrap();
        assert!(decoded.is_supported());
        let unknown: ProtocolVersion = serde_json::from_value(json!("1999-01-01")).unwrap();
        assert!(!unknown.is_supported());
    }

    #[test]
    fn test_request_id_roundtrip() {
        let numeric: RequestId = serde_json::from_value(json!(4)).unwrap();
        assert_eq!(numeric, RequestId::Number(4));
        let string: RequestId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(string, RequestId::String("abc".into()));
        assert_eq!(serde_json::to_value(&numeric).unwrap(), json!(4));
    }
}
