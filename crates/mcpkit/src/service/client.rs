use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::model::{
    CallToolRequest, CallToolRequestParam, CallToolResult, CancelledNotification,
    CancelledNotificationParam, ClientInfo, ClientNotification, ClientRequest, ClientResult,
    CompleteRequest, CompleteRequestParam, CompleteResult, GetPromptRequest,
    GetPromptRequestParam, GetPromptResult, InitializeRequest, InitializedNotification,
    ListPromptsRequest, ListPromptsResult, ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, PaginatedRequestParam, PingRequest, Prompt, ProgressNotification,
    ProgressNotificationParam, ProtocolVersion, ReadResourceRequest, ReadResourceRequestParam,
    ReadResourceResult, Resource, ResourceTemplate, RootsListChangedNotification, ServerInfo,
    ServerNotification, ServerRequest, ServerResult, SetLevelRequest, SetLevelRequestParam,
    SubscribeRequest, SubscribeRequestParam, Tool, UnsubscribeRequest, UnsubscribeRequestParam,
};

/// The application-embedding side of the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleClient;

impl ServiceRole for RoleClient {
    type Req = ClientRequest;
    type Resp = ClientResult;
    type Not = ClientNotification;
    type PeerReq = ServerRequest;
    type PeerResp = ServerResult;
    type PeerNot = ServerNotification;
    type Info = ClientInfo;
    type PeerInfo = ServerInfo;

    const IS_CLIENT: bool = true;

    fn ping_request() -> ClientRequest {
        ClientRequest::PingRequest(PingRequest {
            method: Default::default(),
        })
    }

    fn cancelled_notification(param: CancelledNotificationParam) -> ClientNotification {
        ClientNotification::CancelledNotification(CancelledNotification::new(param))
    }

    fn as_cancelled(notification: &ServerNotification) -> Option<&CancelledNotificationParam> {
        match notification {
            ServerNotification::CancelledNotification(notification) => {
                Some(&notification.params)
            }
            _ => None,
        }
    }
}

impl UnitResponse for ClientResult {
    fn unit() -> Self {
        ClientResult::empty()
    }
}

/// Errors that may occur while establishing a client session.
#[derive(Error, Debug)]
pub enum ClientInitializeError {
    #[error("expected initialize result, but received: {0:?}")]
    ExpectedInitResult(Box<ServerResult>),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(ProtocolVersion),

    #[error("initialization failed: {0}")]
    Service(#[from] ServiceError),
}

macro_rules! method {
    (peer_req $method:ident $Req:ident($Param:ident) => $Resp:ident) => {
        pub async fn $method(&self, params: $Param) -> Result<$Resp, ServiceError> {
            let result = self
                .send_request(ClientRequest::$Req($Req {
                    method: Default::default(),
                    params,
                }))
                .await?;
            match result {
                ServerResult::$Resp(result) => Ok(result),
                _ => Err(ServiceError::UnexpectedResponse),
            }
        }
    };
    (peer_req $method:ident $Req:ident($Param:ident)? => $Resp:ident) => {
        pub async fn $method(&self, params: Option<$Param>) -> Result<$Resp, ServiceError> {
            let result = self
                .send_request(ClientRequest::$Req($Req {
                    method: Default::default(),
                    params,
                }))
                .await?;
            match result {
                ServerResult::$Resp(result) => Ok(result),
                _ => Err(ServiceError::UnexpectedResponse),
            }
        }
    };
    (peer_req $method:ident $Req:ident($Param:ident)) => {
        pub async fn $method(&self, params: $Param) -> Result<(), ServiceError> {
            let result = self
                .send_request(ClientRequest::$Req($Req {
                    method: Default::default(),
                    params,
                }))
                .await?;
            match result {
                ServerResult::EmptyResult(_) => Ok(()),
                _ => Err(ServiceError::UnexpectedResponse),
            }
        }
    };
    (peer_not $method:ident $Not:ident($Param:ident)) => {
        pub async fn $method(&self, params: $Param) -> Result<(), ServiceError> {
            self.send_notification(ClientNotification::$Not($Not {
                method: Default::default(),
                params,
            }))
            .await
        }
    };
    (peer_not $method:ident $Not:ident) => {
        pub async fn $method(&self) -> Result<(), ServiceError> {
            self.send_notification(ClientNotification::$Not($Not {
                method: Default::default(),
            }))
            .await
        }
    };
}

impl Peer<RoleClient> {
    method!(peer_req complete CompleteRequest(CompleteRequestParam) => CompleteResult);
    method!(peer_req set_level SetLevelRequest(SetLevelRequestParam));
    method!(peer_req get_prompt GetPromptRequest(GetPromptRequestParam) => GetPromptResult);
    method!(peer_req list_prompts ListPromptsRequest(PaginatedRequestParam)? => ListPromptsResult);
    method!(peer_req list_resources ListResourcesRequest(PaginatedRequestParam)? => ListResourcesResult);
    method!(peer_req list_resource_templates ListResourceTemplatesRequest(PaginatedRequestParam)? => ListResourceTemplatesResult);
    method!(peer_req read_resource ReadResourceRequest(ReadResourceRequestParam) => ReadResourceResult);
    method!(peer_req subscribe SubscribeRequest(SubscribeRequestParam));
    method!(peer_req unsubscribe UnsubscribeRequest(UnsubscribeRequestParam));
    method!(peer_req call_tool CallToolRequest(CallToolRequestParam) => CallToolResult);
    method!(peer_req list_tools ListToolsRequest(PaginatedRequestParam)? => ListToolsResult);

    method!(peer_not notify_cancelled CancelledNotification(CancelledNotificationParam));
    method!(peer_not notify_progress ProgressNotification(ProgressNotificationParam));
    method!(peer_not notify_initialized InitializedNotification);
    method!(peer_not notify_roots_list_changed RootsListChangedNotification);

    pub async fn ping(&self) -> Result<(), ServiceError> {
        let result = self
            .send_request(ClientRequest::PingRequest(PingRequest {
                method: Default::default(),
            }))
            .await?;
        match result {
            ServerResult::EmptyResult(_) => Ok(()),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    /// Like [`Peer::call_tool`], but the call can be abandoned through `ct`:
    /// the peer is told to cancel and the caller gets
    /// [`ServiceError::Cancelled`].
    pub async fn call_tool_with_ct(
        &self,
        params: CallToolRequestParam,
        ct: CancellationToken,
    ) -> Result<CallToolResult, ServiceError> {
        let result = self
            .send_request_with_ct(
                ClientRequest::CallToolRequest(CallToolRequest {
                    method: Default::default(),
                    params,
                }),
                ct,
            )
            .await?;
        match result {
            ServerResult::CallToolResult(result) => Ok(result),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }

    pub(crate) async fn initialize(
        &self,
        params: ClientInfo,
    ) -> Result<ServerInfo, ClientInitializeError> {
        let result = self
            .send_request(ClientRequest::InitializeRequest(InitializeRequest {
                method: Default::default(),
                params,
            }))
            .await?;
        let ServerResult::InitializeResult(result) = result else {
            return Err(ClientInitializeError::ExpectedInitResult(Box::new(result)));
        };
        if !result.protocol_version.is_supported() {
            return Err(ClientInitializeError::UnsupportedProtocolVersion(
                result.protocol_version,
            ));
        }
        Ok(result)
    }
}

impl Peer<RoleClient> {
    /// Call [`Peer::list_tools`] repeatedly until every page is drained.
    pub async fn list_all_tools(&self) -> Result<Vec<Tool>, ServiceError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let result = self
                .list_tools(Some(PaginatedRequestParam { cursor }))
                .await?;
            tools.extend(result.tools);
            cursor = result.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }

    /// Call [`Peer::list_prompts`] repeatedly until every page is drained.
    pub async fn list_all_prompts(&self) -> Result<Vec<Prompt>, ServiceError> {
        let mut prompts = Vec::new();
        let mut cursor = None;
        loop {
            let result = self
                .list_prompts(Some(PaginatedRequestParam { cursor }))
                .await?;
            prompts.extend(result.prompts);
            cursor = result.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(prompts)
    }

    /// Call [`Peer::list_resources`] repeatedly until every page is drained.
    pub async fn list_all_resources(&self) -> Result<Vec<Resource>, ServiceError> {
        let mut resources = Vec::new();
        let mut cursor = None;
        loop {
            let result = self
                .list_resources(Some(PaginatedRequestParam { cursor }))
                .await?;
            resources.extend(result.resources);
            cursor = result.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(resources)
    }

    /// Call [`Peer::list_resource_templates`] repeatedly until every page is
    /// drained.
    pub async fn list_all_resource_templates(
        &self,
    ) -> Result<Vec<ResourceTemplate>, ServiceError> {
        let mut templates = Vec::new();
        let mut cursor = None;
        loop {
            let result = self
                .list_resource_templates(Some(PaginatedRequestParam { cursor }))
                .await?;
            templates.extend(result.resource_templates);
            cursor = result.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(templates)
    }
}
