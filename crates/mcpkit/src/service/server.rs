use super::*;
use crate::model::{
    CancelledNotification, CancelledNotificationParam, ClientInfo, ClientNotification,
    ClientRequest, ClientResult, CreateMessageRequest, CreateMessageRequestParam,
    CreateMessageResult, ListRootsRequest, ListRootsResult, LoggingMessageNotification,
    LoggingMessageNotificationParam, PingRequest, ProgressNotification,
    ProgressNotificationParam, PromptListChangedNotification, ResourceListChangedNotification,
    ResourceUpdatedNotification, ResourceUpdatedNotificationParam, ServerInfo,
    ServerNotification, ServerRequest, ServerResult, ToolListChangedNotification,
};

/// The capability-providing side of the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleServer;

impl ServiceRole for RoleServer {
    type Req = ServerRequest;
    type Resp = ServerResult;
    type Not = ServerNotification;
    type PeerReq = ClientRequest;
    type PeerResp = ClientResult;
    type PeerNot = ClientNotification;
    type Info = ServerInfo;
    type PeerInfo = ClientInfo;

    const IS_CLIENT: bool = false;

    fn ping_request() -> ServerRequest {
        ServerRequest::PingRequest(PingRequest {
            method: Default::default(),
        })
    }

    fn cancelled_notification(param: CancelledNotificationParam) -> ServerNotification {
        ServerNotification::CancelledNotification(CancelledNotification::new(param))
    }

    fn as_cancelled(notification: &ClientNotification) -> Option<&CancelledNotificationParam> {
        match notification {
            ClientNotification::CancelledNotification(notification) => {
                Some(&notification.params)
            }
            _ => None,
        }
    }
}

impl UnitResponse for ServerResult {
    fn unit() -> Self {
        ServerResult::empty()
    }
}

macro_rules! method {
    (peer_req $method:ident $Req:ident() => $Resp:ident) => {
        pub async fn $method(&self) -> Result<$Resp, ServiceError> {
            let result = self
                .send_request(ServerRequest::$Req($Req {
                    method: Default::default(),
                }))
                .await?;
            match result {
                ClientResult::$Resp(result) => Ok(result),
                _ => Err(ServiceError::UnexpectedResponse),
            }
        }
    };
    (peer_req $method:ident $Req:ident($Param:ident) => $Resp:ident) => {
        pub async fn $method(&self, params: $Param) -> Result<$Resp, ServiceError> {
            let result = self
                .send_request(ServerRequest::$Req($Req {
                    method: Default::default(),
                    params,
                }))
                .await?;
            match result {
                ClientResult::$Resp(result) => Ok(result),
                _ => Err(ServiceError::UnexpectedResponse),
            }
        }
    };
    (peer_not $method:ident $Not:ident($Param:ident)) => {
        pub async fn $method(&self, params: $Param) -> Result<(), ServiceError> {
            self.send_notification(ServerNotification::$Not($Not {
                method: Default::default(),
                params,
            }))
            .await
        }
    };
    (peer_not $method:ident $Not:ident) => {
        pub async fn $method(&self) -> Result<(), ServiceError> {
            self.send_notification(ServerNotification::$Not($Not {
                method: Default::default(),
            }))
            .await
        }
    };
}

impl Peer<RoleServer> {
    method!(peer_req create_message CreateMessageRequest(CreateMessageRequestParam) => CreateMessageResult);
    method!(peer_req list_roots ListRootsRequest() => ListRootsResult);

    method!(peer_not notify_cancelled CancelledNotification(CancelledNotificationParam));
    method!(peer_not notify_progress ProgressNotification(ProgressNotificationParam));
    method!(peer_not notify_logging_message LoggingMessageNotification(LoggingMessageNotificationParam));
    method!(peer_not notify_resource_updated ResourceUpdatedNotification(ResourceUpdatedNotificationParam));
    method!(peer_not notify_resource_list_changed ResourceListChangedNotification);
    method!(peer_not notify_tool_list_changed ToolListChangedNotification);
    method!(peer_not notify_prompt_list_changed PromptListChangedNotification);

    pub async fn ping(&self) -> Result<(), ServiceError> {
        let result = self
            .send_request(ServerRequest::PingRequest(PingRequest {
                method: Default::default(),
            }))
            .await?;
        match result {
            ClientResult::EmptyResult(_) => Ok(()),
            _ => Err(ServiceError::UnexpectedResponse),
        }
    }
}
