#![allow(dead_code)]

use mcpkit::{
    Client, ClientOptions, Server, ServerOptions,
    model::{CallToolResult, Content, ErrorData, Implementation, Tool},
};

pub fn test_impl() -> Implementation {
    Implementation::new("test", "v1.0.0")
}

/// A tool that pings the caller back before answering, exercising
/// reverse-direction calls from inside a handler.
#[derive(serde::Deserialize, schemars::JsonSchema)]
pub struct GreetArgs {
    pub name: String,
}

pub fn add_greet_tool(server: &Server) {
    server.add_tool_typed(
        Tool::new("greet", "say hi"),
        |context, args: GreetArgs| async move {
            context
                .peer
                .ping()
                .await
                .map_err(|error| ErrorData::internal_error(format!("ping failed: {error}"), None))?;
            Ok(CallToolResult::success(vec![Content::text(format!(
                "hi {}",
                args.name
            ))]))
        },
    );
}

/// A connected client/server pair over an in-memory transport, with the
/// server configured by the caller before the handshake runs.
pub async fn basic_connection(
    configure: impl FnOnce(&Server),
) -> (Server, mcpkit::ServerSession, Client, mcpkit::ClientSession) {
    basic_connection_with_options(ServerOptions::new(), ClientOptions::new(), configure).await
}

pub async fn basic_connection_with_options(
    server_options: ServerOptions,
    client_options: ClientOptions,
    configure: impl FnOnce(&Server),
) -> (Server, mcpkit::ServerSession, Client, mcpkit::ClientSession) {
    let (client_transport, server_transport) = mcpkit::transport::in_memory();
    let server = Server::new(test_impl(), server_options);
    configure(&server);
    let server_session = server.connect(server_transport);
    let client = Client::new(test_impl(), client_options);
    let client_session = client
        .connect(client_transport)
        .await
        .expect("client connect");
    (server, server_session, client, client_session)
}
