use std::time::Duration;

use anyhow::Result;
use mcpkit::{ClientOptions, ServerOptions, ServiceError, model::CallToolRequestParam};
use serde_json::json;

mod common;
use common::{add_greet_tool, basic_connection_with_options};

#[tokio::test]
async fn test_connection_survives_keepalive_cycles() -> Result<()> {
    let server_options = ServerOptions::new().keep_alive(Duration::from_millis(100));
    let client_options = ClientOptions::new().keep_alive(Duration::from_millis(100));
    let (_server, _ss, _client, cs) =
        basic_connection_with_options(server_options, client_options, add_greet_tool).await;

    // Let several keepalive cycles pass on both sides.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let result = cs
        .call_tool(CallToolRequestParam {
            name: "greet".into(),
            arguments: json!({"name": "user"}).as_object().cloned(),
        })
        .await?;
    assert_eq!(result.content[0].as_text(), Some("hi user"));

    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_keepalive_detects_dead_peer() -> Result<()> {
    // Server without keepalive, client with a short one.
    let client_options = ClientOptions::new().keep_alive(Duration::from_millis(50));
    let (_server, ss, _client, cs) =
        basic_connection_with_options(ServerOptions::new(), client_options, add_greet_tool).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    ss.close();

    // Within a second the client must start failing calls with
    // connection-closed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let result = cs
            .call_tool(CallToolRequestParam {
                name: "greet".into(),
                arguments: json!({"name": "user"}).as_object().cloned(),
            })
            .await;
        match result {
            Err(ServiceError::ConnectionClosed) => break,
            _ if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            other => panic!("expected connection-closed, last result: {other:?}"),
        }
    }
    Ok(())
}
