use std::{sync::Arc, time::Duration};

use anyhow::Result;
use mcpkit::{
    Client, ClientOptions, ServerOptions, ServiceError,
    model::{
        Content, CreateMessageRequestParam, CreateMessageResult, ErrorCode,
        ProgressNotificationParam, Root,
    },
};
use tokio::sync::mpsc;

mod common;
use common::{basic_connection_with_options, test_impl};

#[tokio::test]
async fn test_roots_listing_and_change_notification() -> Result<()> {
    let (roots_tx, mut roots_rx) = mpsc::unbounded_channel();
    let roots_tx = Arc::new(roots_tx);
    let server_options = ServerOptions::new().on_roots_list_changed({
        let roots_tx = roots_tx.clone();
        move |_peer| {
            let roots_tx = roots_tx.clone();
            async move {
                let _ = roots_tx.send(());
            }
        }
    });

    let (client_transport, server_transport) = mcpkit::transport::in_memory();
    let server = mcpkit::Server::new(test_impl(), server_options);
    let ss = server.connect(server_transport);

    let client = Client::new(test_impl(), ClientOptions::new());
    client.add_roots([Root {
        uri: "file:///workspace".into(),
        name: Some("workspace".into()),
    }]);
    let cs = client.connect(client_transport).await?;

    let roots = ss.list_roots().await?.roots;
    assert_eq!(roots, client.roots());
    assert_eq!(roots[0].uri, "file:///workspace");

    client.add_roots([Root {
        uri: "file:///extra".into(),
        name: None,
    }]);
    tokio::time::timeout(Duration::from_secs(1), roots_rx.recv())
        .await
        .expect("roots list-changed after add")
        .unwrap();

    client.remove_root("file:///extra");
    tokio::time::timeout(Duration::from_secs(1), roots_rx.recv())
        .await
        .expect("roots list-changed after remove")
        .unwrap();

    assert_eq!(ss.list_roots().await?.roots.len(), 1);
    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_sampling_round_trip() -> Result<()> {
    let client_options = ClientOptions::new().on_create_message(|_peer, _params| async {
        Ok(CreateMessageResult {
            role: Default::default(),
            content: Content::text(""),
            model: "aModel".into(),
            stop_reason: None,
        })
    });
    let (_server, ss, _client, cs) =
        basic_connection_with_options(ServerOptions::new(), client_options, |_server| {}).await;

    let result = ss
        .create_message(CreateMessageRequestParam::default())
        .await?;
    assert_eq!(result.model, "aModel");

    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_sampling_without_handler_is_rejected() -> Result<()> {
    let (_server, ss, _client, cs) =
        basic_connection_with_options(ServerOptions::new(), ClientOptions::new(), |_server| {})
            .await;

    let error = ss
        .create_message(CreateMessageRequestParam::default())
        .await
        .unwrap_err();
    match error {
        ServiceError::McpError(data) => assert_eq!(data.code, ErrorCode::METHOD_NOT_FOUND),
        other => panic!("expected mcp error, got {other:?}"),
    }
    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_progress_flows_both_ways() -> Result<()> {
    let (server_progress_tx, mut server_progress_rx) = mpsc::unbounded_channel();
    let server_progress_tx = Arc::new(server_progress_tx);
    let (client_progress_tx, mut client_progress_rx) = mpsc::unbounded_channel();
    let client_progress_tx = Arc::new(client_progress_tx);

    let server_options = ServerOptions::new().on_progress({
        let server_progress_tx = server_progress_tx.clone();
        move |_peer, params| {
            let server_progress_tx = server_progress_tx.clone();
            async move {
                let _ = server_progress_tx.send(params);
            }
        }
    });
    let client_options = ClientOptions::new().on_progress({
        let client_progress_tx = client_progress_tx.clone();
        move |_peer, params| {
            let client_progress_tx = client_progress_tx.clone();
            async move {
                let _ = client_progress_tx.send(params);
            }
        }
    });
    let (_server, ss, _client, cs) =
        basic_connection_with_options(server_options, client_options, |_server| {}).await;

    ss.notify_progress(ProgressNotificationParam {
        progress_token: "token-xyz".to_string().into(),
        progress: 0.5,
        total: Some(2.0),
        message: Some("progress update".into()),
    })
    .await?;
    let at_client = tokio::time::timeout(Duration::from_secs(1), client_progress_rx.recv())
        .await
        .expect("client progress")
        .unwrap();
    assert_eq!(at_client.progress, 0.5);

    cs.notify_progress(ProgressNotificationParam {
        progress_token: "token-abc".to_string().into(),
        progress: 1.0,
        total: Some(2.0),
        message: Some("progress update".into()),
    })
    .await?;
    let at_server = tokio::time::timeout(Duration::from_secs(1), server_progress_rx.recv())
        .await
        .expect("server progress")
        .unwrap();
    assert_eq!(at_server.progress, 1.0);

    cs.close();
    Ok(())
}
