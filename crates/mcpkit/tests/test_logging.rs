use std::{sync::Arc, time::Duration};

use anyhow::Result;
use mcpkit::{
    ClientOptions, McpLoggingLayer, ServerOptions,
    model::{LoggingLevel, LoggingMessageNotificationParam, SetLevelRequestParam},
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;

mod common;
use common::basic_connection_with_options;

type Received = mpsc::UnboundedReceiver<LoggingMessageNotificationParam>;

async fn logging_connection() -> (
    mcpkit::Server,
    mcpkit::ServerSession,
    mcpkit::Client,
    mcpkit::ClientSession,
    Received,
) {
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    let log_tx = Arc::new(log_tx);
    let client_options = ClientOptions::new().on_logging_message({
        let log_tx = log_tx.clone();
        move |_peer, params| {
            let log_tx = log_tx.clone();
            async move {
                let _ = log_tx.send(params);
            }
        }
    });
    let (server, ss, client, cs) =
        basic_connection_with_options(ServerOptions::new(), client_options, |_server| {}).await;
    (server, ss, client, cs, log_rx)
}

async fn recv_log(log_rx: &mut Received) -> LoggingMessageNotificationParam {
    tokio::time::timeout(Duration::from_secs(1), log_rx.recv())
        .await
        .expect("log message")
        .unwrap()
}

#[tokio::test]
async fn test_direct_logging_is_level_gated() -> Result<()> {
    let (_server, ss, _client, cs, mut log_rx) = logging_connection().await;

    // Nothing may be logged until the client sets a level.
    ss.log(LoggingMessageNotificationParam {
        level: LoggingLevel::Info,
        logger: Some("test".into()),
        data: json!("before"),
    })
    .await?;

    cs.set_level(SetLevelRequestParam {
        level: LoggingLevel::Warning,
    })
    .await?;

    ss.log(LoggingMessageNotificationParam {
        level: LoggingLevel::Warning,
        logger: Some("test".into()),
        data: json!({"msg": "first", "name": "Pat"}),
    })
    .await?;
    // Below the level.
    ss.log(LoggingMessageNotificationParam {
        level: LoggingLevel::Debug,
        logger: Some("test".into()),
        data: json!("nope"),
    })
    .await?;
    ss.log(LoggingMessageNotificationParam {
        level: LoggingLevel::Info,
        logger: Some("test".into()),
        data: json!("negative"),
    })
    .await?;
    ss.log(LoggingMessageNotificationParam {
        level: LoggingLevel::Alert,
        logger: Some("test".into()),
        data: json!({"msg": "second", "count": 2}),
    })
    .await?;

    let first = recv_log(&mut log_rx).await;
    assert_eq!(first.level, LoggingLevel::Warning);
    assert_eq!(first.logger.as_deref(), Some("test"));
    assert_eq!(first.data["msg"], "first");
    assert_eq!(first.data["name"], "Pat");

    let second = recv_log(&mut log_rx).await;
    assert_eq!(second.level, LoggingLevel::Alert);
    assert_eq!(second.data["msg"], "second");
    assert_eq!(second.data["count"], 2);

    assert!(
        tokio::time::timeout(Duration::from_millis(200), log_rx.recv())
            .await
            .is_err(),
        "below-threshold messages must be dropped silently"
    );

    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_tracing_layer_forwards_events() -> Result<()> {
    let (_server, ss, _client, cs, mut log_rx) = logging_connection().await;

    cs.set_level(SetLevelRequestParam {
        level: LoggingLevel::Warning,
    })
    .await?;

    let layer = McpLoggingLayer::new(&ss).with_logger("test");
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, || {
        tracing::warn!(name = "Pat", logtest = true, "first");
        tracing::debug!("nope");
        tracing::info!("negative");
    });

    let forwarded = recv_log(&mut log_rx).await;
    assert_eq!(forwarded.level, LoggingLevel::Warning);
    assert_eq!(forwarded.logger.as_deref(), Some("test"));
    let data = forwarded.data.as_object().expect("data object");
    assert_eq!(data["message"], "first");
    assert_eq!(data["name"], "Pat");
    assert_eq!(data["logtest"], true);
    // A time field may be present; its value is not asserted.

    assert!(
        tokio::time::timeout(Duration::from_millis(200), log_rx.recv())
            .await
            .is_err(),
        "below-threshold events must not be forwarded"
    );

    cs.close();
    Ok(())
}
