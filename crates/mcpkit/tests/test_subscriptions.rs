use std::{sync::Arc, time::Duration};

use anyhow::Result;
use mcpkit::{
    ClientOptions, ServerOptions,
    model::{SubscribeRequestParam, UnsubscribeRequestParam},
};
use tokio::sync::mpsc;

mod common;
use common::basic_connection_with_options;

#[tokio::test]
async fn test_subscribe_update_unsubscribe() -> Result<()> {
    let (updated_tx, mut updated_rx) = mpsc::unbounded_channel();
    let updated_tx = Arc::new(updated_tx);
    let (subscribe_tx, mut subscribe_rx) = mpsc::unbounded_channel();
    let subscribe_tx = Arc::new(subscribe_tx);
    let (unsubscribe_tx, mut unsubscribe_rx) = mpsc::unbounded_channel();
    let unsubscribe_tx = Arc::new(unsubscribe_tx);

    let server_options = ServerOptions::new()
        .on_subscribe({
            let subscribe_tx = subscribe_tx.clone();
            move |params: SubscribeRequestParam| {
                let subscribe_tx = subscribe_tx.clone();
                async move {
                    let _ = subscribe_tx.send(params.uri);
                    Ok(())
                }
            }
        })
        .on_unsubscribe({
            let unsubscribe_tx = unsubscribe_tx.clone();
            move |params: UnsubscribeRequestParam| {
                let unsubscribe_tx = unsubscribe_tx.clone();
                async move {
                    let _ = unsubscribe_tx.send(params.uri);
                    Ok(())
                }
            }
        });
    let client_options = ClientOptions::new().on_resource_updated({
        let updated_tx = updated_tx.clone();
        move |_peer, params| {
            let updated_tx = updated_tx.clone();
            async move {
                let _ = updated_tx.send(params.uri);
            }
        }
    });

    let (server, _ss, _client, cs) =
        basic_connection_with_options(server_options, client_options, |_server| {}).await;

    cs.subscribe(SubscribeRequestParam { uri: "test".into() })
        .await?;
    let audited = tokio::time::timeout(Duration::from_secs(1), subscribe_rx.recv())
        .await
        .expect("subscribe handler called")
        .unwrap();
    assert_eq!(audited, "test");

    server.resource_updated("test").await;
    let updated = tokio::time::timeout(Duration::from_secs(1), updated_rx.recv())
        .await
        .expect("resource updated notification")
        .unwrap();
    assert_eq!(updated, "test");

    cs.unsubscribe(UnsubscribeRequestParam { uri: "test".into() })
        .await?;
    tokio::time::timeout(Duration::from_secs(1), unsubscribe_rx.recv())
        .await
        .expect("unsubscribe handler called")
        .unwrap();

    // After unsubscribing, updates for that uri must not reach the session.
    server.resource_updated("test").await;
    assert!(
        tokio::time::timeout(Duration::from_millis(500), updated_rx.recv())
            .await
            .is_err(),
        "resource updated after unsubscription"
    );

    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_subscribe_handler_can_reject() -> Result<()> {
    let server_options = ServerOptions::new().on_subscribe(|params: SubscribeRequestParam| async move {
        Err(mcpkit::model::ErrorData::invalid_params(
            format!("subscriptions to {} are not allowed", params.uri),
            None,
        ))
    });
    let (server, _ss, _client, cs) =
        basic_connection_with_options(server_options, ClientOptions::new(), |_server| {}).await;

    assert!(
        cs.subscribe(SubscribeRequestParam {
            uri: "forbidden".into()
        })
        .await
        .is_err()
    );
    // The rejected subscription must not have been recorded.
    server.resource_updated("forbidden").await;
    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_update_without_subscribers_is_a_no_op() -> Result<()> {
    let (server, _ss, _client, cs) =
        basic_connection_with_options(ServerOptions::new(), ClientOptions::new(), |_server| {})
            .await;
    server.resource_updated("nobody-listens").await;
    cs.close();
    Ok(())
}
