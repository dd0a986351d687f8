use std::{sync::Arc, time::Duration};

use anyhow::Result;
use mcpkit::{
    ClientOptions, Server, ServerOptions, ServiceError,
    model::{
        ErrorCode, ErrorData, GetPromptRequestParam, GetPromptResult, Prompt, PromptArgument,
        PromptMessage, Role,
    },
};
use tokio::sync::mpsc;

mod common;
use common::basic_connection_with_options;

fn add_review_prompts(server: &Server) {
    server.add_prompt(
        Prompt::new("code_review")
            .with_description("do a code review")
            .with_arguments(vec![PromptArgument::required("Code")]),
        |_context, params| async move {
            let code = params
                .arguments
                .as_ref()
                .and_then(|arguments| arguments.get("Code"))
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(GetPromptResult {
                description: Some("Code review prompt".into()),
                messages: vec![PromptMessage::new_text(
                    Role::User,
                    format!("Please review the following code: {code}"),
                )],
            })
        },
    );
    server.add_prompt(Prompt::new("fail"), |_context, _params| async {
        Err(ErrorData::internal_error("mcp failure", None))
    });
}

#[tokio::test]
async fn test_prompt_list_and_get() -> Result<()> {
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    let changed_tx = Arc::new(changed_tx);
    let client_options = ClientOptions::new().on_prompt_list_changed({
        let changed_tx = changed_tx.clone();
        move |_peer| {
            let changed_tx = changed_tx.clone();
            async move {
                let _ = changed_tx.send(());
            }
        }
    });
    let (server, _ss, _client, cs) =
        basic_connection_with_options(ServerOptions::new(), client_options, add_review_prompts)
            .await;

    let prompts = cs.list_prompts(None).await?.prompts;
    let names: Vec<_> = prompts.iter().map(|prompt| prompt.name.clone()).collect();
    assert_eq!(names, vec!["code_review", "fail"]);
    assert_eq!(
        prompts[0].arguments.as_ref().unwrap()[0].required,
        Some(true)
    );

    let review = cs
        .get_prompt(GetPromptRequestParam {
            name: "code_review".into(),
            arguments: serde_json::json!({"Code": "1+1"}).as_object().cloned(),
        })
        .await?;
    assert_eq!(review.description.as_deref(), Some("Code review prompt"));
    assert_eq!(
        review.messages[0].content.as_text(),
        Some("Please review the following code: 1+1")
    );
    assert_eq!(review.messages[0].role, Role::User);

    server.add_prompt(Prompt::new("T"), |_context, _params| async {
        Ok(GetPromptResult::default())
    });
    tokio::time::timeout(Duration::from_secs(1), changed_rx.recv())
        .await
        .expect("prompt list-changed after add")
        .unwrap();
    server.remove_prompt("T");
    tokio::time::timeout(Duration::from_secs(1), changed_rx.recv())
        .await
        .expect("prompt list-changed after remove")
        .unwrap();

    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_prompt_handler_error_is_a_wire_error() -> Result<()> {
    let (_server, _ss, _client, cs) = basic_connection_with_options(
        ServerOptions::new(),
        ClientOptions::new(),
        add_review_prompts,
    )
    .await;

    // Unlike tools, prompt failures surface as JSON-RPC errors.
    let error = cs
        .get_prompt(GetPromptRequestParam {
            name: "fail".into(),
            arguments: None,
        })
        .await
        .unwrap_err();
    match error {
        ServiceError::McpError(data) => assert!(data.message.contains("mcp failure")),
        other => panic!("expected mcp error, got {other:?}"),
    }
    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_missing_required_argument_is_invalid_params() -> Result<()> {
    let (_server, _ss, _client, cs) = basic_connection_with_options(
        ServerOptions::new(),
        ClientOptions::new(),
        add_review_prompts,
    )
    .await;

    let error = cs
        .get_prompt(GetPromptRequestParam {
            name: "code_review".into(),
            arguments: None,
        })
        .await
        .unwrap_err();
    match error {
        ServiceError::McpError(data) => {
            assert_eq!(data.code, ErrorCode::INVALID_PARAMS);
            assert!(data.message.contains("Code"));
        }
        other => panic!("expected mcp error, got {other:?}"),
    }
    cs.close();
    Ok(())
}

#[tokio::test]
async fn test_unknown_prompt() -> Result<()> {
    let (_server, _ss, _client, cs) = basic_connection_with_options(
        ServerOptions::new(),
        ClientOptions::new(),
        add_review_prompts,
    )
    .await;

    let error = cs
        .get_prompt(GetPromptRequestParam {
            name: "nope".into(),
            arguments: None,
        })
        .await
        .unwrap_err();
    match error {
        ServiceError::McpError(data) => assert_eq!(data.code, ErrorCode::METHOD_NOT_FOUND),
        other => panic!("expected mcp error, got {other:?}"),
    }
    cs.close();
    Ok(())
}
