use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use mcpkit::{
    Client, ClientOptions, Server, ServerOptions,
    model::{CallToolRequestParam, Root},
    transport::{LoggingTransport, in_memory},
};
use serde_json::json;

mod common;
use common::{add_greet_tool, test_impl};

#[derive(Clone, Default)]
struct SafeBuffer(Arc<Mutex<Vec<u8>>>);

impl SafeBuffer {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SafeBuffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_no_json_null_on_the_wire() -> Result<()> {
    let (client_transport, server_transport) = in_memory();
    let sink = SafeBuffer::default();
    let logged = LoggingTransport::new(client_transport, sink.clone());

    let server = Server::new(test_impl(), ServerOptions::new());
    add_greet_tool(&server);
    let ss = server.connect(server_transport);

    let client = Client::new(test_impl(), ClientOptions::new());
    client.add_roots([Root {
        uri: "file:///workspace".into(),
        name: None,
    }]);
    let cs = client.connect(logged).await?;

    cs.ping().await?;
    cs.list_tools(None).await?;
    cs.list_prompts(None).await?;
    cs.list_resources(None).await?;
    cs.list_resource_templates(None).await?;
    cs.call_tool(CallToolRequestParam {
        name: "greet".into(),
        arguments: json!({"name": "user"}).as_object().cloned(),
    })
    .await?;
    ss.list_roots().await?;

    cs.close();
    cs.waiting().await;
    ss.waiting().await;

    let logs = sink.bytes();
    assert!(!logs.is_empty(), "logging transport captured nothing");
    if let Some(index) = logs.windows(4).position(|window| window == b"null") {
        let start = index.saturating_sub(40);
        let end = (index + 40).min(logs.len());
        panic!(
            "conformance violation: wire traffic contains a JSON null: ...{}...",
            String::from_utf8_lossy(&logs[start..end])
        );
    }
    Ok(())
}
