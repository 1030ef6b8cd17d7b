//! Control and direct terminal channels against a real server

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use web_terminal::socket::CALLBACK_TYPE;
use web_terminal::terminal::{TerminalDefaults, TerminalManager};
use web_terminal::{AppState, router};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    manager: Arc<TerminalManager>,
    _workspace: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let workspace = TempDir::new().unwrap();
        let manager = Arc::new(TerminalManager::new(TerminalDefaults {
            shell: "sh".to_string(),
            workspace_root: workspace.path().to_path_buf(),
            ..Default::default()
        }));
        let app = router(AppState::new(manager.clone(), Duration::from_secs(60)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            manager,
            _workspace: workspace,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        ws
    }

    /// Control connection with the hello list already consumed
    async fn control(&self) -> Client {
        let mut ws = self.connect("/terminal/control").await;
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "list");
        ws
    }
}

async fn send(ws: &mut Client, msg: Value) {
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read raw output until `done` holds for everything received so far
async fn read_until(ws: &mut Client, seen: &mut String, done: impl Fn(&str) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done(seen) {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => seen.push_str(&text),
                Some(Ok(_)) => {}
                other => panic!("direct channel ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for terminal output");
}

#[tokio::test]
async fn hello_is_an_uncorrelated_list() {
    let server = TestServer::start().await;
    let mut ws = server.connect("/terminal/control").await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello, json!({"type": "list", "data": []}));
    assert!(hello.get("callbackId").is_none());
}

#[tokio::test]
async fn create_size_destroy_round_trip() {
    let server = TestServer::start().await;
    let mut ws = server.control().await;

    send(&mut ws, json!({"type": "create", "cols": 81, "rows": 25, "callbackId": 1})).await;
    let list = next_json(&mut ws).await;
    assert_eq!(list["type"], "list");
    let entries = list["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    let record = entries[0].clone();
    assert_eq!(record["cols"], 81);
    assert_eq!(record["rows"], 25);
    assert_eq!(record["mode"], "RW");
    assert!(record["pid"].as_u64().unwrap() > 0);
    let id = record["id"].as_str().unwrap().to_string();

    let callback = next_json(&mut ws).await;
    assert_eq!(
        callback,
        json!({"type": CALLBACK_TYPE, "responseTo": "create", "callbackId": 1, "args": [null, record]})
    );

    send(&mut ws, json!({"type": "size", "id": id, "cols": 100, "rows": 40, "callbackId": 2})).await;
    let list = next_json(&mut ws).await;
    assert_eq!(list["data"][0]["cols"], 100);
    assert_eq!(list["data"][0]["rows"], 40);
    let callback = next_json(&mut ws).await;
    assert_eq!(callback["args"], json!([null, {"id": id, "cols": 100, "rows": 40}]));

    send(&mut ws, json!({"type": "destroy", "id": id, "callbackId": 3})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "list", "data": []}));
    let callback = next_json(&mut ws).await;
    assert_eq!(callback["args"], json!([null, {"id": id}]));

    send(&mut ws, json!({"type": "list", "callbackId": 4})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "list", "data": []}));
    assert_eq!(next_json(&mut ws).await["args"], json!([null, []]));
}

#[tokio::test]
async fn destroy_unknown_answers_404_without_broadcast() {
    let server = TestServer::start().await;
    let mut ws = server.control().await;

    send(&mut ws, json!({"type": "destroy", "id": "nonexistent", "callbackId": 9})).await;
    let callback = next_json(&mut ws).await;
    assert_eq!(callback["type"], CALLBACK_TYPE);
    assert_eq!(callback["args"], json!([{"code": 404}]));
    assert!(server.manager.list().await.is_empty());
}

#[tokio::test]
async fn unknown_command_fails_closed() {
    let server = TestServer::start().await;
    let mut ws = server.control().await;

    send(&mut ws, json!({"type": "constructor", "callbackId": 1})).await;
    let callback = next_json(&mut ws).await;
    assert_eq!(callback["responseTo"], "constructor");
    assert_eq!(callback["args"][0]["code"], 400);
}

#[tokio::test]
async fn rename_is_broadcast_to_every_control_client() {
    let server = TestServer::start().await;
    let mut first = server.control().await;
    let mut second = server.control().await;
    // The second client's hello is broadcast to the first as well
    assert_eq!(next_json(&mut first).await, json!({"type": "list", "data": []}));

    send(&mut first, json!({"type": "create", "id": "a", "callbackId": 1})).await;
    assert_eq!(next_json(&mut first).await["type"], "list");
    assert_eq!(next_json(&mut first).await["callbackId"], 1);
    assert_eq!(next_json(&mut second).await["data"][0]["id"], "a");

    send(&mut first, json!({"type": "rename", "id": "a", "title": "build", "callbackId": 2})).await;
    let event = json!({"type": "rename", "data": {"id": "a", "title": "build"}});
    assert_eq!(next_json(&mut first).await, event);
    assert_eq!(next_json(&mut first).await["args"], json!([null, {"id": "a", "title": "build"}]));
    assert_eq!(next_json(&mut second).await, event);

    server.manager.shutdown().await;
}

#[tokio::test]
async fn set_keeps_survivors_and_kills_the_rest() {
    let server = TestServer::start().await;
    let mut ws = server.control().await;

    send(&mut ws, json!({"type": "set", "terminals": [{"id": "a"}, {"id": "b"}], "callbackId": 1})).await;
    let first = next_json(&mut ws).await;
    assert_eq!(first["data"].as_array().unwrap().len(), 2);
    let pid_b = first["data"][1]["pid"].clone();
    let callback = next_json(&mut ws).await;
    assert_eq!(callback["args"][1], first["data"]);

    send(&mut ws, json!({"type": "set", "terminals": [{"id": "b"}], "callbackId": 2})).await;
    let second = next_json(&mut ws).await;
    let data = second["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "b");
    assert_eq!(data[0]["pid"], pid_b);
    next_json(&mut ws).await;

    server.manager.shutdown().await;
}

#[tokio::test]
async fn direct_connect_to_unknown_terminal_is_closed_with_404() {
    let server = TestServer::start().await;
    let mut ws = server.connect("/terminal/connect/nope").await;

    let frame = loop {
        match tokio::time::timeout(WAIT, ws.next()).await.expect("no close frame") {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    let frame = frame.expect("close frame without reason");
    let reason: Value = serde_json::from_str(&frame.reason).unwrap();
    assert_eq!(reason, json!({"code": 404}));
    assert_eq!(u16::from(frame.code), 4404);
}

#[tokio::test]
async fn direct_viewers_share_io_and_replay_history() {
    let server = TestServer::start().await;
    let mut control = server.control().await;
    send(
        &mut control,
        json!({
            "type": "create",
            "id": "t",
            "args": ["-c", "printf 'ready\\n'; exec cat"],
            "callbackId": 1
        }),
    )
    .await;
    next_json(&mut control).await;
    assert_eq!(next_json(&mut control).await["args"][0], Value::Null);

    let mut first = server.connect("/terminal/connect/t").await;
    let mut first_seen = String::new();
    read_until(&mut first, &mut first_seen, |s| s.contains("ready\r\n")).await;

    // Input is written to the process; the pty echoes it and cat repeats it
    first.send(Message::Text("hello\n".to_string().into())).await.unwrap();
    read_until(&mut first, &mut first_seen, |s| s.matches("hello\r\n").count() >= 2).await;

    let mut second = server.connect("/terminal/connect/t").await;
    let mut second_seen = String::new();
    let expected_len = first_seen.len();
    read_until(&mut second, &mut second_seen, |s| s.len() >= expected_len).await;
    assert_eq!(second_seen, first_seen);

    // A viewer leaving never ends the terminal
    second.close(None).await.unwrap();
    drop(second);
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let terminals = server.manager.list().await;
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].id, "t");

    server.manager.shutdown().await;
}
