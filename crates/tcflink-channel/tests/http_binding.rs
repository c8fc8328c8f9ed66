use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tcflink_channel::{
    Channel, ChannelConfig, ChannelError, ChannelState, DispatchCore, HttpConfig, HttpTransport,
};
use tcflink_codec::{decode_args, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    session: Option<String>,
}

/// Minimal HTTP agent: one request per connection, `Connection: close`.
struct Stub {
    port: u16,
    requests: Arc<Mutex<Vec<Recorded>>>,
    sse: mpsc::UnboundedSender<String>,
}

type SseFeed = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>;

async fn start_stub() -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (sse_tx, sse_rx) = mpsc::unbounded_channel();
    let feed: SseFeed = Arc::new(tokio::sync::Mutex::new(sse_rx));

    let recorded = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve(stream, Arc::clone(&recorded), Arc::clone(&feed)));
        }
    });

    Stub {
        port,
        requests,
        sse: sse_tx,
    }
}

async fn serve(mut stream: TcpStream, requests: Arc<Mutex<Vec<Recorded>>>, feed: SseFeed) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&head).to_string();
    let mut lines = head.lines();
    let target = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    let session = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("x-session-id")
            .then(|| value.trim().to_string())
    });
    requests.lock().unwrap().push(Recorded {
        path: target.clone(),
        session,
    });

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.clone(), None),
    };

    if path == "/tcf/sse" {
        let _ = stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n")
            .await;
        let mut feed = feed.lock().await;
        while let Some(line) = feed.recv().await {
            if stream.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
        return;
    }

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let body = match segments.as_slice() {
        ["tcf", "c", _, "Echo", "garbled"] => Value::String("{not a reply array".to_string()),
        ["tcf", "e", "Locator", "Hello"] => json!([
            {"Type": "E", "Service": "Locator", "Event": "Hello", "Args": [["Locator", "Echo"]]}
        ]),
        ["tcf", "e", ..] => json!([]),
        ["tcf", "c", token, "Echo", "echo"] => {
            json!([{"Type": "R", "Token": token, "Args": query_args(query.as_deref())}])
        }
        ["tcf", "c", _, "Echo", "fail"] => json!([{"Error": "No such command"}]),
        ["tcf", "c", token, "Locator", "sync"] => json!([
            {"Type": "R", "Token": token, "Args": [null]},
            {"Type": "E", "Service": "Echo", "Event": "queued", "Args": [1]}
        ]),
        ["tcf", "stop", ""] => json!([]),
        _ => {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            return;
        }
    };
    // A string body is sent verbatim, unquoted.
    let body = match body {
        Value::String(raw) => raw,
        other => other.to_string(),
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
}

/// Decode a query the way an agent does: split on `&`, then percent-decode.
fn query_args(query: Option<&str>) -> Vec<Value> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .map(|field| {
            let raw = urlencoding::decode_binary(field.as_bytes());
            serde_json::from_slice(&raw).expect("argument is JSON")
        })
        .collect()
}

struct TestCore {
    inbox: mpsc::UnboundedSender<Message>,
    outgoing: Vec<Message>,
    done: Option<oneshot::Sender<Option<String>>>,
}

impl DispatchCore for TestCore {
    fn deliver(&mut self, msg: Message) {
        let _ = self.inbox.send(msg);
    }

    fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn terminated(&mut self, cause: Option<&ChannelError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(cause.map(ToString::to_string));
        }
    }
}

fn args_of(values: &[Value]) -> Bytes {
    tcflink_codec::encode_args(values).expect("args encode")
}

async fn next_message(inbox: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(WAIT, inbox.recv())
        .await
        .expect("message in time")
        .expect("channel alive")
}

#[tokio::test]
async fn http_session_end_to_end() {
    let stub = start_stub().await;
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let core = TestCore {
        inbox: inbox_tx,
        outgoing: Vec::new(),
        done: Some(done_tx),
    };
    let transport = HttpTransport::new(HttpConfig::new("127.0.0.1", stub.port));
    let session_id = transport.session_id().to_string();
    let channel = Channel::spawn(transport, core, ChannelConfig::default());

    let state = timeout(WAIT, channel.wait_for_state(|s| s != ChannelState::Opening))
        .await
        .expect("channel should open");
    assert_eq!(state, ChannelState::Open);

    // Command with arguments that need percent-encoding.
    let original = json!("50% off & #1 caf\u{e9}");
    let args = args_of(&[original.clone(), json!({"n": [1, 2]})]);
    channel
        .invoke(move |core| {
            core.outgoing
                .push(Message::command("T1", "Echo", "echo", args));
        })
        .expect("dispatch is running");

    match next_message(&mut inbox).await {
        Message::Result { token, args } => {
            assert_eq!(token.as_bytes(), b"T1");
            assert_eq!(
                decode_args(&args).expect("args decode"),
                vec![original, json!({"n": [1, 2]})]
            );
        }
        other => panic!("unexpected {other}"),
    }

    // A remote error becomes a result with the error in the first slot.
    channel
        .invoke(|core| {
            core.outgoing
                .push(Message::command("T2", "Echo", "fail", Bytes::new()));
        })
        .expect("dispatch is running");
    match next_message(&mut inbox).await {
        Message::Result { token, args } => {
            assert_eq!(token.as_bytes(), b"T2");
            let values = decode_args(&args).expect("args decode");
            assert_eq!(values[0]["Format"], json!("No such command"));
        }
        other => panic!("unexpected {other}"),
    }

    // Activity on the event stream triggers a sync; its own reply is consumed.
    stub.sse.send("\n".to_string()).expect("sse feed");
    let queued = next_message(&mut inbox).await;
    assert!(queued.is_event("Echo", "queued"), "got {queued}");

    // Non-empty lines are ignored.
    stub.sse.send("data: x\n".to_string()).expect("sse feed");

    channel.close();
    let cause = timeout(WAIT, done_rx).await.expect("terminated").expect("core notified");
    assert_eq!(cause, None);

    let requests = stub.requests.lock().unwrap().clone();
    assert!(requests
        .iter()
        .all(|r| r.session.as_deref() == Some(session_id.as_str())));
    let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
    assert!(paths.iter().any(|p| p.starts_with("/tcf/e/Locator/Hello")));
    assert!(paths.iter().any(|p| p.starts_with("/tcf/c/T1/Echo/echo?")));
    assert!(paths.iter().any(|p| p.ends_with("/Locator/sync")));
    assert!(paths.contains(&"/tcf/sse"));
    assert!(paths.contains(&"/tcf/stop/"));
    assert_eq!(paths.iter().filter(|p| p.ends_with("/Locator/sync")).count(), 1);
}

#[tokio::test]
async fn malformed_reply_does_not_close_channel() {
    let stub = start_stub().await;
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let (done_tx, mut done_rx) = oneshot::channel();
    let core = TestCore {
        inbox: inbox_tx,
        outgoing: Vec::new(),
        done: Some(done_tx),
    };
    let channel = Channel::spawn(
        HttpTransport::new(HttpConfig::new("127.0.0.1", stub.port)),
        core,
        ChannelConfig::default(),
    );
    timeout(WAIT, channel.wait_for_state(|s| s == ChannelState::Open))
        .await
        .expect("channel should open");

    let args = args_of(&[json!("after")]);
    channel
        .invoke(move |core| {
            core.outgoing
                .push(Message::command("G1", "Echo", "garbled", Bytes::new()));
            core.outgoing.push(Message::command("G2", "Echo", "echo", args));
        })
        .expect("dispatch is running");

    // The garbled reply is dropped; the next command still gets its result.
    match next_message(&mut inbox).await {
        Message::Result { token, args } => {
            assert_eq!(token.as_bytes(), b"G2");
            assert_eq!(decode_args(&args).expect("args decode"), vec![json!("after")]);
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(channel.state(), ChannelState::Open);
    assert!(done_rx.try_recv().is_err());

    channel.close();
    let cause = timeout(WAIT, done_rx).await.expect("terminated").expect("core notified");
    assert_eq!(cause, None);
}

#[tokio::test]
async fn http_error_status_terminates_channel() {
    let stub = start_stub().await;
    let (inbox_tx, _inbox) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let core = TestCore {
        inbox: inbox_tx,
        outgoing: vec![Message::command("T9", "Missing", "nothing", Bytes::new())],
        done: Some(done_tx),
    };
    let channel = Channel::spawn(
        HttpTransport::new(HttpConfig::new("127.0.0.1", stub.port)),
        core,
        ChannelConfig {
            hello_services: Vec::new(),
            ..ChannelConfig::default()
        },
    );

    // Nudge the dispatch task so the queued command is drained.
    channel.invoke(|_| {}).expect("dispatch is running");

    let cause = timeout(WAIT, done_rx)
        .await
        .expect("terminated")
        .expect("core notified")
        .expect("HTTP 404 is a failure");
    assert!(cause.contains("HTTP 404"), "cause: {cause}");
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn unreachable_agent_terminates_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let (inbox_tx, _inbox) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let core = TestCore {
        inbox: inbox_tx,
        outgoing: Vec::new(),
        done: Some(done_tx),
    };
    let _channel = Channel::spawn(
        HttpTransport::new(HttpConfig::new("127.0.0.1", port)),
        core,
        ChannelConfig::default(),
    );
    let cause = timeout(WAIT, done_rx)
        .await
        .expect("terminated")
        .expect("core notified");
    assert!(cause.is_some());
}
