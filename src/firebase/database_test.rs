use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout};

use super::*;
use crate::backend::User;
use crate::firebase::Session;
use crate::firebase::config::{Endpoints, FirebaseConfig, Timeouts};

fn text(body: &str, name: &str) -> Message {
    Message::text(body, name)
}

#[test]
fn initial_root_put_adds_children_in_key_order() {
    let mut tracker = ChildTracker::default();
    let events = tracker.put(
        "/",
        json!({
            "-Nb": {"text": "second", "name": "bob"},
            "-Na": {"text": "first", "name": "alice"},
        }),
    );
    assert_eq!(
        events,
        vec![
            ChildEvent::Added { key: "-Na".into(), message: text("first", "alice") },
            ChildEvent::Added { key: "-Nb".into(), message: text("second", "bob") },
        ]
    );
}

#[test]
fn empty_root_put_emits_nothing() {
    let mut tracker = ChildTracker::default();
    assert!(tracker.put("/", Value::Null).is_empty());
}

#[test]
fn child_put_adds_then_changes_then_removes() {
    let mut tracker = ChildTracker::default();
    let added = tracker.put("/-Nc", json!({"text": "hi", "name": "carol"}));
    assert_eq!(added, vec![ChildEvent::Added { key: "-Nc".into(), message: text("hi", "carol") }]);

    let changed = tracker.put("/-Nc", json!({"text": "hi!", "name": "carol"}));
    assert_eq!(changed, vec![ChildEvent::Changed { key: "-Nc".into(), message: text("hi!", "carol") }]);

    let removed = tracker.put("/-Nc", Value::Null);
    assert_eq!(removed, vec![ChildEvent::Removed { key: "-Nc".into() }]);
}

#[test]
fn identical_put_is_silent() {
    let mut tracker = ChildTracker::default();
    tracker.put("/-Nd", json!({"text": "same", "name": "dan"}));
    assert!(tracker.put("/-Nd", json!({"text": "same", "name": "dan"})).is_empty());
}

#[test]
fn nested_put_updates_a_single_field() {
    let mut tracker = ChildTracker::default();
    tracker.put("/-Ne", json!({"name": "eve", "photoUrl": "https://loading"}));
    let events = tracker.put("/-Ne/photoUrl", json!("https://final"));
    assert_eq!(
        events,
        vec![ChildEvent::Changed { key: "-Ne".into(), message: Message::photo("https://final", "eve") }]
    );
}

#[test]
fn patch_applies_each_entry() {
    let mut tracker = ChildTracker::default();
    tracker.put("/", json!({"-Nf": {"text": "a", "name": "f"}}));
    let events = tracker.patch(
        "/",
        json!({
            "-Nf/text": "b",
            "-Ng": {"text": "new", "name": "g"},
        }),
    );
    assert_eq!(
        events,
        vec![
            ChildEvent::Changed { key: "-Nf".into(), message: text("b", "f") },
            ChildEvent::Added { key: "-Ng".into(), message: text("new", "g") },
        ]
    );
}

#[test]
fn root_put_diffs_against_known_children() {
    let mut tracker = ChildTracker::default();
    tracker.put("/", json!({"-Na": {"text": "a", "name": "x"}, "-Nb": {"text": "b", "name": "x"}}));
    let events = tracker.put("/", json!({"-Nb": {"text": "b2", "name": "x"}, "-Nc": {"text": "c", "name": "x"}}));
    assert_eq!(
        events,
        vec![
            ChildEvent::Removed { key: "-Na".into() },
            ChildEvent::Changed { key: "-Nb".into(), message: text("b2", "x") },
            ChildEvent::Added { key: "-Nc".into(), message: text("c", "x") },
        ]
    );
}

#[test]
fn malformed_child_is_skipped() {
    let mut tracker = ChildTracker::default();
    let events = tracker.put("/", json!({"-Na": "just a string", "-Nb": {"text": "ok", "name": "y"}}));
    assert_eq!(events, vec![ChildEvent::Added { key: "-Nb".into(), message: text("ok", "y") }]);
}

#[test]
fn patch_with_scalar_body_is_ignored() {
    let mut tracker = ChildTracker::default();
    assert!(tracker.patch("/", json!(5)).is_empty());
}

#[test]
fn root_put_replayed_after_reconnect_is_silent() {
    let mut tracker = ChildTracker::default();
    let snapshot = json!({"-Na": {"text": "a", "name": "x"}, "-Nb": {"text": "b", "name": "y"}});
    assert_eq!(tracker.put("/", snapshot.clone()).len(), 2);

    assert!(tracker.put("/", snapshot).is_empty());

    let grown = json!({
        "-Na": {"text": "a", "name": "x"},
        "-Nb": {"text": "b", "name": "y"},
        "-Nc": {"text": "c", "name": "z"},
    });
    assert_eq!(tracker.put("/", grown), vec![ChildEvent::Added { key: "-Nc".into(), message: text("c", "z") }]);
}

// =========================================================================
// Streaming against a local server
// =========================================================================

enum Reply {
    /// Write the response and close the connection.
    Close(String),
    /// Write the response and keep the connection open.
    Hold(String),
}

/// Serve one response per connection, chosen from the request line.
async fn fake_server(respond: impl Fn(&str) -> Reply + Send + Sync + 'static) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let line = read_request(&mut socket).await;
                match respond(&line) {
                    Reply::Close(raw) => {
                        let _ = socket.write_all(raw.as_bytes()).await;
                    }
                    Reply::Hold(raw) => {
                        let _ = socket.write_all(raw.as_bytes()).await;
                        std::future::pending::<()>().await;
                    }
                }
            });
        }
    });
    format!("http://{addr}")
}

/// Read the request head and body; return the request line.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let length: usize = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    head.lines().next().unwrap_or_default().to_owned()
}

fn event_stream(frames: &[&str]) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}", frames.concat())
}

fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn not_found() -> Reply {
    Reply::Close("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned())
}

fn put_frame(data: &Value) -> String {
    format!("event: put\ndata: {}\n\n", json!({"path": "/", "data": data}))
}

const AUTH_REVOKED: &str = "event: auth_revoked\ndata: \"credential is no longer valid\"\n\n";

fn signed_in_app(base: &str) -> Arc<FirebaseApp> {
    let config = FirebaseConfig {
        api_key: "key".into(),
        project_id: "demo".into(),
        app_id: None,
        storage_bucket: "demo.appspot.com".into(),
        endpoints: Endpoints {
            auth: format!("{base}/auth"),
            token: base.to_owned(),
            database: format!("{base}/db"),
            storage: format!("{base}/storage"),
            remote_config: format!("{base}/rc"),
        },
        timeouts: Timeouts { request_secs: 5, connect_secs: 5 },
    };
    let app = FirebaseApp::new(config).unwrap();
    app.set_session(Some(Session {
        user: User { uid: "u1".into(), display_name: None, email: None },
        id_token: "old".into(),
        refresh_token: "r1".into(),
        expires_at: Instant::now() + Duration::from_secs(3600),
    }));
    app
}

#[tokio::test]
async fn auth_revoked_refreshes_and_resumes_without_duplicates() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = refreshes.clone();
    let a = json!({"-Na": {"text": "a", "name": "x"}});
    let ab = json!({"-Na": {"text": "a", "name": "x"}, "-Nb": {"text": "b", "name": "y"}});
    let first = event_stream(&[put_frame(&a).as_str(), AUTH_REVOKED]);
    let second = event_stream(&[put_frame(&ab).as_str()]);
    let base = fake_server(move |line| {
        if line.starts_with("POST /token") {
            counter.fetch_add(1, Ordering::SeqCst);
            Reply::Close(json_response(r#"{"id_token":"new","refresh_token":"r2","expires_in":"3600"}"#))
        } else if line.contains("auth=old") {
            Reply::Close(first.clone())
        } else if line.contains("auth=new") {
            Reply::Hold(second.clone())
        } else {
            not_found()
        }
    })
    .await;
    let app = signed_in_app(&base);
    let database = FirebaseDatabase::new(app.clone(), "messages");

    let mut rx = database.subscribe();
    let mut events = Vec::new();
    for _ in 0..2 {
        events.push(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap());
    }

    assert_eq!(
        events,
        vec![
            ChildEvent::Added { key: "-Na".into(), message: text("a", "x") },
            ChildEvent::Added { key: "-Nb".into(), message: text("b", "y") },
        ]
    );
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(app.session().map(|s| s.id_token), Some("new".to_owned()));
}

#[tokio::test]
async fn auth_revoked_before_any_data_cancels() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = refreshes.clone();
    let base = fake_server(move |line| {
        if line.starts_with("POST /token") {
            counter.fetch_add(1, Ordering::SeqCst);
            not_found()
        } else if line.starts_with("GET /db/messages.json") {
            Reply::Close(event_stream(&[AUTH_REVOKED]))
        } else {
            not_found()
        }
    })
    .await;
    let database = FirebaseDatabase::new(signed_in_app(&base), "messages");

    let mut rx = database.subscribe();
    let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();

    assert_eq!(event, Some(ChildEvent::Cancelled { reason: "auth revoked before any data".into() }));
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
}
