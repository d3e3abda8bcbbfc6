//! Realtime database: push over REST, live children over server-sent events.
//!
//! ARCHITECTURE
//! ============
//! `subscribe` spawns one streaming task per call. The task owns the HTTP
//! stream and a `ChildTracker`, which keeps the last known value of every
//! child so that `put`/`patch` frames (which describe JSON tree writes) can
//! be reduced to child added/changed/removed events.
//!
//! The server sends `auth_revoked` once the `auth=` id token expires. The
//! task then refreshes the token and reconnects, keeping its tracker, so the
//! root `put` replayed on the new stream only reports what changed while it
//! was away.
//!
//! The task stops as soon as the receiver is dropped. Anything else that ends
//! the stream (a server `cancel`, a failed refresh or connect, a closed body)
//! surfaces as a single `ChildEvent::Cancelled`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::auth::{fresh_id_token, refresh_id_token};
use super::sse::SseParser;
use super::{FirebaseApp, read_success, request_error};
use crate::backend::{BackendError, ChildEvent, ChildEvents, MessageStore};
use crate::message::Message;

pub struct FirebaseDatabase {
    app: Arc<FirebaseApp>,
    path: String,
}

impl FirebaseDatabase {
    #[must_use]
    pub fn new(app: Arc<FirebaseApp>, path: &str) -> Self {
        Self { app, path: path.trim_matches('/').to_owned() }
    }

    fn location_url(&self) -> String {
        format!("{}/{}.json", self.app.config().endpoints.database, self.path)
    }
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

#[async_trait::async_trait]
impl MessageStore for FirebaseDatabase {
    async fn push(&self, message: &Message) -> Result<String, BackendError> {
        let token = fresh_id_token(&self.app).await?;
        let response = self
            .app
            .http()
            .post(self.location_url())
            .query(&[("auth", token.as_str())])
            .json(message)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let text = read_success(response).await?;
        let pushed: PushResponse = serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))?;
        debug!(key = %pushed.name, "database: pushed");
        Ok(pushed.name)
    }

    fn subscribe(&self) -> ChildEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_subscription(self.app.clone(), self.location_url(), tx));
        rx
    }
}

// =============================================================================
// STREAMING
// =============================================================================

#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// How one connection of the event stream ended.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The id token expired. `frames` counts the data frames seen first.
    AuthRevoked { frames: usize },
    Closed(String),
}

async fn run_subscription(app: Arc<FirebaseApp>, url: String, tx: mpsc::UnboundedSender<ChildEvent>) {
    let reason = tokio::select! {
        () = tx.closed() => {
            debug!("database: subscription detached");
            return;
        }
        reason = follow_children(&app, &url, &tx) => reason,
    };
    info!(%reason, "database: subscription ended");
    let _ = tx.send(ChildEvent::Cancelled { reason });
}

/// Stream children across token expiry. Returns why streaming stopped.
async fn follow_children(app: &FirebaseApp, url: &str, tx: &mpsc::UnboundedSender<ChildEvent>) -> String {
    let mut tracker = ChildTracker::default();
    loop {
        match stream_children(app, url, tx, &mut tracker).await {
            Ok(StreamEnd::AuthRevoked { frames: 0 }) => {
                return "auth revoked before any data".to_owned();
            }
            Ok(StreamEnd::AuthRevoked { .. }) => {
                info!("database: auth revoked; refreshing token and reconnecting");
                if let Err(e) = refresh_id_token(app).await {
                    warn!(error = %e, code = e.code(), "database: token refresh failed");
                    return format!("auth revoked: {e}");
                }
            }
            Ok(StreamEnd::Closed(reason)) => return reason,
            Err(e) => {
                warn!(error = %e, code = e.code(), "database: subscription failed");
                return e.to_string();
            }
        }
    }
}

/// Pump one connection of the event stream into `tx` through `tracker`.
async fn stream_children(
    app: &FirebaseApp,
    url: &str,
    tx: &mpsc::UnboundedSender<ChildEvent>,
    tracker: &mut ChildTracker,
) -> Result<StreamEnd, BackendError> {
    let token = fresh_id_token(app).await?;
    let response = app
        .stream_http()
        .get(url)
        .query(&[("auth", token.as_str())])
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| request_error(&e))?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status { status, body });
    }

    let mut parser = SseParser::new();
    let mut frames = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| request_error(&e))?;
        for frame in parser.feed(&chunk) {
            let events = match frame.event.as_str() {
                "put" | "patch" => {
                    let payload: StreamPayload = match serde_json::from_str(&frame.data) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, event = %frame.event, "database: unreadable frame");
                            continue;
                        }
                    };
                    frames += 1;
                    if frame.event == "put" {
                        tracker.put(&payload.path, payload.data)
                    } else {
                        tracker.patch(&payload.path, payload.data)
                    }
                }
                "keep-alive" => continue,
                "cancel" => return Ok(StreamEnd::Closed(format!("cancelled by server: {}", frame.data))),
                "auth_revoked" => return Ok(StreamEnd::AuthRevoked { frames }),
                other => {
                    debug!(event = %other, "database: ignoring frame");
                    continue;
                }
            };
            for event in events {
                if tx.send(event).is_err() {
                    return Ok(StreamEnd::Closed("detached".to_owned()));
                }
            }
        }
    }
    Ok(StreamEnd::Closed("stream closed".to_owned()))
}

// =============================================================================
// CHILD TRACKING
// =============================================================================

/// Last known JSON of each child under the subscribed location.
#[derive(Debug, Default)]
pub(crate) struct ChildTracker {
    children: BTreeMap<String, Value>,
}

impl ChildTracker {
    /// Apply a `put`: `data` replaces whatever is at `path`.
    pub(crate) fn put(&mut self, path: &str, data: Value) -> Vec<ChildEvent> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((key, rest)) = segments.split_first() else {
            return self.replace_all(data);
        };
        let next = if rest.is_empty() {
            data
        } else {
            let mut child = self.children.get(*key).cloned().unwrap_or(Value::Null);
            set_in(&mut child, rest, data);
            child
        };
        self.set_child(key, next).into_iter().collect()
    }

    /// Apply a `patch`: each entry of `data` is a put relative to `path`.
    pub(crate) fn patch(&mut self, path: &str, data: Value) -> Vec<ChildEvent> {
        let Value::Object(entries) = data else {
            warn!(%path, "database: patch without an object body");
            return Vec::new();
        };
        let base = path.trim_end_matches('/');
        entries
            .into_iter()
            .flat_map(|(sub, value)| self.put(&format!("{base}/{sub}"), value))
            .collect()
    }

    fn replace_all(&mut self, data: Value) -> Vec<ChildEvent> {
        let mut incoming = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(value = %other, "database: location holds a scalar");
                Map::new()
            }
        };
        let gone: Vec<String> = self
            .children
            .keys()
            .filter(|key| !incoming.contains_key(key.as_str()))
            .cloned()
            .collect();
        let mut events: Vec<ChildEvent> = gone.iter().filter_map(|key| self.set_child(key, Value::Null)).collect();

        let mut keys: Vec<String> = incoming.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if let Some(value) = incoming.remove(&key) {
                events.extend(self.set_child(&key, value));
            }
        }
        events
    }

    fn set_child(&mut self, key: &str, value: Value) -> Option<ChildEvent> {
        let value = (!is_empty(&value)).then_some(value);
        let previous = match value {
            Some(ref value) => self.children.insert(key.to_owned(), value.clone()),
            None => self.children.remove(key),
        };
        match (previous, value) {
            (None, None) => None,
            (Some(_), None) => Some(ChildEvent::Removed { key: key.to_owned() }),
            (Some(old), Some(new)) if old == new => None,
            (old, Some(new)) => {
                let message = parse_message(key, new)?;
                let key = key.to_owned();
                Some(if old.is_some() { ChildEvent::Changed { key, message } } else { ChildEvent::Added { key, message } })
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Write `value` at `segments` below `target`, creating or pruning objects.
fn set_in(target: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    let child = map.entry((*head).to_owned()).or_insert(Value::Null);
    set_in(child, rest, value);
    if is_empty(child) {
        map.remove(*head);
    }
}

fn parse_message(key: &str, value: Value) -> Option<Message> {
    match serde_json::from_value(value) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(%key, error = %e, "database: skipping malformed message");
            None
        }
    }
}

#[cfg(test)]
#[path = "database_test.rs"]
mod tests;
