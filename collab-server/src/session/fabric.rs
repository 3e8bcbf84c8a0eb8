//! Message validation, routing, fan-out, heartbeat, and lifecycle (§4.7).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::error::{CoreError, CoreResult};
use crate::id_gen::IdGenerator;
use crate::ot::engine::{CollaborationEngine, CursorBroadcastCallback};
use crate::ot::model::{Operation, RemoteUser};
use crate::protocol::{CursorPayload, DocumentPayload, OperationPayload, OutboundFrame, RawInboundFrame, WsCommand};
use crate::rate_limiter::RateLimiter;
use crate::session::registry::SessionRegistry;
use crate::util::{Identifier, now_millis};

/// Interval of the heartbeat tick (§5).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Known inbound frame types (§6, plus `cursor` for remote-presence updates).
const FRAME_TYPES: &[&str] = &["operation", "heartbeat", "subscribe", "unsubscribe", "cursor"];

/// Owns the [`SessionRegistry`] plus the collaborators needed to validate,
/// route, and fan out messages: the [`RateLimiter`] and the
/// [`CollaborationEngine`] that the `documentId`/`editorId` namespace is
/// wired into. The registry is `Arc`-wrapped so a debounced cursor-broadcast
/// callback can hold its own handle to it without borrowing `self`.
pub struct SessionFabric {
    registry: Arc<SessionRegistry>,
    rate_limiter: RateLimiter,
    engine: Arc<CollaborationEngine>,
    id_gen: Arc<dyn IdGenerator>,
}

impl SessionFabric {
    pub fn new(engine: Arc<CollaborationEngine>, rate_limiter: RateLimiter, id_gen: Arc<dyn IdGenerator>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            rate_limiter,
            engine,
            id_gen,
        }
    }

    /// Allocates a `sessionId` and registers the connection, sending the
    /// `connection` ack frame over `sender`.
    pub fn register_client(&self, user_id: String, sender: UnboundedSender<WsCommand>) -> String {
        let session_id = self.id_gen.next_id();
        let now = now_millis();
        self.registry.register(session_id.clone(), user_id, sender, now);
        self.registry.send(
            &session_id,
            WsCommand::Send(OutboundFrame::Connection {
                session_id: session_id.clone(),
                timestamp: now,
            }),
        );
        session_id
    }

    /// Closes the transport with `code`/`reason` (best-effort) and tears
    /// down the session (§4.7 Unregister, §4.7 Heartbeat, §4.7 Shutdown),
    /// removing the departing user's presence from every editor it was
    /// subscribed to.
    pub async fn unregister_client(&self, session_id: &str, code: u16, reason: &str) {
        self.registry.send(
            session_id,
            WsCommand::Close {
                code,
                reason: reason.to_string(),
            },
        );
        if let Some(session) = self.registry.unregister(session_id) {
            for document_id in session.subscribed_documents() {
                let _ = self.engine.remove_remote_user(document_id, &session.user_id).await;
            }
            self.rate_limiter.clear_user_limits(&session.user_id);
        }
    }

    /// Parses and dispatches one inbound frame. Every error is caught here
    /// by the caller (never propagated to the transport) per §7's "never
    /// close on bad frame" policy; this method itself only returns the
    /// error so the caller can log it.
    pub async fn handle_frame(&self, session_id: &str, raw: RawInboundFrame) -> CoreResult<()> {
        let frame_type = raw
            .frame_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoreError::InvalidMessage("missing type".into()))?;
        let sender_session_id = raw
            .session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::InvalidMessage("missing sessionId".into()))?;
        if sender_session_id != session_id {
            return Err(CoreError::InvalidMessage("sessionId does not match connection".into()));
        }
        if !FRAME_TYPES.contains(&frame_type) {
            return Err(CoreError::InvalidMessage(format!("unknown frame type {frame_type}")));
        }

        match frame_type {
            "heartbeat" => {
                self.registry.mark_alive(session_id);
                self.registry.touch(session_id, now_millis());
                Ok(())
            }
            "subscribe" => {
                let payload = self.document_payload(&raw)?;
                // Lazily creates the editor on first subscriber, mirroring
                // how a document-store-backed deployment would load it.
                self.engine.initialize_editor(&payload.document_id, None);
                self.registry.subscribe(session_id, &payload.document_id)?;
                let user_id = self
                    .registry
                    .user_id_of(session_id)
                    .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
                self.engine
                    .add_remote_user(&payload.document_id, remote_user_for(&user_id))
                    .await
            }
            "unsubscribe" => {
                let payload = self.document_payload(&raw)?;
                self.registry.unsubscribe(session_id, &payload.document_id);
                if let Some(user_id) = self.registry.user_id_of(session_id) {
                    let _ = self.engine.remove_remote_user(&payload.document_id, &user_id).await;
                }
                Ok(())
            }
            "cursor" => self.handle_cursor(session_id, &raw).await,
            "operation" => self.handle_operation(session_id, &raw).await,
            _ => unreachable!("checked against FRAME_TYPES above"),
        }
    }

    fn document_payload(&self, raw: &RawInboundFrame) -> CoreResult<DocumentPayload> {
        let payload = raw
            .payload
            .clone()
            .ok_or_else(|| CoreError::InvalidMessage("missing payload".into()))?;
        let payload: DocumentPayload = serde_json::from_value(payload)
            .map_err(|e| CoreError::InvalidMessage(format!("bad payload: {e}")))?;
        validate_document_id(&payload.document_id)?;
        Ok(payload)
    }

    /// The operation handling path (§4.7): rate limit, subscription check,
    /// engine mutation, fan-out, activity touch.
    async fn handle_operation(&self, session_id: &str, raw: &RawInboundFrame) -> CoreResult<()> {
        let payload_value = raw
            .payload
            .clone()
            .ok_or_else(|| CoreError::InvalidMessage("missing payload".into()))?;
        let payload: OperationPayload = serde_json::from_value(payload_value)
            .map_err(|e| CoreError::InvalidMessage(format!("bad operation payload: {e}")))?;
        validate_document_id(&payload.document_id)?;
        if payload.version < 1 {
            return Err(CoreError::InvalidMessage("payload.version must be >= 1".into()));
        }

        let user_id = self
            .registry
            .user_id_of(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        self.rate_limiter.check_and_record(&user_id)?;

        if !self.registry.is_subscribed(session_id, &payload.document_id) {
            return Err(CoreError::OperationDenied {
                document_id: payload.document_id,
            });
        }

        self.apply_and_broadcast(session_id, &payload.document_id, payload.operation)
            .await?;
        self.registry.touch(session_id, now_millis());
        Ok(())
    }

    async fn apply_and_broadcast(&self, session_id: &str, document_id: &str, op: Operation) -> CoreResult<()> {
        self.engine.apply_operation(document_id, op.clone()).await?;

        let frame = OutboundFrame::Operation {
            document_id: document_id.to_string(),
            data: serde_json::to_value(&op).expect("Operation always serializes"),
            exclude_session_id: Some(session_id.to_string()),
            timestamp: now_millis(),
        };
        self.fan_out(document_id, frame, Some(session_id));
        Ok(())
    }

    /// The cursor/presence handling path: subscription check, debounced
    /// broadcast of the resulting [`CursorBroadcast`] as a `notification`
    /// frame once the debounce timer fires (§4.4, §4.5 `scheduleCursorBroadcast`).
    async fn handle_cursor(&self, session_id: &str, raw: &RawInboundFrame) -> CoreResult<()> {
        let payload_value = raw
            .payload
            .clone()
            .ok_or_else(|| CoreError::InvalidMessage("missing payload".into()))?;
        let payload: CursorPayload = serde_json::from_value(payload_value)
            .map_err(|e| CoreError::InvalidMessage(format!("bad cursor payload: {e}")))?;
        validate_document_id(&payload.document_id)?;

        let user_id = self
            .registry
            .user_id_of(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        if !self.registry.is_subscribed(session_id, &payload.document_id) {
            return Err(CoreError::OperationDenied {
                document_id: payload.document_id,
            });
        }

        let registry = self.registry.clone();
        let document_id = payload.document_id.clone();
        let sender_session_id = session_id.to_string();
        let broadcast_cb: CursorBroadcastCallback = Arc::new(move |broadcast| {
            let frame = OutboundFrame::Notification {
                document_id: document_id.clone(),
                data: serde_json::to_value(&broadcast).expect("CursorBroadcast always serializes"),
                exclude_session_id: Some(sender_session_id.clone()),
                timestamp: broadcast.timestamp,
            };
            for session_id in registry.sessions_for_document(&document_id) {
                if session_id == sender_session_id {
                    continue;
                }
                registry.send(&session_id, WsCommand::Send(frame.clone()));
            }
            Ok(())
        });

        self.engine
            .update_remote_user_cursor(&payload.document_id, &user_id, payload.cursor, payload.selection, Some(broadcast_cb))
            .await?;
        self.registry.touch(session_id, now_millis());
        Ok(())
    }

    /// Delivers `frame` to every session subscribed to `document_id`,
    /// skipping `exclude`. Per-send failures are logged and do not abort
    /// the fan-out (§4.7, §5).
    pub fn fan_out(&self, document_id: &str, frame: OutboundFrame, exclude: Option<&str>) {
        for session_id in self.registry.sessions_for_document(document_id) {
            if exclude == Some(session_id.as_str()) {
                continue;
            }
            if !self.registry.send(&session_id, WsCommand::Send(frame.clone())) {
                tracing::warn!(session_id, document_id, "failed to deliver broadcast frame");
            }
        }
    }

    /// One heartbeat tick: close-and-unregister every connection still dead
    /// from the previous tick, then flip survivors to not-alive.
    pub async fn heartbeat_tick(&self) {
        let dead = self.registry.heartbeat_sweep(now_millis());
        for session_id in dead {
            tracing::info!(session_id, "heartbeat timeout");
            self.unregister_client(&session_id, 1000, "Heartbeat timeout").await;
        }
    }

    /// Spawns the periodic heartbeat tick. The returned handle should be
    /// aborted on [`SessionFabric::shutdown`].
    pub fn spawn_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                self.heartbeat_tick().await;
            }
        })
    }

    /// Closes every transport with code 1000 "Server shutdown" and clears
    /// every registry and rate-limit bucket.
    pub async fn shutdown(&self) {
        for session_id in self.registry.all_session_ids() {
            self.unregister_client(&session_id, 1000, "Server shutdown").await;
        }
        self.rate_limiter.clear_all_limits();
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.registry.as_ref()
    }
}

/// Rejects a `documentId` that isn't a well-formed [`Identifier`] (§7
/// `InvalidMessageError`), without changing the wire representation: callers
/// keep passing `documentId` around as a plain `String` everywhere else.
fn validate_document_id(document_id: &str) -> CoreResult<()> {
    document_id
        .parse::<Identifier>()
        .map_err(|e| CoreError::InvalidMessage(format!("bad documentId: {e}")))?;
    Ok(())
}

/// Builds a fresh presence entry for a newly subscribed user: a random hue
/// (the teacher's own per-session color assignment, `rustpad-server/src/auth.rs`'s
/// `hue: rand::random_range(0..360)`) rendered as the `#RRGGBB` the data
/// model calls for instead of the teacher's raw HSL hue.
fn remote_user_for(user_id: &str) -> RemoteUser {
    RemoteUser {
        id: user_id.to_string(),
        name: user_id.to_string(),
        color: hsl_to_hex(rand::random_range(0..360), 0.7, 0.5),
        cursor: None,
        selection: None,
        is_active: true,
        last_seen: now_millis(),
    }
}

fn hsl_to_hex(hue: u16, saturation: f64, lightness: f64) -> String {
    let h = hue as f64 / 360.0;
    let (r, g, b) = if saturation == 0.0 {
        (lightness, lightness, lightness)
    } else {
        let q = if lightness < 0.5 {
            lightness * (1.0 + saturation)
        } else {
            lightness + saturation - lightness * saturation
        };
        let p = 2.0 * lightness - q;
        (hue_channel(p, q, h + 1.0 / 3.0), hue_channel(p, q, h), hue_channel(p, q, h - 1.0 / 3.0))
    };
    format!(
        "#{:02X}{:02X}{:02X}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hue_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = if t < 0.0 {
        t + 1.0
    } else if t > 1.0 {
        t - 1.0
    } else {
        t
    };
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::NoopEventBus;
    use crate::id_gen::DefaultIdGenerator;
    use crate::ot::model::Operation;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn fabric() -> SessionFabric {
        let engine = Arc::new(CollaborationEngine::new(Arc::new(NoopEventBus), Arc::new(DefaultIdGenerator)));
        SessionFabric::new(engine, RateLimiter::default(), Arc::new(DefaultIdGenerator))
    }

    #[tokio::test]
    async fn missing_type_is_invalid_message() {
        let fabric = fabric();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        let raw = RawInboundFrame {
            frame_type: None,
            session_id: Some(sid.clone()),
            payload: None,
            timestamp: None,
        };
        let err = fabric.handle_frame(&sid, raw).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn empty_session_id_is_invalid_message() {
        let fabric = fabric();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        let raw = RawInboundFrame {
            frame_type: Some("heartbeat".into()),
            session_id: Some(String::new()),
            payload: None,
            timestamp: None,
        };
        let err = fabric.handle_frame(&sid, raw).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn heartbeat_frame_marks_alive() {
        let fabric = fabric();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        fabric.heartbeat_tick().await; // flips to not-alive
        let raw = RawInboundFrame {
            frame_type: Some("heartbeat".into()),
            session_id: Some(sid.clone()),
            payload: None,
            timestamp: None,
        };
        fabric.handle_frame(&sid, raw).await.unwrap();
        fabric.heartbeat_tick().await; // would be dead if not marked alive
        assert!(fabric.registry().user_id_of(&sid).is_some());
    }

    #[tokio::test]
    async fn s7_fan_out_excludes_sender() {
        let fabric = fabric();
        fabric.engine.initialize_editor("d1", Some(String::new()));

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let s1 = fabric.register_client("u1".into(), tx1);
        let s2 = fabric.register_client("u2".into(), tx2);
        rx1.recv().await.unwrap(); // connection ack
        rx2.recv().await.unwrap();

        fabric.registry().subscribe(&s1, "d1").unwrap();
        fabric.registry().subscribe(&s2, "d1").unwrap();

        let op = Operation::insert("o1".into(), 0, "hi".into(), "u1".into(), 0);
        let raw = RawInboundFrame {
            frame_type: Some("operation".into()),
            session_id: Some(s1.clone()),
            payload: Some(json!({
                "documentId": "d1",
                "operation": op,
                "version": 1,
            })),
            timestamp: None,
        };
        fabric.handle_frame(&s1, raw).await.unwrap();

        assert!(matches!(rx2.recv().await.unwrap(), WsCommand::Send(OutboundFrame::Operation { .. })));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_with_malformed_document_id_is_invalid_message() {
        let fabric = fabric();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        rx.recv().await.unwrap(); // connection ack
        let raw = RawInboundFrame {
            frame_type: Some("subscribe".into()),
            session_id: Some(sid.clone()),
            payload: Some(json!({ "documentId": "has/a/slash" })),
            timestamp: None,
        };
        let err = fabric.handle_frame(&sid, raw).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn operation_on_unsubscribed_document_denied() {
        let fabric = fabric();
        fabric.engine.initialize_editor("d1", Some(String::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        rx.recv().await.unwrap();

        let op = Operation::insert("o1".into(), 0, "hi".into(), "u1".into(), 0);
        let raw = RawInboundFrame {
            frame_type: Some("operation".into()),
            session_id: Some(sid.clone()),
            payload: Some(json!({ "documentId": "d1", "operation": op, "version": 1 })),
            timestamp: None,
        };
        let err = fabric.handle_frame(&sid, raw).await.unwrap_err();
        assert!(matches!(err, CoreError::OperationDenied { .. }));
    }

    #[tokio::test]
    async fn invariant4_unregister_client_clears_subscriptions() {
        let fabric = fabric();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        fabric.registry().subscribe(&sid, "d1").unwrap();
        fabric.unregister_client(&sid, 1000, "Server shutdown").await;
        assert!(fabric.registry().sessions_for_document("d1").is_empty());
    }

    #[tokio::test]
    async fn subscribe_adds_presence_and_unregister_removes_it() {
        let fabric = fabric();
        fabric.engine.initialize_editor("d1", Some(String::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = fabric.register_client("u1".into(), tx);
        rx.recv().await.unwrap(); // connection ack

        let raw = RawInboundFrame {
            frame_type: Some("subscribe".into()),
            session_id: Some(sid.clone()),
            payload: Some(json!({ "documentId": "d1" })),
            timestamp: None,
        };
        fabric.handle_frame(&sid, raw).await.unwrap();
        let users = fabric.engine.get_active_remote_users("d1").await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");

        fabric.unregister_client(&sid, 1000, "client disconnected").await;
        assert!(fabric.engine.get_active_remote_users("d1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_frame_updates_presence_and_broadcasts_after_debounce() {
        let fabric = fabric();
        fabric.engine.initialize_editor("d1", Some(String::new()));

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let s1 = fabric.register_client("u1".into(), tx1);
        let s2 = fabric.register_client("u2".into(), tx2);
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();
        fabric.registry().subscribe(&s1, "d1").unwrap();
        fabric.registry().subscribe(&s2, "d1").unwrap();

        let raw = RawInboundFrame {
            frame_type: Some("cursor".into()),
            session_id: Some(s1.clone()),
            payload: Some(json!({
                "documentId": "d1",
                "cursor": { "line": 0, "column": 3 },
            })),
            timestamp: None,
        };
        fabric.handle_frame(&s1, raw).await.unwrap();
        assert!(fabric.engine.has_pending_cursor_broadcast("d1", "u1"));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(matches!(rx2.recv().await.unwrap(), WsCommand::Send(OutboundFrame::Notification { .. })));
        assert!(rx1.try_recv().is_err());
    }
}
