//! Domain-event sink collaborator.
//!
//! The engine emits primitive-payload events synchronously, in the same
//! order as the state changes that produced them (§5). Real deployments plug
//! in their own `EventBus` (e.g. forwarding to a message queue); this crate
//! ships two trivial defaults so it runs standalone.

use crate::ot::model::{Cursor, Operation, Selection};

/// A domain event emitted by the [`crate::ot::engine::CollaborationEngine`].
#[derive(Clone, Debug)]
pub enum DomainEvent {
    OperationApplied {
        editor_id: String,
        op: Operation,
    },
    OperationBatchReceived {
        editor_id: String,
        batch_id: String,
        operation_count: usize,
    },
    OperationConflict {
        editor_id: String,
        original: Operation,
        transformed: Operation,
    },
    RemoteUserConnected {
        editor_id: String,
        user_id: String,
    },
    RemoteUserDisconnected {
        editor_id: String,
        user_id: String,
    },
    CursorUpdated {
        editor_id: String,
        user_id: String,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
    },
}

/// Receives [`DomainEvent`]s produced by the engine.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Discards every event. Used when no external sink is wired up.
#[derive(Default)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&self, _event: DomainEvent) {}
}

/// Logs every event at `debug` via `tracing`. Useful during development and
/// in tests that want to observe event ordering without a real sink.
#[derive(Default)]
pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn publish(&self, event: DomainEvent) {
        tracing::debug!(?event, "domain event");
    }
}
