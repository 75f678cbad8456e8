use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use shared::error::{ErrorKind, WorkflowError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ControllerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Connect,
    Buy,
    Claim,
    View,
    Fund,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Connect,
        OperationKind::Buy,
        OperationKind::Claim,
        OperationKind::View,
        OperationKind::Fund,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Connect => "connect",
            OperationKind::Buy => "buy",
            OperationKind::Claim => "claim",
            OperationKind::View => "view",
            OperationKind::Fund => "fund",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status line of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Idle,
    Processing(String),
    Success(String),
    Error(String),
}

impl OperationStatus {
    pub fn is_processing(&self) -> bool {
        matches!(self, OperationStatus::Processing(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Success(_) | OperationStatus::Error(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            OperationStatus::Idle => None,
            OperationStatus::Processing(message)
            | OperationStatus::Success(message)
            | OperationStatus::Error(message) => Some(message),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Idle => f.write_str("idle"),
            OperationStatus::Processing(message) => write!(f, "processing: {message}"),
            OperationStatus::Success(message) => write!(f, "success: {message}"),
            OperationStatus::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// False while the operation is processing; the trigger must not be offered then.
    pub control_enabled: bool,
}

impl OperationSnapshot {
    fn idle(kind: OperationKind) -> Self {
        Self {
            kind,
            status: OperationStatus::Idle,
            control_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    snapshot: OperationSnapshot,
    /// Set by `try_begin` and cleared when the guard finishes or drops.
    in_flight: bool,
}

impl Slot {
    fn idle(kind: OperationKind) -> Self {
        Self {
            snapshot: OperationSnapshot::idle(kind),
            in_flight: false,
        }
    }
}

/// One in-flight slot and status line per operation kind.
pub struct OperationBoard {
    slots: Mutex<HashMap<OperationKind, Slot>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl OperationBoard {
    pub(crate) fn new(events: broadcast::Sender<ControllerEvent>) -> Self {
        let slots = OperationKind::ALL
            .into_iter()
            .map(|kind| (kind, Slot::idle(kind)))
            .collect();
        Self {
            slots: Mutex::new(slots),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationKind, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self, kind: OperationKind) -> OperationSnapshot {
        self.lock()
            .get(&kind)
            .map(|slot| slot.snapshot.clone())
            .unwrap_or_else(|| OperationSnapshot::idle(kind))
    }

    /// Claims the slot for `kind`. Fails with `Busy` while another guard holds it,
    /// leaving the running operation's status untouched.
    pub fn try_begin(&self, kind: OperationKind) -> Result<OperationGuard<'_>, WorkflowError> {
        let mut slots = self.lock();
        let slot = slots.entry(kind).or_insert_with(|| Slot::idle(kind));
        if slot.in_flight {
            warn!(operation = %kind, "operation already in progress; rejecting re-invocation");
            return Err(WorkflowError::new(
                ErrorKind::Busy,
                format!("A {kind} operation is already in progress."),
            ));
        }
        slot.in_flight = true;
        slot.snapshot.control_enabled = false;
        Ok(OperationGuard {
            board: self,
            kind,
            finished: false,
        })
    }

    /// Drops every status not held by a guard back to idle, e.g. after the network changed.
    pub fn reset(&self) {
        let snapshots: Vec<OperationSnapshot> = {
            let mut slots = self.lock();
            slots
                .iter_mut()
                .filter(|(_, slot)| !slot.in_flight)
                .map(|(kind, slot)| {
                    *slot = Slot::idle(*kind);
                    slot.snapshot.clone()
                })
                .collect()
        };
        for snapshot in snapshots {
            self.publish(snapshot);
        }
    }

    /// Updates the status of a held slot; `release` hands the slot back.
    fn set(&self, kind: OperationKind, status: OperationStatus, release: bool) {
        let snapshot = {
            let mut slots = self.lock();
            let slot = slots.entry(kind).or_insert_with(|| Slot::idle(kind));
            if release {
                slot.in_flight = false;
            }
            slot.snapshot.control_enabled = !slot.in_flight;
            slot.snapshot.status = status;
            slot.snapshot.clone()
        };
        debug!(operation = %kind, status = %snapshot.status, "operation status changed");
        self.publish(snapshot);
    }

    fn publish(&self, snapshot: OperationSnapshot) {
        let _ = self.events.send(ControllerEvent::OperationChanged {
            kind: snapshot.kind,
            snapshot,
        });
    }
}

/// Exclusive hold on one operation slot. Dropping it releases the slot and re-enables the control.
pub struct OperationGuard<'a> {
    board: &'a OperationBoard,
    kind: OperationKind,
    finished: bool,
}

impl OperationGuard<'_> {
    pub fn processing(&mut self, message: impl Into<String>) {
        self.board
            .set(self.kind, OperationStatus::Processing(message.into()), false);
    }

    pub fn succeed(mut self, message: impl Into<String>) {
        self.finished = true;
        self.board
            .set(self.kind, OperationStatus::Success(message.into()), true);
    }

    /// Renders `err` as the terminal status and hands it back for returning.
    pub fn fail(mut self, err: WorkflowError) -> WorkflowError {
        self.finished = true;
        self.board
            .set(self.kind, OperationStatus::Error(err.message.clone()), true);
        err
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let interrupted = {
            let mut slots = self.board.lock();
            match slots.get_mut(&self.kind) {
                Some(slot) if slot.snapshot.status.is_processing() => true,
                Some(slot) => {
                    slot.in_flight = false;
                    slot.snapshot.control_enabled = true;
                    false
                }
                None => false,
            }
        };
        if interrupted {
            warn!(operation = %self.kind, "operation dropped before completing");
            self.board.set(
                self.kind,
                OperationStatus::Error("Operation was interrupted.".to_string()),
                true,
            );
        }
    }
}
