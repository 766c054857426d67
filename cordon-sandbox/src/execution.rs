//! Instance identity and the per-execution state machine

use serde::{Deserialize, Serialize};

/// Process-unique identifier of one sandbox instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub uuid::Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Name used for temp paths and named isolation boundaries
    pub fn name(&self) -> String {
        format!("cordon-{}", self.0.simple())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution phase
///
/// `Created -> Spawned -> {Completed | TimedOut -> Killed | SpawnError} -> Reaped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Created,
    Spawned,
    Completed,
    TimedOut,
    Killed,
    SpawnError,
    Reaped,
}

impl ExecutionPhase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (Created, Spawned)
                | (Created, SpawnError)
                | (Spawned, Completed)
                | (Spawned, TimedOut)
                | (TimedOut, Killed)
                | (Completed, Reaped)
                | (Killed, Reaped)
                | (SpawnError, Reaped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutionPhase::Reaped
    }
}

/// Tracks one execution through its phases, logging each transition.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    instance: InstanceId,
    phase: ExecutionPhase,
}

impl PhaseTracker {
    pub(crate) fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            phase: ExecutionPhase::Created,
        }
    }

    pub(crate) fn advance(&mut self, next: ExecutionPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::trace!(instance = %self.instance, from = ?self.phase, to = ?next, "Execution phase");
        self.phase = next;
    }
}
