use crate::transfer::error::{TransferError, TransferResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Named phases of one sender, receiver or broadcast run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    /// Metadata sent (sender) or received (receiver)
    Announcing,
    /// Waiting on backpressure / reading chunk `index`
    Sending { index: u32 },
    /// Chunk `index` is out, its acknowledgment is pending
    AwaitingAck { index: u32 },
    /// Receiver holds `received` chunks so far
    Receiving { received: u32 },
    Finalizing,
    Completed,
    Failed { error: String },
    Cancelled,
}

impl TransferPhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, TransferPhase::Idle) && !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferPhase::Completed | TransferPhase::Failed { .. } | TransferPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub enum PhaseEvent {
    Announce,
    ChunkStarted { index: u32 },
    ChunkSent { index: u32 },
    ChunkReceived { received: u32 },
    Finalize,
    Complete,
    Fail { error: String },
    Cancel,
    Reset,
}

/// Shared, validated phase of one transfer. Clones observe the same phase.
#[derive(Clone)]
pub struct TransferStateMachine {
    phase: Arc<RwLock<TransferPhase>>,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(RwLock::new(TransferPhase::Idle)),
        }
    }

    /// Get current phase
    pub fn current(&self) -> TransferPhase {
        self.phase.read().clone()
    }

    /// Apply an event, rejecting transitions the protocol does not allow
    pub fn transition(&self, event: PhaseEvent) -> TransferResult<TransferPhase> {
        let mut phase = self.phase.write();

        let next = match (&*phase, &event) {
            // A new transfer may start from rest or after a previous one ended
            (TransferPhase::Idle, PhaseEvent::Announce) => TransferPhase::Announcing,
            (p, PhaseEvent::Announce) if p.is_terminal() => TransferPhase::Announcing,

            // Sender loop
            (
                TransferPhase::Announcing | TransferPhase::AwaitingAck { .. },
                PhaseEvent::ChunkStarted { index },
            ) => TransferPhase::Sending { index: *index },
            (TransferPhase::Sending { index: current }, PhaseEvent::ChunkSent { index })
                if current == index =>
            {
                TransferPhase::AwaitingAck { index: *index }
            }

            // Receiver loop
            (
                TransferPhase::Announcing | TransferPhase::Receiving { .. },
                PhaseEvent::ChunkReceived { received },
            ) => TransferPhase::Receiving {
                received: *received,
            },

            (
                TransferPhase::Announcing
                | TransferPhase::AwaitingAck { .. }
                | TransferPhase::Receiving { .. },
                PhaseEvent::Finalize,
            ) => TransferPhase::Finalizing,

            (TransferPhase::Finalizing, PhaseEvent::Complete) => TransferPhase::Completed,

            (p, PhaseEvent::Fail { error }) if !p.is_terminal() => TransferPhase::Failed {
                error: error.clone(),
            },

            (p, PhaseEvent::Cancel) if !p.is_terminal() => TransferPhase::Cancelled,

            (_, PhaseEvent::Reset) => TransferPhase::Idle,

            // Invalid transition
            _ => {
                return Err(TransferError::InvalidStateTransition(format!(
                    "Cannot handle {:?} in phase {:?}",
                    event, *phase
                )));
            }
        };

        *phase = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_creation() {
        let sm = TransferStateMachine::new();
        assert_eq!(sm.current(), TransferPhase::Idle);
        assert!(!sm.current().is_active());
    }

    #[test]
    fn test_sender_sequence() {
        let sm = TransferStateMachine::new();
        sm.transition(PhaseEvent::Announce).unwrap();
        for index in 0..3 {
            sm.transition(PhaseEvent::ChunkStarted { index }).unwrap();
            sm.transition(PhaseEvent::ChunkSent { index }).unwrap();
            assert_eq!(sm.current(), TransferPhase::AwaitingAck { index });
        }
        sm.transition(PhaseEvent::Finalize).unwrap();
        sm.transition(PhaseEvent::Complete).unwrap();
        assert!(sm.current().is_terminal());
    }

    #[test]
    fn test_receiver_sequence() {
        let sm = TransferStateMachine::new();
        sm.transition(PhaseEvent::Announce).unwrap();
        sm.transition(PhaseEvent::ChunkReceived { received: 1 }).unwrap();
        sm.transition(PhaseEvent::ChunkReceived { received: 2 }).unwrap();
        sm.transition(PhaseEvent::Finalize).unwrap();
        sm.transition(PhaseEvent::Complete).unwrap();
        assert_eq!(sm.current(), TransferPhase::Completed);
    }

    #[test]
    fn test_empty_file_goes_straight_to_finalize() {
        let sm = TransferStateMachine::new();
        sm.transition(PhaseEvent::Announce).unwrap();
        sm.transition(PhaseEvent::Finalize).unwrap();
        sm.transition(PhaseEvent::Complete).unwrap();
        assert_eq!(sm.current(), TransferPhase::Completed);
    }

    #[test]
    fn test_mismatched_chunk_index_rejected() {
        let sm = TransferStateMachine::new();
        sm.transition(PhaseEvent::Announce).unwrap();
        sm.transition(PhaseEvent::ChunkStarted { index: 0 }).unwrap();
        let result = sm.transition(PhaseEvent::ChunkSent { index: 1 });
        assert!(matches!(
            result,
            Err(TransferError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_cancel() {
        let sm = TransferStateMachine::new();
        sm.transition(PhaseEvent::Announce).unwrap();
        sm.transition(PhaseEvent::Cancel).unwrap();
        assert_eq!(sm.current(), TransferPhase::Cancelled);

        // Terminal phases stay put until a new announce or reset
        assert!(sm.transition(PhaseEvent::Cancel).is_err());
        sm.transition(PhaseEvent::Announce).unwrap();
        assert_eq!(sm.current(), TransferPhase::Announcing);
    }

    #[test]
    fn test_invalid_transition() {
        let sm = TransferStateMachine::new();

        // Cannot finalize from Idle
        let result = sm.transition(PhaseEvent::Finalize);
        assert!(result.is_err());
    }

    #[test]
    fn test_clones_share_phase() {
        let sm = TransferStateMachine::new();
        let observer = sm.clone();
        sm.transition(PhaseEvent::Announce).unwrap();
        assert_eq!(observer.current(), TransferPhase::Announcing);
    }
}
