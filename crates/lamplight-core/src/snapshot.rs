//! Wholesale state snapshots.
//!
//! A snapshot is everything persistence needs to resume a run
//! byte-for-byte: the full [`WorldState`], the run identity, and the turn
//! counter. The RNG stream needs no separate position record because each
//! turn derives its own stream from `(game_id, run_id, turn)` and
//! snapshots are taken at turn boundaries, where the draw counter is zero
//! by construction.

use serde::{Deserialize, Serialize};

use crate::content::ContentPack;
use crate::error::InvariantViolation;
use crate::state::WorldState;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A versioned, wholesale snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version; readers reject versions they do not know.
    pub version: u32,
    /// Game identity half of the RNG key.
    pub game_id: String,
    /// Run identity half of the RNG key.
    pub run_id: String,
    /// Turn the run will resume at.
    pub turn: u32,
    /// The complete world state.
    pub state: WorldState,
}

impl Snapshot {
    /// Validates the snapshot against content before resuming from it.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation`] on an unknown format version or a
    /// state that breaks the at-rest invariants (which would mean the
    /// snapshot was hand-edited or produced by an incompatible build).
    pub fn validate(&self, content: &ContentPack) -> Result<(), InvariantViolation> {
        if self.version != SNAPSHOT_VERSION {
            return Err(InvariantViolation::new(format!(
                "unknown snapshot version {}, expected {SNAPSHOT_VERSION}",
                self.version
            )));
        }
        if self.turn != self.state.turn {
            return Err(InvariantViolation::new(format!(
                "snapshot turn {} disagrees with state turn {}",
                self.turn, self.state.turn
            )));
        }
        self.state.check_invariants(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityId, MeterId};
    use crate::tests::helpers::sample_content;

    #[test]
    fn snapshot_round_trips_through_json() {
        let content = sample_content();
        let state = WorldState::from_content(&content);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            game_id: "demo".into(),
            run_id: "run-1".into(),
            turn: 0,
            state,
        };

        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
        back.validate(&content).unwrap();
    }

    #[test]
    fn unknown_version_rejected() {
        let content = sample_content();
        let snapshot = Snapshot {
            version: 99,
            game_id: "demo".into(),
            run_id: "run-1".into(),
            turn: 0,
            state: WorldState::from_content(&content),
        };
        assert!(snapshot.validate(&content).is_err());
    }

    #[test]
    fn corrupted_state_rejected() {
        let content = sample_content();
        let mut state = WorldState::from_content(&content);
        state.set_meter(EntityId::new("alex"), MeterId::new("trust"), -40.0);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            game_id: "demo".into(),
            run_id: "run-1".into(),
            turn: 0,
            state,
        };
        assert!(snapshot.validate(&content).is_err());
    }
}
