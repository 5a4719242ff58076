//! Per-turn consent gate table.
//!
//! Gates are the safety predicates guarding clothing and intimacy-relevant
//! actions. They are computed exactly once per turn, after modifier
//! resolution, and consumed read-only by everything downstream: the
//! effect pipeline, the delta validator, and expressions via
//! `gates.<entity>.<gate>`. One authoritative table per turn means no
//! subsystem ever sees two different answers for the same gate.
//!
//! A gate opens for an entity only when all three hold:
//!
//! 1. the current location's privacy is at or above the gate's floor,
//! 2. no active modifier on the entity lists the gate in
//!    `disallow_gates` (a hard veto, regardless of anything else),
//! 3. the gate's `when` condition holds with `self` bound to the entity.
//!
//! Lookups for pairs outside the table fail closed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::{ContentPack, Privacy};
use crate::ids::{EntityId, GateId};
use crate::rng::TurnRng;
use crate::state::WorldState;
use crate::world_view::WorldView;
use wick::Evaluator;

/// The memoized `(entity, gate) -> open` table for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTable {
    values: BTreeMap<EntityId, BTreeMap<GateId, bool>>,
}

impl GateTable {
    /// Computes the table from post-modifier-resolution state.
    ///
    /// Gate conditions draw from the turn stream like every other
    /// expression, in `(entity, gate)` iteration order.
    #[must_use]
    pub fn compute(content: &ContentPack, state: &WorldState, rng: &mut TurnRng) -> Self {
        let location_privacy = content
            .locations
            .get(&state.position.location)
            .map_or(Privacy::Public, |l| l.privacy);

        let mut values: BTreeMap<EntityId, BTreeMap<GateId, bool>> = BTreeMap::new();
        for entity_id in content.entities.keys() {
            let vetoed: Vec<&GateId> = state
                .active_modifiers(entity_id)
                .iter()
                .filter_map(|m| content.modifiers.get(&m.id))
                .flat_map(|def| def.disallow_gates.iter())
                .collect();

            let mut row = BTreeMap::new();
            for (gate_id, gate) in &content.gates {
                let open = if location_privacy < gate.min_privacy {
                    false
                } else if vetoed.contains(&gate_id) {
                    false
                } else {
                    let view = WorldView::new(state, content).for_subject(entity_id);
                    Evaluator::new(&view, rng).eval_bool(&gate.when)
                };
                row.insert(gate_id.clone(), open);
            }
            values.insert(entity_id.clone(), row);
        }

        Self { values }
    }

    /// Whether a gate is open. Unknown pairs are closed.
    #[must_use]
    pub fn allows(&self, entity: &EntityId, gate: &GateId) -> bool {
        self.values
            .get(entity)
            .and_then(|row| row.get(gate))
            .copied()
            .unwrap_or(false)
    }
}
