//! Read-only turn context for the narrative generator.
//!
//! The generator is an untrusted collaborator: it receives a
//! [`TurnEnvelope`] as input and returns prose plus a delta candidate
//! (validated in [`delta`](crate::delta)). The envelope is assembled from
//! current state and never aliases it, so the generator can hold onto it
//! as long as it likes without pinning the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::content::{ChoiceDef, ContentPack};
use crate::ids::{EntityId, LayerId, MeterId, ModifierId, NodeId, OutfitId};
use crate::state::{Clock, LayerState, Position, WorldState};

/// A meter's current value plus its threshold label, when one is declared
/// for that value (`55` in `trust` reads as `friend`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Current value.
    pub value: f64,
    /// Label of the threshold band the value falls in, if any.
    pub label: Option<String>,
}

/// Everything the generator may know about one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterCard {
    /// The character.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Whether the character is at the current location.
    pub present: bool,
    /// Every declared meter, read with defaults applied.
    pub meters: BTreeMap<MeterId, MeterReading>,
    /// Active modifier ids.
    pub modifiers: Vec<ModifierId>,
    /// Outfit currently worn, if the character dresses at all.
    pub outfit: Option<OutfitId>,
    /// Per-layer clothing state.
    pub clothing: BTreeMap<LayerId, LayerState>,
}

/// The read-only context envelope passed to the generator each turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEnvelope {
    /// Turn the envelope describes.
    pub turn: u32,
    /// Current narrative node.
    pub node: NodeId,
    /// Current position.
    pub position: Position,
    /// Current in-world time.
    pub clock: Clock,
    /// One card per declared entity.
    pub cards: Vec<CharacterCard>,
    /// Choices currently on offer (from the most recent fired event).
    pub choices: Vec<ChoiceDef>,
    /// Tail of the run's memory log, newest last.
    pub recent_memory: Vec<String>,
}

impl TurnEnvelope {
    pub(crate) fn assemble(
        content: &ContentPack,
        state: &WorldState,
        choices: &[ChoiceDef],
        memory_tail: usize,
    ) -> Self {
        let roster = content
            .locations
            .get(&state.position.location)
            .map(|l| l.present.as_slice())
            .unwrap_or(&[]);

        let cards = content
            .entities
            .values()
            .map(|entity| {
                let meters = content
                    .meters
                    .values()
                    .map(|def| {
                        let value = state.meter(content, &entity.id, &def.id);
                        let label = def.threshold_label(value).map(str::to_string);
                        (def.id.clone(), MeterReading { value, label })
                    })
                    .collect();
                let clothing = state
                    .outfit(&entity.id)
                    .and_then(|o| content.outfits.get(o))
                    .map(|outfit| {
                        outfit
                            .layers
                            .iter()
                            .filter_map(|l| {
                                state
                                    .layer_state(&entity.id, &l.id)
                                    .map(|s| (l.id.clone(), s))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                CharacterCard {
                    id: entity.id.clone(),
                    name: entity.name.clone(),
                    present: roster.contains(&entity.id),
                    meters,
                    modifiers: state
                        .active_modifiers(&entity.id)
                        .iter()
                        .map(|m| m.id.clone())
                        .collect(),
                    outfit: state.outfit(&entity.id).cloned(),
                    clothing,
                }
            })
            .collect();

        let memory = state.memory_log();
        let recent_memory = memory[memory.len().saturating_sub(memory_tail)..].to_vec();

        Self {
            turn: state.turn,
            node: state.current_node.clone(),
            position: state.position.clone(),
            clock: state.clock.clone(),
            cards,
            choices: choices.to_vec(),
            recent_memory,
        }
    }
}
