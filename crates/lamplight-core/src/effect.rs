//! Atomic state mutations and the pipeline that applies them.
//!
//! Every mutation of [`WorldState`] (authored content, event payloads,
//! modifier entry/exit hooks, arc stage hooks, validated external deltas)
//! flows through [`Pipeline::apply`]. There is exactly one code path that
//! writes state, which is what keeps the safety gates authoritative.
//!
//! # Processing order per effect
//!
//! 1. The optional guard expression; false skips the effect (not an error).
//! 2. The consent/privacy gate check for clothing-touching effects; a
//!    closed gate emits a [`Outcome::Refused`] record instead of mutating.
//! 3. The mutation itself, clamped to declared bounds plus the meter's
//!    per-batch change cap.
//! 4. `Conditional` and `Random` recurse into the selected branch;
//!    `Random` draws from the turn stream in depth-first encounter order.
//!
//! A bad reference rejects that single effect and the batch continues:
//! later effects commonly depend on earlier ones having applied, so the
//! batch is deliberately not transactional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::content::{ContentPack, Scalar};
use crate::engine::EngineConfig;
use crate::error::ContentError;
use crate::gate::GateTable;
use crate::ids::{
    EntityId, FlagKey, GateId, ItemId, LayerId, LocationId, MeterId, ModifierId, NodeId, OutfitId,
    SlotId,
};
use crate::rng::TurnRng;
use crate::state::{ActiveModifier, LayerState, WorldState, MINUTES_PER_DAY};
use crate::world_view::WorldView;
use wick::Evaluator;

// =============================================================================
// Effect vocabulary
// =============================================================================

/// Numeric operation on a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOp {
    /// `value += x`
    Add,
    /// `value -= x`
    Subtract,
    /// `value = x`
    Set,
    /// `value *= x`
    Multiply,
    /// `value /= x`
    Divide,
}

/// What gets unlocked by an [`Effect::Unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockKind {
    /// A location becomes reachable.
    Location,
    /// An outfit becomes wearable.
    Outfit,
    /// An event becomes eligible.
    Event,
    /// A choice becomes visible.
    Choice,
}

impl UnlockKind {
    /// Key under which unlocks of this kind are stored.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            UnlockKind::Location => "location",
            UnlockKind::Outfit => "outfit",
            UnlockKind::Event => "event",
            UnlockKind::Choice => "choice",
        }
    }
}

/// One weighted branch of a [`Effect::Random`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomBranch {
    /// Relative weight.
    pub weight: u32,
    /// Effects applied if this branch is selected.
    pub effects: Vec<EffectSpec>,
}

/// The closed set of atomic state mutations.
///
/// A closed enum makes pipeline dispatch a total match: adding an effect
/// kind is a compile-time exercise, not a runtime string-dispatch risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Changes a meter, clamped to its declared bounds.
    MeterChange {
        /// Entity the meter belongs to.
        target: EntityId,
        /// Which meter.
        meter: MeterId,
        /// The operation.
        op: NumericOp,
        /// The operand.
        value: f64,
    },
    /// Sets a flag; the value type must match the declaration.
    FlagSet {
        /// Which flag.
        key: FlagKey,
        /// New value.
        value: Scalar,
    },
    /// Adds items to an inventory.
    InventoryAdd {
        /// Receiving entity.
        owner: EntityId,
        /// Which item.
        item: ItemId,
        /// How many.
        count: u32,
    },
    /// Removes items (clamped at zero; removing more than held is not an
    /// error).
    InventoryRemove {
        /// Holding entity.
        owner: EntityId,
        /// Which item.
        item: ItemId,
        /// How many.
        count: u32,
    },
    /// Equips an item into a slot.
    EquipItem {
        /// The wearer.
        owner: EntityId,
        /// The slot.
        slot: SlotId,
        /// The item; must declare this slot.
        item: ItemId,
    },
    /// Clears a slot.
    UnequipSlot {
        /// The wearer.
        owner: EntityId,
        /// The slot.
        slot: SlotId,
    },
    /// Activates a modifier.
    ApplyModifier {
        /// The entity.
        target: EntityId,
        /// Which modifier.
        modifier: ModifierId,
        /// Explicit duration; falls back to the definition's.
        duration_minutes: Option<u32>,
    },
    /// Deactivates a modifier, firing its exit effects.
    RemoveModifier {
        /// The entity.
        target: EntityId,
        /// Which modifier.
        modifier: ModifierId,
    },
    /// Swaps a character's outfit; every layer of the new outfit starts
    /// intact. Gated like clothing when any target layer names a gate.
    OutfitChange {
        /// The character.
        character: EntityId,
        /// The new outfit.
        outfit: OutfitId,
    },
    /// Sets one clothing layer's state. Consent-gated.
    ClothingSet {
        /// The character.
        character: EntityId,
        /// The layer within the current outfit.
        layer: LayerId,
        /// New state.
        state: LayerState,
    },
    /// Moves to a location (zone follows the location's definition).
    MoveTo {
        /// Destination.
        location: LocationId,
    },
    /// Advances the clock.
    AdvanceTime {
        /// Minutes to advance.
        minutes: u32,
    },
    /// Requests a forced node transition, recorded and resolved at turn
    /// finalization, never acted on mid-batch.
    GotoNode {
        /// Destination node.
        node: NodeId,
    },
    /// Applies one of two branches depending on a condition.
    Conditional {
        /// The condition.
        when: wick::Expr,
        /// Applied when the condition holds.
        then: Vec<EffectSpec>,
        /// Applied otherwise.
        otherwise: Vec<EffectSpec>,
    },
    /// Applies one weighted branch, drawn from the turn stream.
    Random {
        /// The branches.
        branches: Vec<RandomBranch>,
    },
    /// Records an unlock.
    Unlock {
        /// What kind of thing.
        kind: UnlockKind,
        /// Which one.
        id: String,
    },
    /// Appends a line to the run's memory log.
    AppendMemory {
        /// The line.
        text: String,
    },
}

/// An effect plus its optional guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    /// Guard expression; false means skip, not error.
    pub guard: Option<wick::Expr>,
    /// The effect.
    pub kind: Effect,
}

impl EffectSpec {
    /// An unguarded effect.
    #[must_use]
    pub fn new(kind: Effect) -> Self {
        Self { guard: None, kind }
    }

    /// A guarded effect.
    #[must_use]
    pub fn guarded(guard: wick::Expr, kind: Effect) -> Self {
        Self {
            guard: Some(guard),
            kind,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a gated effect was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    /// The closed gate, when one was consulted.
    pub gate: Option<GateId>,
    /// Human-readable reason for the outcome record.
    pub reason: String,
}

/// What happened to one effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The mutation was applied.
    Applied,
    /// The guard was false.
    Skipped,
    /// A consent/privacy gate was closed; nothing mutated.
    Refused(Refusal),
    /// A bad reference or malformed effect; nothing mutated.
    Rejected {
        /// The rejection, stringified for the outcome record.
        reason: String,
    },
}

/// One entry of an [`ApplyReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEffect {
    /// The effect as submitted.
    pub effect: Effect,
    /// What happened to it.
    pub outcome: Outcome,
}

/// Result of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Per-effect outcomes, in application order.
    pub outcomes: Vec<AppliedEffect>,
    /// True when a meter, flag, or modifier changed and the modifier
    /// resolver should re-run.
    pub modifiers_dirty: bool,
    /// Last forced node transition requested in this batch.
    pub goto_request: Option<NodeId>,
    /// Minutes of in-world time this batch advanced.
    pub elapsed_minutes: u32,
}

impl ApplyReport {
    /// Folds another report into this one (used when a turn applies
    /// several batches).
    pub fn absorb(&mut self, other: ApplyReport) {
        self.outcomes.extend(other.outcomes);
        self.modifiers_dirty |= other.modifiers_dirty;
        if other.goto_request.is_some() {
            self.goto_request = other.goto_request;
        }
        self.elapsed_minutes += other.elapsed_minutes;
    }

    /// Count of effects that actually mutated state.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Applied))
            .count()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Tracks per-batch change budgets across recursion.
#[derive(Default)]
struct BatchCtx {
    /// Magnitude of meter change already spent this batch, per meter.
    meter_spent: BTreeMap<(EntityId, MeterId), f64>,
}

/// Applies effect batches to world state.
pub struct Pipeline<'a> {
    content: &'a ContentPack,
    config: &'a EngineConfig,
}

impl<'a> Pipeline<'a> {
    /// Creates a pipeline over immutable content and configuration.
    #[must_use]
    pub fn new(content: &'a ContentPack, config: &'a EngineConfig) -> Self {
        Self { content, config }
    }

    /// Applies a batch of effects in order.
    ///
    /// Partial-failure semantics: a rejected or refused effect never
    /// aborts the remainder of the batch.
    pub fn apply(
        &self,
        effects: &[EffectSpec],
        state: &mut WorldState,
        gates: &GateTable,
        rng: &mut TurnRng,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut batch = BatchCtx::default();
        for spec in effects {
            self.apply_one(spec, state, gates, rng, &mut report, &mut batch, 0);
        }
        report
    }

    #[allow(clippy::too_many_lines, clippy::too_many_arguments)]
    fn apply_one(
        &self,
        spec: &EffectSpec,
        state: &mut WorldState,
        gates: &GateTable,
        rng: &mut TurnRng,
        report: &mut ApplyReport,
        batch: &mut BatchCtx,
        depth: u8,
    ) {
        if depth > self.config.max_effect_depth {
            let err = ContentError::EffectTooDeep {
                limit: self.config.max_effect_depth,
            };
            warn!(%err, "rejecting effect");
            report.outcomes.push(AppliedEffect {
                effect: spec.kind.clone(),
                outcome: Outcome::Rejected {
                    reason: err.to_string(),
                },
            });
            return;
        }

        if let Some(guard) = &spec.guard {
            let view = WorldView::new(state, self.content).with_gates(gates);
            if !Evaluator::new(&view, rng).eval_bool(guard) {
                report.outcomes.push(AppliedEffect {
                    effect: spec.kind.clone(),
                    outcome: Outcome::Skipped,
                });
                return;
            }
        }

        match &spec.kind {
            Effect::Conditional {
                when,
                then,
                otherwise,
            } => {
                let branch = {
                    let view = WorldView::new(state, self.content).with_gates(gates);
                    if Evaluator::new(&view, rng).eval_bool(when) {
                        then
                    } else {
                        otherwise
                    }
                };
                for inner in branch {
                    self.apply_one(inner, state, gates, rng, report, batch, depth + 1);
                }
            }
            Effect::Random { branches } => {
                let weights: Vec<u32> = branches.iter().map(|b| b.weight).collect();
                match rng.weighted_index(&weights) {
                    Some(i) => {
                        for inner in &branches[i].effects {
                            self.apply_one(inner, state, gates, rng, report, batch, depth + 1);
                        }
                    }
                    None => {
                        let err = ContentError::EmptyRandom;
                        warn!(%err, "rejecting effect");
                        report.outcomes.push(AppliedEffect {
                            effect: spec.kind.clone(),
                            outcome: Outcome::Rejected {
                                reason: err.to_string(),
                            },
                        });
                    }
                }
            }
            leaf => {
                let outcome = self.apply_leaf(leaf, state, gates, rng, report, batch, depth);
                if let Outcome::Rejected { reason } = &outcome {
                    warn!(reason, "rejecting effect");
                }
                report.outcomes.push(AppliedEffect {
                    effect: leaf.clone(),
                    outcome,
                });
            }
        }
    }

    #[allow(clippy::too_many_lines, clippy::too_many_arguments)]
    fn apply_leaf(
        &self,
        effect: &Effect,
        state: &mut WorldState,
        gates: &GateTable,
        rng: &mut TurnRng,
        report: &mut ApplyReport,
        batch: &mut BatchCtx,
        depth: u8,
    ) -> Outcome {
        match effect {
            Effect::MeterChange {
                target,
                meter,
                op,
                value,
            } => match self.meter_change(state, batch, target, meter, *op, *value) {
                Ok(()) => {
                    report.modifiers_dirty = true;
                    Outcome::Applied
                }
                Err(err) => Outcome::Rejected {
                    reason: err.to_string(),
                },
            },
            Effect::FlagSet { key, value } => {
                let Some(def) = self.content.flags.get(key) else {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownFlag(key.clone()).to_string(),
                    };
                };
                if value.kind() != def.kind {
                    return Outcome::Rejected {
                        reason: ContentError::FlagTypeMismatch {
                            key: key.clone(),
                            expected: def.kind,
                            got: value.kind(),
                        }
                        .to_string(),
                    };
                }
                debug!(flag = %key, "flag set");
                state.set_flag(key.clone(), value.clone());
                report.modifiers_dirty = true;
                Outcome::Applied
            }
            Effect::InventoryAdd { owner, item, count } => {
                if let Err(err) = self.check_entity(owner).and(self.check_item(item)) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                state.add_items(owner.clone(), item.clone(), *count);
                Outcome::Applied
            }
            Effect::InventoryRemove { owner, item, count } => {
                if let Err(err) = self.check_entity(owner).and(self.check_item(item)) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                state.remove_items(owner, item, *count);
                Outcome::Applied
            }
            Effect::EquipItem { owner, slot, item } => {
                if let Err(err) = self.check_entity(owner).and(self.check_item(item)) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                let declared = self.content.items.get(item).and_then(|d| d.slot.as_ref());
                if declared != Some(slot) {
                    return Outcome::Rejected {
                        reason: ContentError::SlotMismatch {
                            item: item.clone(),
                            slot: slot.clone(),
                        }
                        .to_string(),
                    };
                }
                state.set_equipped(owner.clone(), slot.clone(), Some(item.clone()));
                Outcome::Applied
            }
            Effect::UnequipSlot { owner, slot } => {
                if let Err(err) = self.check_entity(owner) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                state.set_equipped(owner.clone(), slot.clone(), None);
                Outcome::Applied
            }
            Effect::ApplyModifier {
                target,
                modifier,
                duration_minutes,
            } => {
                if let Err(err) = self.check_entity(target) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                let Some(def) = self.content.modifiers.get(modifier) else {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownModifier(modifier.clone()).to_string(),
                    };
                };
                let newly_active = !state.has_modifier(target, modifier);
                state.add_modifier(
                    target.clone(),
                    ActiveModifier {
                        id: modifier.clone(),
                        remaining_minutes: duration_minutes.or(def.duration_minutes),
                        activated_turn: state.turn,
                    },
                );
                report.modifiers_dirty = true;
                if newly_active {
                    debug!(entity = %target, modifier = %modifier, "modifier activated");
                    let entry = def.entry_effects.clone();
                    for inner in &entry {
                        self.apply_one(inner, state, gates, rng, report, batch, depth + 1);
                    }
                }
                Outcome::Applied
            }
            Effect::RemoveModifier { target, modifier } => {
                if !self.content.modifiers.contains_key(modifier) {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownModifier(modifier.clone()).to_string(),
                    };
                }
                if state.remove_modifier(target, modifier) {
                    report.modifiers_dirty = true;
                    debug!(entity = %target, modifier = %modifier, "modifier removed");
                    if let Some(def) = self.content.modifiers.get(modifier) {
                        let exit = def.exit_effects.clone();
                        for inner in &exit {
                            self.apply_one(inner, state, gates, rng, report, batch, depth + 1);
                        }
                    }
                }
                Outcome::Applied
            }
            Effect::OutfitChange { character, outfit } => {
                if let Err(err) = self.check_entity(character) {
                    return Outcome::Rejected {
                        reason: err.to_string(),
                    };
                }
                let Some(def) = self.content.outfits.get(outfit) else {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownOutfit(outfit.clone()).to_string(),
                    };
                };
                for layer in &def.layers {
                    if let Some(gate) = &layer.required_gate {
                        if !gates.allows(character, gate) {
                            return Outcome::Refused(Refusal {
                                gate: Some(gate.clone()),
                                reason: format!(
                                    "outfit `{outfit}` layer `{}` requires gate `{gate}`",
                                    layer.id
                                ),
                            });
                        }
                    }
                }
                state.set_outfit(
                    character.clone(),
                    outfit.clone(),
                    def.layers.iter().map(|l| l.id.clone()),
                );
                Outcome::Applied
            }
            Effect::ClothingSet {
                character,
                layer,
                state: new_state,
            } => self.clothing_set(state, gates, character, layer, *new_state),
            Effect::MoveTo { location } => {
                let Some(def) = self.content.locations.get(location) else {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownLocation(location.clone()).to_string(),
                    };
                };
                debug!(location = %location, "moved");
                state.position.zone = def.zone.clone();
                state.position.location = def.id.clone();
                Outcome::Applied
            }
            Effect::AdvanceTime { minutes } => {
                let mut minute = state.clock.minute_of_day + minutes;
                while minute >= MINUTES_PER_DAY {
                    minute -= MINUTES_PER_DAY;
                    state.clock.day += 1;
                }
                state.clock.minute_of_day = minute;
                if let Some(slot) = self.content.slot_at(minute) {
                    state.clock.slot = slot.id.clone();
                }
                report.elapsed_minutes += minutes;
                Outcome::Applied
            }
            Effect::GotoNode { node } => {
                if !self.content.nodes.contains_key(node) {
                    return Outcome::Rejected {
                        reason: ContentError::UnknownNode(node.clone()).to_string(),
                    };
                }
                // Recorded only; the turn's transition-resolution step
                // decides which request wins.
                report.goto_request = Some(node.clone());
                Outcome::Applied
            }
            Effect::Unlock { kind, id } => {
                state.unlock(kind.key().to_string(), id.clone());
                Outcome::Applied
            }
            Effect::AppendMemory { text } => {
                state.append_memory(text.clone());
                Outcome::Applied
            }
            Effect::Conditional { .. } | Effect::Random { .. } => {
                unreachable!("containers are handled in apply_one")
            }
        }
    }

    fn meter_change(
        &self,
        state: &mut WorldState,
        batch: &mut BatchCtx,
        target: &EntityId,
        meter: &MeterId,
        op: NumericOp,
        value: f64,
    ) -> Result<(), ContentError> {
        self.check_entity(target)?;
        let def = self
            .content
            .meters
            .get(meter)
            .ok_or_else(|| ContentError::UnknownMeter(meter.clone()))?;

        let before = state.meter(self.content, target, meter);
        let proposed = match op {
            NumericOp::Add => before + value,
            NumericOp::Subtract => before - value,
            NumericOp::Set => value,
            NumericOp::Multiply => before * value,
            NumericOp::Divide => {
                if value == 0.0 {
                    return Err(ContentError::DivisionByZero(meter.clone()));
                }
                before / value
            }
        };

        // Absolute clamp first, then the per-batch change budget.
        let clamped = proposed.clamp(def.min, def.max);
        let mut delta = clamped - before;
        if let Some(cap) = def.delta_cap_per_turn {
            let key = (target.clone(), meter.clone());
            let spent = batch.meter_spent.get(&key).copied().unwrap_or(0.0);
            let remaining = (cap - spent).max(0.0);
            delta = delta.clamp(-remaining, remaining);
            batch.meter_spent.insert(key, spent + delta.abs());
        }

        let after = before + delta;
        debug!(entity = %target, meter = %meter, before, after, "meter change");
        state.set_meter(target.clone(), meter.clone(), after);
        Ok(())
    }

    fn clothing_set(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        character: &EntityId,
        layer: &LayerId,
        new_state: LayerState,
    ) -> Outcome {
        if let Err(err) = self.check_entity(character) {
            return Outcome::Rejected {
                reason: err.to_string(),
            };
        }
        let layer_def = state
            .outfit(character)
            .and_then(|o| self.content.outfits.get(o))
            .and_then(|o| o.layer(layer));
        let Some(layer_def) = layer_def else {
            return Outcome::Rejected {
                reason: ContentError::UnknownLayer {
                    character: character.clone(),
                    layer: layer.clone(),
                }
                .to_string(),
            };
        };

        match &layer_def.required_gate {
            Some(gate) => {
                if !gates.allows(character, gate) {
                    return Outcome::Refused(Refusal {
                        gate: Some(gate.clone()),
                        reason: format!("layer `{layer}` requires gate `{gate}`"),
                    });
                }
            }
            None => {
                let privacy = self
                    .content
                    .locations
                    .get(&state.position.location)
                    .map_or(crate::content::Privacy::Public, |l| l.privacy);
                if privacy < self.config.ungated_clothing_min_privacy
                    && new_state != LayerState::Intact
                {
                    return Outcome::Refused(Refusal {
                        gate: None,
                        reason: format!(
                            "location `{}` is not private enough",
                            state.position.location
                        ),
                    });
                }
            }
        }

        state.set_layer_state(character.clone(), layer.clone(), new_state);
        Outcome::Applied
    }

    fn check_entity(&self, entity: &EntityId) -> Result<(), ContentError> {
        if self.content.entities.contains_key(entity) {
            Ok(())
        } else {
            Err(ContentError::UnknownEntity(entity.clone()))
        }
    }

    fn check_item(&self, item: &ItemId) -> Result<(), ContentError> {
        if self.content.items.contains_key(item) {
            Ok(())
        } else {
            Err(ContentError::UnknownItem(item.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{engine_config, sample_content, turn_rng};

    fn setup() -> (ContentPack, WorldState, GateTable, EngineConfig) {
        let content = sample_content();
        let state = WorldState::from_content(&content);
        (content, state, GateTable::default(), engine_config())
    }

    fn alex() -> EntityId {
        EntityId::new("alex")
    }

    fn trust() -> MeterId {
        MeterId::new("trust")
    }

    mod meter_tests {
        use super::*;

        #[test]
        fn add_moves_meter() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::MeterChange {
                    target: alex(),
                    meter: trust(),
                    op: NumericOp::Add,
                    value: 10.0,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(report.applied_count(), 1);
            assert!(report.modifiers_dirty);
            assert_eq!(state.meter(&content, &alex(), &trust()), 55.0);
        }

        #[test]
        fn add_clamps_at_max() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            pipeline.apply(
                &[EffectSpec::new(Effect::MeterChange {
                    target: alex(),
                    meter: trust(),
                    op: NumericOp::Add,
                    value: 60.0,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(state.meter(&content, &alex(), &trust()), 100.0);
        }

        #[test]
        fn subtract_clamps_at_min() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            pipeline.apply(
                &[EffectSpec::new(Effect::MeterChange {
                    target: alex(),
                    meter: trust(),
                    op: NumericOp::Subtract,
                    value: 500.0,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(state.meter(&content, &alex(), &trust()), 0.0);
        }

        #[test]
        fn divide_by_zero_rejected() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::MeterChange {
                    target: alex(),
                    meter: trust(),
                    op: NumericOp::Divide,
                    value: 0.0,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
            assert_eq!(state.meter(&content, &alex(), &trust()), 45.0);
        }

        #[test]
        fn delta_cap_limits_batch_change() {
            // `desire` declares delta_cap_per_turn = 15.
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let desire = MeterId::new("desire");
            pipeline.apply(
                &[
                    EffectSpec::new(Effect::MeterChange {
                        target: alex(),
                        meter: desire.clone(),
                        op: NumericOp::Add,
                        value: 10.0,
                    }),
                    EffectSpec::new(Effect::MeterChange {
                        target: alex(),
                        meter: desire.clone(),
                        op: NumericOp::Add,
                        value: 10.0,
                    }),
                ],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            // 10 applies, then only 5 of the second 10.
            assert_eq!(state.meter(&content, &alex(), &desire), 15.0);
        }

        #[test]
        fn unknown_meter_rejected_batch_continues() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[
                    EffectSpec::new(Effect::MeterChange {
                        target: alex(),
                        meter: MeterId::new("charm"),
                        op: NumericOp::Add,
                        value: 5.0,
                    }),
                    EffectSpec::new(Effect::MeterChange {
                        target: alex(),
                        meter: trust(),
                        op: NumericOp::Add,
                        value: 5.0,
                    }),
                ],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
            assert_eq!(state.meter(&content, &alex(), &trust()), 50.0);
        }
    }

    mod guard_tests {
        use super::*;

        #[test]
        fn false_guard_skips() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::guarded(
                    wick::parse("meters.alex.trust >= 90").unwrap(),
                    Effect::MeterChange {
                        target: alex(),
                        meter: trust(),
                        op: NumericOp::Add,
                        value: 10.0,
                    },
                )],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(report.outcomes[0].outcome, Outcome::Skipped));
            assert_eq!(state.meter(&content, &alex(), &trust()), 45.0);
        }

        #[test]
        fn true_guard_applies() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::guarded(
                    wick::parse("meters.alex.trust >= 40").unwrap(),
                    Effect::MeterChange {
                        target: alex(),
                        meter: trust(),
                        op: NumericOp::Add,
                        value: 10.0,
                    },
                )],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(report.applied_count(), 1);
            assert_eq!(state.meter(&content, &alex(), &trust()), 55.0);
        }
    }

    mod flag_tests {
        use super::*;

        #[test]
        fn typed_write_applies() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            pipeline.apply(
                &[EffectSpec::new(Effect::FlagSet {
                    key: FlagKey::new("alex.met"),
                    value: Scalar::Bool(true),
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(
                state.flag(&FlagKey::new("alex.met")),
                Some(&Scalar::Bool(true))
            );
            let _ = content;
        }

        #[test]
        fn mismatched_type_rejected() {
            let (_content, mut state, gates, config) = setup();
            let content = sample_content();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::FlagSet {
                    key: FlagKey::new("alex.met"),
                    value: Scalar::Num(1.0),
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
            assert_eq!(
                state.flag(&FlagKey::new("alex.met")),
                Some(&Scalar::Bool(false)),
                "silent coercion is exactly what the schema exists to prevent"
            );
        }

        #[test]
        fn undeclared_flag_rejected() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::FlagSet {
                    key: FlagKey::new("never.declared"),
                    value: Scalar::Bool(true),
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
        }
    }

    mod clothing_tests {
        use super::*;
        use crate::ids::{LocationId, ZoneId};

        #[test]
        fn gated_layer_refused_when_gate_closed() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::ClothingSet {
                    character: alex(),
                    layer: LayerId::new("top"),
                    state: LayerState::Removed,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            let Outcome::Refused(refusal) = &report.outcomes[0].outcome else {
                panic!("expected refusal, got {:?}", report.outcomes[0].outcome);
            };
            assert_eq!(refusal.gate, Some(GateId::new("accept_undress")));
            assert_eq!(
                state.layer_state(&alex(), &LayerId::new("top")),
                Some(LayerState::Intact),
                "a refused effect must not mutate"
            );
        }

        #[test]
        fn gated_layer_applies_when_gate_open() {
            let (content, mut state, _gates, config) = setup();
            state.set_meter(alex(), trust(), 95.0);
            state.position = crate::state::Position {
                zone: ZoneId::new("apartment"),
                location: LocationId::new("bedroom"),
            };
            let gates = GateTable::compute(&content, &state, &mut turn_rng());
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::ClothingSet {
                    character: alex(),
                    layer: LayerId::new("top"),
                    state: LayerState::Displaced,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(report.applied_count(), 1);
            assert_eq!(
                state.layer_state(&alex(), &LayerId::new("top")),
                Some(LayerState::Displaced)
            );
        }

        #[test]
        fn ungated_layer_needs_privacy() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            // `shoes` has no gate; the cafe is public.
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::ClothingSet {
                    character: alex(),
                    layer: LayerId::new("shoes"),
                    state: LayerState::Removed,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Refused(Refusal { gate: None, .. })
            ));
        }

        #[test]
        fn unknown_layer_rejected() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::ClothingSet {
                    character: alex(),
                    layer: LayerId::new("cape"),
                    state: LayerState::Removed,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
        }
    }

    mod container_tests {
        use super::*;

        #[test]
        fn conditional_picks_branch_on_live_state() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[
                    EffectSpec::new(Effect::MeterChange {
                        target: alex(),
                        meter: trust(),
                        op: NumericOp::Set,
                        value: 80.0,
                    }),
                    EffectSpec::new(Effect::Conditional {
                        when: wick::parse("meters.alex.trust >= 70").unwrap(),
                        then: vec![EffectSpec::new(Effect::FlagSet {
                            key: FlagKey::new("alex.met"),
                            value: Scalar::Bool(true),
                        })],
                        otherwise: vec![],
                    }),
                ],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            // Later effects see earlier effects' writes.
            assert_eq!(report.applied_count(), 2);
            assert_eq!(
                state.flag(&FlagKey::new("alex.met")),
                Some(&Scalar::Bool(true))
            );
        }

        #[test]
        fn random_draws_deterministically() {
            let run = |seed_turn: u32| {
                let (content, mut state, gates, config) = setup();
                let pipeline = Pipeline::new(&content, &config);
                let mut rng = TurnRng::for_turn("game", "run", seed_turn);
                pipeline.apply(
                    &[EffectSpec::new(Effect::Random {
                        branches: vec![
                            RandomBranch {
                                weight: 70,
                                effects: vec![EffectSpec::new(Effect::MeterChange {
                                    target: EntityId::new("alex"),
                                    meter: MeterId::new("trust"),
                                    op: NumericOp::Add,
                                    value: 1.0,
                                })],
                            },
                            RandomBranch {
                                weight: 30,
                                effects: vec![EffectSpec::new(Effect::MeterChange {
                                    target: EntityId::new("alex"),
                                    meter: MeterId::new("trust"),
                                    op: NumericOp::Subtract,
                                    value: 1.0,
                                })],
                            },
                        ],
                    })],
                    &mut state,
                    &gates,
                    &mut rng,
                );
                state.meter(&content, &EntityId::new("alex"), &MeterId::new("trust"))
            };
            assert_eq!(run(3), run(3));
        }

        #[test]
        fn zero_weight_random_rejected() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::Random {
                    branches: vec![RandomBranch {
                        weight: 0,
                        effects: vec![],
                    }],
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(matches!(
                report.outcomes[0].outcome,
                Outcome::Rejected { .. }
            ));
        }

        #[test]
        fn runaway_nesting_rejected() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            // Build nesting deeper than the cap.
            let mut spec = EffectSpec::new(Effect::FlagSet {
                key: FlagKey::new("alex.met"),
                value: Scalar::Bool(true),
            });
            for _ in 0..=config.max_effect_depth {
                spec = EffectSpec::new(Effect::Conditional {
                    when: wick::parse("true").unwrap(),
                    then: vec![spec],
                    otherwise: vec![],
                });
            }
            let report = pipeline.apply(&[spec], &mut state, &gates, &mut turn_rng());
            assert!(report
                .outcomes
                .iter()
                .any(|o| matches!(o.outcome, Outcome::Rejected { .. })));
        }
    }

    mod bookkeeping_tests {
        use super::*;
        use crate::ids::NodeId;

        #[test]
        fn goto_is_recorded_not_applied() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::GotoNode {
                    node: NodeId::new("confession"),
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(report.goto_request, Some(NodeId::new("confession")));
            assert_eq!(state.current_node, NodeId::new("start"));
        }

        #[test]
        fn advance_time_rolls_day_and_slot() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            let start_day = state.clock.day;
            let report = pipeline.apply(
                &[EffectSpec::new(Effect::AdvanceTime { minutes: 1500 })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert_eq!(state.clock.day, start_day + 1);
            assert_eq!(report.elapsed_minutes, 1500);
            let _ = content;
        }

        #[test]
        fn apply_modifier_fires_entry_effects() {
            let (content, mut state, gates, config) = setup();
            let pipeline = Pipeline::new(&content, &config);
            // `confident` entry effects raise desire by 5.
            pipeline.apply(
                &[EffectSpec::new(Effect::ApplyModifier {
                    target: alex(),
                    modifier: ModifierId::new("confident"),
                    duration_minutes: None,
                })],
                &mut state,
                &gates,
                &mut turn_rng(),
            );
            assert!(state.has_modifier(&alex(), &ModifierId::new("confident")));
            assert_eq!(
                state.meter(&content, &alex(), &MeterId::new("desire")),
                5.0
            );
        }
    }
}
