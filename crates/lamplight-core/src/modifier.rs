//! Modifier lifecycle: activation, expiry, exclusion, stacking.
//!
//! Each named modifier moves Inactive → Active → Expired. Resolution runs
//! once per turn after all effect batches have applied, in a fixed order:
//!
//! 1. **Expire** modifiers whose duration has elapsed, firing their exit
//!    effects through the pipeline.
//! 2. **Activate** condition-bound modifiers whose `when` holds on the
//!    post-effect state (and expire condition-bound ones whose `when` no
//!    longer holds), firing entry/exit effects.
//! 3. **Exclude**: within an `exclusive_group`, the most recently
//!    activated modifier wins; losers are forced to expire.
//! 4. **Stack**: per stack group, compute the effective behavioral value
//!    (`Highest` / `Additive` / `Multiplicative`) into a per-entity
//!    overlay for the narrative layer.
//!
//! Tie-break for `Highest`: declared priority, then earlier activation
//! turn (sticky), then lexical id. Everything here iterates `BTreeMap`s,
//! so resolution order is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::content::{ContentPack, ModifierDef, Stacking};
use crate::effect::{ApplyReport, Pipeline};
use crate::gate::GateTable;
use crate::ids::{EntityId, ModifierId};
use crate::rng::TurnRng;
use crate::state::{ActiveModifier, WorldState};
use crate::world_view::WorldView;
use wick::Evaluator;

/// Effective behavioral overlay for one entity, keyed by stack group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorOverlay {
    /// `stack group -> effective value`.
    pub values: BTreeMap<String, f64>,
}

/// What one resolution pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifierResolution {
    /// Modifiers that expired (duration, condition release, or exclusion).
    pub expired: Vec<(EntityId, ModifierId)>,
    /// Modifiers newly activated by their conditions.
    pub activated: Vec<(EntityId, ModifierId)>,
    /// Behavioral overlays per entity.
    pub overlays: BTreeMap<EntityId, BehaviorOverlay>,
    /// Outcomes of the entry/exit effects fired during resolution.
    pub report: ApplyReport,
}

/// Runs the per-turn modifier state machine.
pub struct ModifierResolver<'a> {
    content: &'a ContentPack,
}

impl<'a> ModifierResolver<'a> {
    /// Creates a resolver over immutable content.
    #[must_use]
    pub fn new(content: &'a ContentPack) -> Self {
        Self { content }
    }

    /// Resolves modifiers against post-effect state.
    ///
    /// `elapsed_minutes` is the in-world time this turn advanced; timed
    /// modifiers tick down by it.
    pub fn resolve(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        elapsed_minutes: u32,
    ) -> ModifierResolution {
        let mut resolution = ModifierResolution::default();

        self.expire_elapsed(state, gates, pipeline, rng, elapsed_minutes, &mut resolution);
        self.apply_conditions(state, gates, pipeline, rng, &mut resolution);
        self.enforce_exclusion(state, gates, pipeline, rng, &mut resolution);
        resolution.overlays = self.stack_overlays(state);

        resolution
    }

    /// Phase 1: tick durations and expire elapsed modifiers.
    fn expire_elapsed(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        elapsed_minutes: u32,
        resolution: &mut ModifierResolution,
    ) {
        let mut expired = Vec::new();
        for (entity, active) in state.modifiers_mut() {
            for m in active.iter_mut() {
                if let Some(remaining) = m.remaining_minutes.as_mut() {
                    *remaining = remaining.saturating_sub(elapsed_minutes);
                    if *remaining == 0 {
                        expired.push((entity.clone(), m.id.clone()));
                    }
                }
            }
        }
        for (entity, modifier) in expired {
            self.force_expire(state, gates, pipeline, rng, &entity, &modifier, resolution);
        }
    }

    /// Phase 2: condition-bound activation and release.
    fn apply_conditions(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        resolution: &mut ModifierResolution,
    ) {
        for (modifier_id, def) in &self.content.modifiers {
            let (Some(when), Some(subject)) = (&def.when, &def.subject) else {
                continue;
            };
            let holds = {
                let view = WorldView::new(state, self.content)
                    .with_gates(gates)
                    .for_subject(subject);
                Evaluator::new(&view, rng).eval_bool(when)
            };
            let active = state
                .active_modifiers(subject)
                .iter()
                .find(|m| &m.id == modifier_id)
                .cloned();

            match (holds, active) {
                (true, None) => {
                    debug!(entity = %subject, modifier = %modifier_id, "condition activation");
                    state.add_modifier(
                        subject.clone(),
                        ActiveModifier {
                            id: modifier_id.clone(),
                            remaining_minutes: None,
                            activated_turn: state.turn,
                        },
                    );
                    resolution
                        .activated
                        .push((subject.clone(), modifier_id.clone()));
                    let entry = def.entry_effects.clone();
                    resolution
                        .report
                        .absorb(pipeline.apply(&entry, state, gates, rng));
                }
                (false, Some(active)) if active.remaining_minutes.is_none() => {
                    // Condition-bound only; explicitly timed applications
                    // ride out their duration even if the condition lapses.
                    self.force_expire(
                        state, gates, pipeline, rng, subject, modifier_id, resolution,
                    );
                }
                _ => {}
            }
        }
    }

    /// Phase 3: at most one active modifier per exclusive group.
    fn enforce_exclusion(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        resolution: &mut ModifierResolution,
    ) {
        let entities: Vec<EntityId> = state.modified_entities().cloned().collect();
        for entity in entities {
            let mut groups: BTreeMap<String, Vec<ActiveModifier>> = BTreeMap::new();
            for m in state.active_modifiers(&entity) {
                if let Some(def) = self.content.modifiers.get(&m.id) {
                    if let Some(group) = &def.exclusive_group {
                        groups.entry(group.clone()).or_default().push(m.clone());
                    }
                }
            }
            for (group, mut members) in groups {
                if members.len() < 2 {
                    continue;
                }
                // Most recently activated wins; ties fall back to priority
                // then lexical id so the outcome never depends on
                // insertion order.
                members.sort_by(|a, b| {
                    b.activated_turn
                        .cmp(&a.activated_turn)
                        .then_with(|| {
                            let pa = self.priority_of(&a.id);
                            let pb = self.priority_of(&b.id);
                            pb.cmp(&pa)
                        })
                        .then_with(|| a.id.cmp(&b.id))
                });
                debug!(entity = %entity, group, winner = %members[0].id, "exclusion");
                for loser in &members[1..] {
                    self.force_expire(
                        state, gates, pipeline, rng, &entity, &loser.id, resolution,
                    );
                }
            }
        }
    }

    /// Phase 4: stacking overlays.
    fn stack_overlays(&self, state: &WorldState) -> BTreeMap<EntityId, BehaviorOverlay> {
        let mut overlays = BTreeMap::new();
        for entity in state.modified_entities() {
            let mut grouped: BTreeMap<&String, Vec<(&ActiveModifier, &ModifierDef)>> =
                BTreeMap::new();
            for m in state.active_modifiers(entity) {
                if let Some(def) = self.content.modifiers.get(&m.id) {
                    if let Some(group) = &def.stack_group {
                        grouped.entry(group).or_default().push((m, def));
                    }
                }
            }
            if grouped.is_empty() {
                continue;
            }
            let mut overlay = BehaviorOverlay::default();
            for (group, members) in grouped {
                let policy = self
                    .content
                    .stack_groups
                    .get(group)
                    .copied()
                    .unwrap_or(Stacking::Highest);
                let value = match policy {
                    Stacking::Highest => {
                        let mut best = members.clone();
                        best.sort_by(|(am_a, def_a), (am_b, def_b)| {
                            def_b
                                .priority
                                .cmp(&def_a.priority)
                                .then_with(|| am_a.activated_turn.cmp(&am_b.activated_turn))
                                .then_with(|| am_a.id.cmp(&am_b.id))
                        });
                        best[0].1.stack_value
                    }
                    Stacking::Additive => members.iter().map(|(_, d)| d.stack_value).sum(),
                    Stacking::Multiplicative => {
                        members.iter().map(|(_, d)| d.stack_value).product()
                    }
                };
                overlay.values.insert(group.clone(), value);
            }
            overlays.insert(entity.clone(), overlay);
        }
        overlays
    }

    fn priority_of(&self, id: &ModifierId) -> i32 {
        self.content.modifiers.get(id).map_or(0, |d| d.priority)
    }

    #[allow(clippy::too_many_arguments)]
    fn force_expire(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        entity: &EntityId,
        modifier: &ModifierId,
        resolution: &mut ModifierResolution,
    ) {
        if !state.remove_modifier(entity, modifier) {
            return;
        }
        debug!(entity = %entity, modifier = %modifier, "modifier expired");
        resolution.expired.push((entity.clone(), modifier.clone()));
        if let Some(def) = self.content.modifiers.get(modifier) {
            let exit = def.exit_effects.clone();
            resolution
                .report
                .absorb(pipeline.apply(&exit, state, gates, rng));
        }
    }
}
