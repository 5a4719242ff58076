//! Per-turn event selection.
//!
//! The scheduler runs exactly once per turn, after node-entry effects and
//! before arc evaluation, and picks at most one winner by a total,
//! replayable order:
//!
//! 1. Build the eligible set: scope matches the current location/zone,
//!    cooldown elapsed, `once`/`max_fires` unviolated, trigger true.
//! 2. Per pool (in pool-id order): if the pool has eligible members and
//!    its `chance_per_turn` draw succeeds, draw one member by weight.
//! 3. Merge scheduled, conditional, and pool winners into one candidate
//!    list.
//! 4. If any candidate interrupts, only interrupts compete. Highest
//!    priority wins; ties break by category (scheduled > conditional >
//!    pool), then lexical id.
//! 5. The winner's effects flow through the pipeline; fire counts and
//!    cooldowns are recorded; `narrative`/`choices` are surfaced
//!    unmodified.
//!
//! Conditional triggers are evaluated in event-id order and pool draws in
//! pool-id order, so the turn stream is consumed identically on every
//! replay.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::content::{ChoiceDef, ContentPack, EventDef, EventScope, Trigger};
use crate::effect::{ApplyReport, Pipeline};
use crate::gate::GateTable;
use crate::ids::EventId;
use crate::rng::TurnRng;
use crate::state::WorldState;
use crate::world_view::WorldView;
use wick::Evaluator;

/// Trigger category, in tie-break precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
enum Category {
    Scheduled,
    Conditional,
    Pool,
}

/// The event that fired this turn, with its narrative payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredEvent {
    /// Which event.
    pub id: EventId,
    /// Narrative payload, passed through unmodified.
    pub narrative: Option<String>,
    /// Choices, passed through unmodified.
    pub choices: Vec<ChoiceDef>,
}

/// Selects and fires at most one event per turn.
pub struct EventScheduler<'a> {
    content: &'a ContentPack,
}

impl<'a> EventScheduler<'a> {
    /// Creates a scheduler over immutable content.
    #[must_use]
    pub fn new(content: &'a ContentPack) -> Self {
        Self { content }
    }

    /// Runs selection against current state, applying the winner's
    /// effects through `pipeline`.
    pub fn select_and_fire(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
    ) -> Option<(FiredEvent, ApplyReport)> {
        let mut candidates: Vec<(&EventDef, Category)> = Vec::new();

        // Scheduled and conditional events, in id order.
        for def in self.content.events.values() {
            if !self.base_eligible(def, state) {
                continue;
            }
            match &def.trigger {
                Trigger::Scheduled { day, slots } => {
                    let day_ok = day.map_or(true, |d| d == state.clock.day);
                    let slot_ok = slots.is_empty() || slots.contains(&state.clock.slot);
                    if day_ok && slot_ok {
                        candidates.push((def, Category::Scheduled));
                    }
                }
                Trigger::Conditional { when } => {
                    let view = WorldView::new(state, self.content).with_gates(gates);
                    if Evaluator::new(&view, rng).eval_bool(when) {
                        candidates.push((def, Category::Conditional));
                    }
                }
                Trigger::Pool { .. } => {} // handled below
            }
        }

        // Pool winners, in pool-id order.
        for (pool_id, pool) in &self.content.pools {
            let members: Vec<&EventDef> = self
                .content
                .events
                .values()
                .filter(|def| {
                    matches!(&def.trigger, Trigger::Pool { pool } if pool == pool_id)
                        && self.base_eligible(def, state)
                })
                .collect();
            if members.is_empty() {
                // No draw on an empty pool: the stream position must not
                // depend on how many pools happen to be exhausted.
                continue;
            }
            if !rng.bernoulli(pool.chance_per_turn) {
                continue;
            }
            let weights: Vec<u32> = members.iter().map(|m| m.weight).collect();
            if let Some(i) = rng.weighted_index(&weights) {
                candidates.push((members[i], Category::Pool));
            }
        }

        if candidates.iter().any(|(def, _)| def.interrupt) {
            candidates.retain(|(def, _)| def.interrupt);
        }

        // Highest priority; ties by category, then lexical id.
        candidates.sort_by(|(a, ca), (b, cb)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| ca.cmp(cb))
                .then_with(|| a.id.cmp(&b.id))
        });

        let (winner, category) = candidates.into_iter().next()?;
        debug!(event = %winner.id, ?category, "event fired");

        let report = pipeline.apply(&winner.effects, state, gates, rng);
        let cooldown_until = (winner.cooldown_turns > 0).then(|| state.turn + winner.cooldown_turns);
        state.record_event_fire(winner.id.clone(), cooldown_until);

        Some((
            FiredEvent {
                id: winner.id.clone(),
                narrative: winner.narrative.clone(),
                choices: winner.choices.clone(),
            },
            report,
        ))
    }

    /// Scope, cooldown, and fire-count eligibility shared by all trigger
    /// kinds.
    fn base_eligible(&self, def: &EventDef, state: &WorldState) -> bool {
        let scope_ok = match &def.scope {
            EventScope::Anywhere => true,
            EventScope::Zone(zone) => zone == &state.position.zone,
            EventScope::Location(location) => location == &state.position.location,
        };
        if !scope_ok {
            return false;
        }

        if let Some(until) = state.event_cooldown_until(&def.id) {
            if state.turn < until {
                return false;
            }
        }

        let fires = state.event_fires(&def.id);
        if def.once && fires > 0 {
            return false;
        }
        if def.max_fires.is_some_and(|max| fires >= max) {
            return false;
        }

        true
    }
}
