//! Long-running progression arcs.
//!
//! Arcs are mutually-exclusive stage machines evaluated after all turn
//! effects and events have settled, against the final post-turn state.
//! Stage conditions come in three shapes: a plain `when`, an
//! `enter_when`/`exit_when` hysteresis pair, or numeric `{enter, exit}`
//! thresholds against the arc's tracked meter. A stage's `debounce_turns`
//! keeps the arc in place for a minimum number of turns even when a
//! different stage's condition holds. Hysteresis guards against meter
//! jitter, debounce against rapid oscillation.
//!
//! `exclusive_with` arcs deactivate each other: when one activates (moves
//! off its initial stage), its listed peers are reset to their initial
//! stages. Arcs are processed in declaration order, so the first-listed
//! arc wins a simultaneous activation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::content::{ArcDef, ArcEvaluation, ContentPack, StageCondition, StageDef};
use crate::effect::{ApplyReport, Pipeline};
use crate::gate::GateTable;
use crate::ids::{ArcId, StageId};
use crate::rng::TurnRng;
use crate::state::WorldState;
use crate::world_view::WorldView;
use wick::Evaluator;

/// One arc stage change this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcTransition {
    /// Which arc.
    pub arc: ArcId,
    /// Stage it left.
    pub from: StageId,
    /// Stage it entered.
    pub to: StageId,
}

/// Evaluates arcs against post-turn state.
pub struct ArcTracker<'a> {
    content: &'a ContentPack,
}

impl<'a> ArcTracker<'a> {
    /// Creates a tracker over immutable content.
    #[must_use]
    pub fn new(content: &'a ContentPack) -> Self {
        Self { content }
    }

    /// Runs one evaluation pass over every arc, in declaration order.
    pub fn evaluate(
        &self,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
    ) -> (Vec<ArcTransition>, ApplyReport) {
        let mut transitions = Vec::new();
        let mut report = ApplyReport::default();
        // Arcs reset by an earlier peer's activation sit out the rest of
        // the pass; first-listed wins simultaneous activation.
        let mut suppressed: BTreeSet<ArcId> = BTreeSet::new();

        for arc in &self.content.arcs {
            if suppressed.contains(&arc.id) {
                continue;
            }
            let Some(current_stage_id) = state.arc(&arc.id).map(|a| a.stage.clone()) else {
                warn!(arc = %arc.id, "arc missing from state; skipping");
                continue;
            };
            let Some(current_stage) = arc.stage(&current_stage_id) else {
                warn!(arc = %arc.id, stage = %current_stage_id, "undeclared stage; skipping");
                continue;
            };

            let candidate = self.select_stage(arc, &current_stage_id, state, gates, rng);
            if candidate == current_stage_id {
                continue;
            }

            // Debounce: the current stage pins the arc for a minimum stay.
            let entered_turn = state.arc(&arc.id).map_or(0, |a| a.entered_turn);
            let turns_in_stage = state.turn.saturating_sub(entered_turn);
            if turns_in_stage < current_stage.debounce_turns {
                debug!(
                    arc = %arc.id,
                    stage = %current_stage_id,
                    turns_in_stage,
                    "debounce holds the arc in place"
                );
                continue;
            }

            self.transition(
                arc,
                &current_stage_id,
                &candidate,
                state,
                gates,
                pipeline,
                rng,
                &mut transitions,
                &mut report,
            );

            // Activation deactivates exclusive peers.
            let activated = candidate != arc.initial_stage().id;
            if activated {
                for peer_id in &arc.exclusive_with {
                    suppressed.insert(peer_id.clone());
                    self.reset_peer(peer_id, state, gates, pipeline, rng, &mut transitions, &mut report);
                }
            }
        }

        (transitions, report)
    }

    /// Picks the stage the arc should be in, given the current stage (for
    /// hysteresis) and the evaluation mode.
    fn select_stage(
        &self,
        arc: &ArcDef,
        current: &StageId,
        state: &WorldState,
        gates: &GateTable,
        rng: &mut TurnRng,
    ) -> StageId {
        let holding: Vec<&StageDef> = match arc.evaluation {
            ArcEvaluation::Highest => arc
                .stages
                .iter()
                .rev()
                .filter(|s| self.stage_holds(arc, s, current, state, gates, rng))
                .collect(),
            ArcEvaluation::FirstMatch => arc
                .stages
                .iter()
                .filter(|s| self.stage_holds(arc, s, current, state, gates, rng))
                .collect(),
        };
        holding
            .first()
            .map_or_else(|| current.clone(), |s| s.id.clone())
    }

    fn stage_holds(
        &self,
        arc: &ArcDef,
        stage: &StageDef,
        current: &StageId,
        state: &WorldState,
        gates: &GateTable,
        rng: &mut TurnRng,
    ) -> bool {
        let is_current = &stage.id == current;
        match &stage.condition {
            StageCondition::Always => true,
            StageCondition::When(when) => {
                let view = WorldView::new(state, self.content).with_gates(gates);
                Evaluator::new(&view, rng).eval_bool(when)
            }
            StageCondition::Hysteresis {
                enter_when,
                exit_when,
            } => {
                let view = WorldView::new(state, self.content).with_gates(gates);
                let mut evaluator = Evaluator::new(&view, rng);
                if is_current {
                    // Stay until the exit condition releases the stage.
                    !evaluator.eval_bool(exit_when)
                } else {
                    evaluator.eval_bool(enter_when)
                }
            }
            StageCondition::Threshold { enter, exit } => {
                let Some((entity, meter)) = &arc.tracked_meter else {
                    warn!(arc = %arc.id, stage = %stage.id, "threshold stage without tracked meter");
                    return false;
                };
                let value = state.meter(self.content, entity, meter);
                if is_current {
                    value >= *exit
                } else {
                    value >= *enter
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &self,
        arc: &ArcDef,
        from: &StageId,
        to: &StageId,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        transitions: &mut Vec<ArcTransition>,
        report: &mut ApplyReport,
    ) {
        debug!(arc = %arc.id, %from, %to, "arc transition");

        if let Some(old) = arc.stage(from) {
            let exit = old.exit_effects.clone();
            report.absorb(pipeline.apply(&exit, state, gates, rng));
        }
        if let Some(new) = arc.stage(to) {
            let entry = new.entry_effects.clone();
            report.absorb(pipeline.apply(&entry, state, gates, rng));
            let unlock = new.unlock_effects.clone();
            report.absorb(pipeline.apply(&unlock, state, gates, rng));
        }

        let turn = state.turn;
        if let Some(arc_state) = state.arc_mut(&arc.id) {
            arc_state.stage = to.clone();
            arc_state.history.push(to.clone());
            arc_state.entered_turn = turn;
        }
        transitions.push(ArcTransition {
            arc: arc.id.clone(),
            from: from.clone(),
            to: to.clone(),
        });
    }

    /// Resets an exclusive peer to its initial stage.
    #[allow(clippy::too_many_arguments)]
    fn reset_peer(
        &self,
        peer_id: &ArcId,
        state: &mut WorldState,
        gates: &GateTable,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
        transitions: &mut Vec<ArcTransition>,
        report: &mut ApplyReport,
    ) {
        let Some(peer) = self.content.arc(peer_id) else {
            warn!(arc = %peer_id, "exclusive_with names an unknown arc");
            return;
        };
        let Some(current) = state.arc(peer_id).map(|a| a.stage.clone()) else {
            return;
        };
        let initial = peer.initial_stage().id.clone();
        if current == initial {
            return;
        }
        debug!(arc = %peer_id, "deactivated by exclusive peer");
        self.transition(
            peer, &current, &initial, state, gates, pipeline, rng, transitions, report,
        );
    }
}
