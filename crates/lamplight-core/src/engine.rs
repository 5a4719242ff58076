//! Turn orchestration.
//!
//! `Engine` owns a run's [`WorldState`] and drives each turn through a
//! fixed phase order:
//!
//! 1. Derive the turn's RNG stream from `(game_id, run_id, turn)`.
//! 2. Apply authored/choice effects.
//! 3. Parse and merge the external delta (one bounded retry, then fail
//!    closed with no deltas for the turn).
//! 4. Resolve modifiers and compute the turn's gate table.
//! 5. Run event selection; re-resolve modifiers if the event dirtied them.
//! 6. Evaluate arcs against the settled state.
//! 7. Finalize: resolve the forced-node request by precedence
//!    (arc/event > authored > delta), bump the turn counter, and assemble
//!    the outcome record.
//!
//! Everything is synchronous and single-timeline: a turn completes before
//! the next begins, and independent runs share nothing but the immutable
//! [`ContentPack`] (hence the `Arc`).
//!
//! Entry/exit hooks fired during modifier resolution consult the previous
//! turn's gate table; the fresh table is computed immediately after
//! resolution and is the authoritative one for the rest of the turn.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::arc::{ArcTracker, ArcTransition};
use crate::content::{ChoiceDef, ContentPack, Privacy};
use crate::delta::{parse_delta, DeltaMerger, SafetyReport, Violation};
use crate::envelope::TurnEnvelope;
use crate::effect::{ApplyReport, EffectSpec, Pipeline};
use crate::error::InvariantViolation;
use crate::event::{EventScheduler, FiredEvent};
use crate::gate::GateTable;
use crate::ids::{EntityId, ModifierId, NodeId};
use crate::modifier::{BehaviorOverlay, ModifierResolver};
use crate::rng::TurnRng;
use crate::snapshot::{Snapshot, SNAPSHOT_VERSION};
use crate::state::WorldState;

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Game identity half of the RNG key.
    pub game_id: String,
    /// Run identity half of the RNG key.
    pub run_id: String,
    /// Recursion cap for `Conditional`/`Random` effect nesting.
    pub max_effect_depth: u8,
    /// Extra delta payload attempts accepted after the first fails to
    /// parse.
    pub delta_retries: usize,
    /// Privacy floor for clothing changes on layers that name no gate.
    pub ungated_clothing_min_privacy: Privacy,
    /// Per-turn cap on memory appends accepted from a delta.
    pub max_memory_appends: usize,
    /// Memory-log tail length included in the generator envelope.
    pub envelope_memory_tail: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game_id: "lamplight".to_string(),
            run_id: "default".to_string(),
            max_effect_depth: 8,
            delta_retries: 1,
            ungated_clothing_min_privacy: Privacy::SemiPrivate,
            max_memory_appends: 4,
            envelope_memory_tail: 8,
        }
    }
}

// =============================================================================
// Turn input and outcome
// =============================================================================

/// Everything the caller feeds into one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    /// Authored effects for this turn: node-entry hooks, the effects of
    /// the choice the player picked, scripted beats.
    pub authored: Vec<EffectSpec>,
    /// Raw delta payloads from the generator, in attempt order. Empty
    /// when no generative call happened (or it timed out, which degrades
    /// to the same thing).
    pub delta_payloads: Vec<String>,
}

impl TurnInput {
    /// Input with only authored effects.
    #[must_use]
    pub fn authored(effects: Vec<EffectSpec>) -> Self {
        Self {
            authored: effects,
            delta_payloads: Vec::new(),
        }
    }

    /// Input with only a delta payload.
    #[must_use]
    pub fn delta(payload: impl Into<String>) -> Self {
        Self {
            authored: Vec::new(),
            delta_payloads: vec![payload.into()],
        }
    }
}

/// The per-turn outcome record surfaced to the presentation layer.
///
/// Presentation consumes this read-only; it never mutates state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// The turn this record describes.
    pub turn: u32,
    /// Outcome of every effect applied this turn, across all phases.
    pub effects: ApplyReport,
    /// The event that fired, if any.
    pub fired_event: Option<FiredEvent>,
    /// Arc stage changes.
    pub arc_transitions: Vec<ArcTransition>,
    /// Modifiers that expired this turn.
    pub modifiers_expired: Vec<(EntityId, ModifierId)>,
    /// Modifiers activated this turn.
    pub modifiers_activated: Vec<(EntityId, ModifierId)>,
    /// Behavioral overlays for the narrative layer's card construction.
    pub overlays: BTreeMap<EntityId, BehaviorOverlay>,
    /// Delta validation outcome.
    pub safety: SafetyReport,
    /// True when every delta payload failed to parse and the turn ran
    /// with no deltas (fail-closed).
    pub delta_failed: bool,
    /// Node the run is on after transition resolution.
    pub node: NodeId,
}

// =============================================================================
// Engine
// =============================================================================

/// Owns one run's state and resolves its turns.
pub struct Engine {
    content: Arc<ContentPack>,
    config: EngineConfig,
    state: WorldState,
    gates: GateTable,
    pending_choices: Vec<ChoiceDef>,
}

impl Engine {
    /// Starts a fresh run from content defaults.
    #[must_use]
    pub fn new(content: Arc<ContentPack>, config: EngineConfig) -> Self {
        let state = WorldState::from_content(&content);
        Self {
            content,
            config,
            state,
            gates: GateTable::default(),
            pending_choices: Vec::new(),
        }
    }

    /// Resumes a run from a snapshot taken at a turn boundary.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation`] when the snapshot's version is
    /// unknown or its state fails the at-rest invariants.
    pub fn from_snapshot(
        content: Arc<ContentPack>,
        config: EngineConfig,
        snapshot: Snapshot,
    ) -> Result<Self, InvariantViolation> {
        snapshot.validate(&content)?;
        Ok(Self {
            content,
            config: EngineConfig {
                game_id: snapshot.game_id,
                run_id: snapshot.run_id,
                ..config
            },
            state: snapshot.state,
            gates: GateTable::default(),
            pending_choices: Vec::new(),
        })
    }

    /// Read-only view of the run's state.
    #[must_use]
    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// The run's content tables.
    #[must_use]
    pub fn content(&self) -> &ContentPack {
        &self.content
    }

    /// The gate table from the most recent turn.
    #[must_use]
    pub fn gates(&self) -> &GateTable {
        &self.gates
    }

    /// Assembles the read-only context envelope for the next generative
    /// call: current node, character cards, choices on offer, and the
    /// memory-log tail.
    #[must_use]
    pub fn envelope(&self) -> TurnEnvelope {
        TurnEnvelope::assemble(
            &self.content,
            &self.state,
            &self.pending_choices,
            self.config.envelope_memory_tail,
        )
    }

    /// Captures a snapshot at the current turn boundary.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            game_id: self.config.game_id.clone(),
            run_id: self.config.run_id.clone(),
            turn: self.state.turn,
            state: self.state.clone(),
        }
    }

    /// Resolves one turn.
    #[allow(clippy::too_many_lines)]
    pub fn resolve_turn(&mut self, input: &TurnInput) -> TurnOutcome {
        let turn = self.state.turn;
        debug!(turn, "turn start");

        let content = Arc::clone(&self.content);
        let config = self.config.clone();
        let pipeline = Pipeline::new(&content, &config);
        let mut rng = TurnRng::for_turn(&config.game_id, &config.run_id, turn);

        // Phase 2: authored effects, against last turn's gates.
        let authored_report =
            pipeline.apply(&input.authored, &mut self.state, &self.gates, &mut rng);
        let authored_goto = authored_report.goto_request.clone();

        // Phase 3: external delta, bounded retry then fail-closed.
        let (delta_report, safety, delta_failed) =
            self.merge_delta(input, &content, &config, &pipeline, &mut rng);
        let delta_goto = delta_report.goto_request.clone();

        // Phase 4: modifier resolution on post-effect state, then the
        // turn's authoritative gate table.
        let elapsed = authored_report.elapsed_minutes + delta_report.elapsed_minutes;
        let resolver = ModifierResolver::new(&content);
        let mut resolution =
            resolver.resolve(&mut self.state, &self.gates, &pipeline, &mut rng, elapsed);
        self.gates = GateTable::compute(&content, &self.state, &mut rng);

        // Phase 5: one event per turn.
        let scheduler = EventScheduler::new(&content);
        let mut event_report = ApplyReport::default();
        let fired_event = match scheduler.select_and_fire(
            &mut self.state,
            &self.gates,
            &pipeline,
            &mut rng,
        ) {
            Some((fired, report)) => {
                event_report = report;
                Some(fired)
            }
            None => None,
        };
        let event_goto = event_report.goto_request.clone();
        self.pending_choices = fired_event
            .as_ref()
            .map_or_else(Vec::new, |f| f.choices.clone());

        // Event effects may have dirtied modifier conditions; one more
        // resolution pass, then refresh the gates it may have changed.
        if event_report.modifiers_dirty {
            let second = resolver.resolve(&mut self.state, &self.gates, &pipeline, &mut rng, 0);
            resolution.expired.extend(second.expired);
            resolution.activated.extend(second.activated);
            resolution.overlays = second.overlays;
            resolution.report.absorb(second.report);
            self.gates = GateTable::compute(&content, &self.state, &mut rng);
        }

        // Phase 6: arcs against the settled state.
        let tracker = ArcTracker::new(&content);
        let (arc_transitions, arc_report) =
            tracker.evaluate(&mut self.state, &self.gates, &pipeline, &mut rng);
        let arc_goto = arc_report.goto_request.clone();

        // Phase 7: finalize. Later, more authoritative phases win the
        // forced-transition slot; the untrusted delta ranks last.
        let final_goto = arc_goto
            .or(event_goto)
            .or(resolution.report.goto_request.clone())
            .or(authored_goto)
            .or(delta_goto);
        if let Some(node) = &final_goto {
            debug!(node = %node, "forced node transition");
            self.state.current_node = node.clone();
        }

        let mut effects = ApplyReport::default();
        effects.absorb(authored_report);
        effects.absorb(delta_report);
        effects.absorb(resolution.report);
        effects.absorb(event_report);
        effects.absorb(arc_report);

        self.state.turn = turn + 1;
        debug!(turn, draws = rng.draws(), "turn complete");

        TurnOutcome {
            turn,
            effects,
            fired_event,
            arc_transitions,
            modifiers_expired: resolution.expired,
            modifiers_activated: resolution.activated,
            overlays: resolution.overlays,
            safety,
            delta_failed,
            node: self.state.current_node.clone(),
        }
    }

    /// Parses and merges the delta payloads: first parseable payload
    /// wins, at most `delta_retries` extra attempts, fail-closed after.
    fn merge_delta(
        &mut self,
        input: &TurnInput,
        content: &ContentPack,
        config: &EngineConfig,
        pipeline: &Pipeline<'_>,
        rng: &mut TurnRng,
    ) -> (ApplyReport, SafetyReport, bool) {
        if input.delta_payloads.is_empty() {
            return (ApplyReport::default(), SafetyReport::default(), false);
        }

        let attempts = input
            .delta_payloads
            .iter()
            .take(1 + config.delta_retries);
        let mut last_error = None;
        for raw in attempts {
            match parse_delta(raw) {
                Ok(delta) => {
                    let merger = DeltaMerger::new(content, config);
                    let (effects, safety) = merger.merge(&delta, &self.state, &self.gates);
                    let report = pipeline.apply(&effects, &mut self.state, &self.gates, rng);
                    return (report, safety, false);
                }
                Err(err) => {
                    warn!(%err, "delta payload failed to parse");
                    last_error = Some(err);
                }
            }
        }

        // Fail closed: no deltas this turn, error on the record.
        let mut safety = SafetyReport::default();
        safety.violations.push(Violation {
            field: "payload".to_string(),
            reason: last_error.map_or_else(String::new, |e| e.to_string()),
        });
        (ApplyReport::default(), safety, true)
    }
}
