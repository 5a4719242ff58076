//! Merging externally-proposed deltas into the effect vocabulary.
//!
//! The narrative generator is an untrusted black box: alongside its prose
//! it proposes a structured delta. Nothing in that delta touches
//! [`WorldState`](crate::state::WorldState) directly. [`DeltaMerger::merge`]
//! translates each accepted field into the same [`EffectSpec`] vocabulary
//! authored content uses, so the one pipeline that mutates state also
//! applies generator output, with the same gates and clamps.
//!
//! Validation is reject-not-repair: an out-of-range meter request is
//! dropped with a violation record rather than clamped and silently
//! accepted; a clothing request against a closed gate is dropped, flips
//! `safety.ok` to false, and never partially applies. Structurally
//! malformed payloads get one bounded retry at the engine level, then the
//! turn fails closed with no deltas applied.
//!
//! # Payload shape
//!
//! ```json
//! {
//!   "meters":    { "alex.trust": "+10" },
//!   "flags":     { "alex.met": true },
//!   "inventory": [ { "owner": "player", "item": "rose", "delta": 1 } ],
//!   "clothing":  { "alex.top": "displaced" },
//!   "modifiers": [ { "op": "add", "target": "alex", "id": "tipsy", "minutes": 60 } ],
//!   "goto":      "confession",
//!   "memory":    [ "she finally laughed at one of my jokes" ]
//! }
//! ```
//!
//! Meter values use explicit `+N` / `-N` / `=N` semantics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::content::{ContentPack, Privacy, Scalar};
use crate::effect::{Effect, EffectSpec, NumericOp};
use crate::engine::EngineConfig;
use crate::error::{ContentError, DeltaParseError, ValidationError};
use crate::gate::GateTable;
use crate::ids::{EntityId, FlagKey, ItemId, LayerId, MeterId, ModifierId, NodeId};
use crate::state::{LayerState, WorldState};

// =============================================================================
// Wire types
// =============================================================================

/// One inventory change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDelta {
    /// Receiving or losing entity.
    pub owner: EntityId,
    /// Which item.
    pub item: ItemId,
    /// Positive adds, negative removes.
    pub delta: i64,
}

/// One modifier change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierDelta {
    /// `"add"` or `"remove"`.
    pub op: String,
    /// The entity.
    pub target: EntityId,
    /// Which modifier.
    pub id: ModifierId,
    /// Duration for adds; definition default when absent.
    #[serde(default)]
    pub minutes: Option<u32>,
}

/// The structured delta an external generator proposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalDelta {
    /// `"entity.meter" -> "+N" / "-N" / "=N"`.
    #[serde(default)]
    pub meters: BTreeMap<String, String>,
    /// Flag writes.
    #[serde(default)]
    pub flags: BTreeMap<String, Scalar>,
    /// Inventory changes.
    #[serde(default)]
    pub inventory: Vec<InventoryDelta>,
    /// `"character.layer" -> "intact" / "displaced" / "removed"`.
    #[serde(default)]
    pub clothing: BTreeMap<String, String>,
    /// Modifier changes.
    #[serde(default)]
    pub modifiers: Vec<ModifierDelta>,
    /// Forced node transition request.
    #[serde(default)]
    pub goto: Option<NodeId>,
    /// Free-text memory appends.
    #[serde(default)]
    pub memory: Vec<String>,
}

/// Parses a raw delta payload.
///
/// # Errors
///
/// Returns [`DeltaParseError`] when the payload is not the expected JSON
/// shape. The engine gives the generator one retry, then fails closed.
pub fn parse_delta(raw: &str) -> Result<ExternalDelta, DeltaParseError> {
    serde_json::from_str(raw).map_err(|e| DeltaParseError::Json(e.to_string()))
}

// =============================================================================
// Safety report
// =============================================================================

/// One dropped sub-delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// The delta field (`meters.alex.trust`, `clothing.alex.top`, ...).
    pub field: String,
    /// Why it was dropped.
    pub reason: String,
}

/// Outcome of validating one delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// False when any consent/privacy-relevant sub-delta was dropped.
    pub ok: bool,
    /// Every dropped sub-delta, safety-relevant or not.
    pub violations: Vec<Violation>,
}

impl Default for SafetyReport {
    fn default() -> Self {
        Self {
            ok: true,
            violations: Vec::new(),
        }
    }
}

impl SafetyReport {
    /// Records a non-safety rejection (bad reference, out of bounds).
    fn reject(&mut self, field: impl Into<String>, err: &ValidationError) {
        let violation = Violation {
            field: field.into(),
            reason: err.to_string(),
        };
        warn!(field = %violation.field, reason = %violation.reason, "delta sub-field dropped");
        self.violations.push(violation);
    }

    /// Records a consent/privacy rejection; these also clear `ok`.
    fn refuse(&mut self, field: impl Into<String>, err: &ValidationError) {
        self.ok = false;
        self.reject(field, err);
    }
}

// =============================================================================
// Merger
// =============================================================================

/// Validates an [`ExternalDelta`] and translates it into effects.
pub struct DeltaMerger<'a> {
    content: &'a ContentPack,
    config: &'a EngineConfig,
}

impl<'a> DeltaMerger<'a> {
    /// Creates a merger over immutable content and configuration.
    #[must_use]
    pub fn new(content: &'a ContentPack, config: &'a EngineConfig) -> Self {
        Self { content, config }
    }

    /// Validates each sub-delta and emits effects for the accepted ones.
    ///
    /// Never partially applies a disallowed sub-delta: a request either
    /// becomes an effect or becomes a violation record.
    #[must_use]
    pub fn merge(
        &self,
        proposed: &ExternalDelta,
        state: &WorldState,
        gates: &GateTable,
    ) -> (Vec<EffectSpec>, SafetyReport) {
        let mut effects = Vec::new();
        let mut safety = SafetyReport::default();

        self.merge_meters(proposed, &mut effects, &mut safety);
        self.merge_flags(proposed, &mut effects, &mut safety);
        self.merge_inventory(proposed, &mut effects, &mut safety);
        self.merge_clothing(proposed, state, gates, &mut effects, &mut safety);
        self.merge_modifiers(proposed, &mut effects, &mut safety);

        if let Some(node) = &proposed.goto {
            if self.content.nodes.contains_key(node) {
                effects.push(EffectSpec::new(Effect::GotoNode { node: node.clone() }));
            } else {
                safety.reject(
                    "goto",
                    &ContentError::UnknownNode(node.clone()).into(),
                );
            }
        }

        for (i, text) in proposed.memory.iter().enumerate() {
            if i >= self.config.max_memory_appends {
                warn!(
                    dropped = proposed.memory.len() - self.config.max_memory_appends,
                    "memory appends over the per-turn cap dropped"
                );
                break;
            }
            effects.push(EffectSpec::new(Effect::AppendMemory { text: text.clone() }));
        }

        (effects, safety)
    }

    fn merge_meters(
        &self,
        proposed: &ExternalDelta,
        effects: &mut Vec<EffectSpec>,
        safety: &mut SafetyReport,
    ) {
        for (key, request) in &proposed.meters {
            let field = format!("meters.{key}");
            let Some((entity_str, meter_str)) = key.split_once('.') else {
                safety.reject(
                    &field,
                    &ValidationError::Malformed {
                        field: field.clone(),
                        reason: "expected `entity.meter`".into(),
                    },
                );
                continue;
            };
            let entity = EntityId::new(entity_str);
            let meter = MeterId::new(meter_str);
            if !self.content.entities.contains_key(&entity) {
                safety.reject(&field, &ContentError::UnknownEntity(entity).into());
                continue;
            }
            let Some(def) = self.content.meters.get(&meter) else {
                safety.reject(&field, &ContentError::UnknownMeter(meter).into());
                continue;
            };

            let Some((op, value)) = parse_meter_request(request) else {
                safety.reject(
                    &field,
                    &ValidationError::Malformed {
                        field: field.clone(),
                        reason: format!("unintelligible meter request `{request}`"),
                    },
                );
                continue;
            };

            // Reject rather than clamp: an out-of-range request from the
            // generator is a violation, not something to quietly repair.
            match op {
                NumericOp::Set => {
                    if value < def.min || value > def.max {
                        safety.reject(
                            &field,
                            &ValidationError::MeterOutOfRange {
                                meter: def.id.clone(),
                                requested: value,
                                min: def.min,
                                max: def.max,
                            },
                        );
                        continue;
                    }
                }
                NumericOp::Add | NumericOp::Subtract => {
                    if let Some(cap) = def.delta_cap_per_turn {
                        if value.abs() > cap {
                            safety.reject(
                                &field,
                                &ValidationError::DeltaCapExceeded {
                                    meter: def.id.clone(),
                                    requested: value.abs(),
                                    cap,
                                },
                            );
                            continue;
                        }
                    }
                }
                NumericOp::Multiply | NumericOp::Divide => unreachable!("not in wire format"),
            }

            effects.push(EffectSpec::new(Effect::MeterChange {
                target: entity,
                meter,
                op,
                value,
            }));
        }
    }

    fn merge_flags(
        &self,
        proposed: &ExternalDelta,
        effects: &mut Vec<EffectSpec>,
        safety: &mut SafetyReport,
    ) {
        for (key, value) in &proposed.flags {
            let field = format!("flags.{key}");
            let flag = FlagKey::new(key);
            let Some(def) = self.content.flags.get(&flag) else {
                safety.reject(&field, &ContentError::UnknownFlag(flag).into());
                continue;
            };
            if value.kind() != def.kind {
                safety.reject(
                    &field,
                    &ContentError::FlagTypeMismatch {
                        key: flag,
                        expected: def.kind,
                        got: value.kind(),
                    }
                    .into(),
                );
                continue;
            }
            effects.push(EffectSpec::new(Effect::FlagSet {
                key: def.key.clone(),
                value: value.clone(),
            }));
        }
    }

    fn merge_inventory(
        &self,
        proposed: &ExternalDelta,
        effects: &mut Vec<EffectSpec>,
        safety: &mut SafetyReport,
    ) {
        for (i, entry) in proposed.inventory.iter().enumerate() {
            let field = format!("inventory[{i}]");
            if !self.content.entities.contains_key(&entry.owner) {
                safety.reject(
                    &field,
                    &ContentError::UnknownEntity(entry.owner.clone()).into(),
                );
                continue;
            }
            if !self.content.items.contains_key(&entry.item) {
                safety.reject(&field, &ContentError::UnknownItem(entry.item.clone()).into());
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = entry.delta.unsigned_abs().min(u64::from(u32::MAX)) as u32;
            if count == 0 {
                continue;
            }
            let effect = if entry.delta > 0 {
                Effect::InventoryAdd {
                    owner: entry.owner.clone(),
                    item: entry.item.clone(),
                    count,
                }
            } else {
                Effect::InventoryRemove {
                    owner: entry.owner.clone(),
                    item: entry.item.clone(),
                    count,
                }
            };
            effects.push(EffectSpec::new(effect));
        }
    }

    fn merge_clothing(
        &self,
        proposed: &ExternalDelta,
        state: &WorldState,
        gates: &GateTable,
        effects: &mut Vec<EffectSpec>,
        safety: &mut SafetyReport,
    ) {
        for (key, value) in &proposed.clothing {
            let field = format!("clothing.{key}");
            let Some((character_str, layer_str)) = key.split_once('.') else {
                safety.refuse(
                    &field,
                    &ValidationError::Malformed {
                        field: field.clone(),
                        reason: "expected `character.layer`".into(),
                    },
                );
                continue;
            };
            let character = EntityId::new(character_str);
            let layer = LayerId::new(layer_str);
            let Some(new_state) = LayerState::from_wire(value) else {
                safety.refuse(
                    &field,
                    &ValidationError::Malformed {
                        field: field.clone(),
                        reason: format!("unknown layer state `{value}`"),
                    },
                );
                continue;
            };
            if !self.content.entities.contains_key(&character) {
                safety.reject(&field, &ContentError::UnknownEntity(character).into());
                continue;
            }
            let layer_def = state
                .outfit(&character)
                .and_then(|o| self.content.outfits.get(o))
                .and_then(|o| o.layer(&layer));
            let Some(layer_def) = layer_def else {
                safety.reject(
                    &field,
                    &ContentError::UnknownLayer {
                        character,
                        layer,
                    }
                    .into(),
                );
                continue;
            };

            // A closed gate drops the sub-delta and flips safety.ok; no
            // effect is emitted, so clothing state cannot change.
            match &layer_def.required_gate {
                Some(gate) => {
                    if !gates.allows(&character, gate) {
                        safety.refuse(
                            &field,
                            &ValidationError::GateDenied {
                                entity: character,
                                gate: gate.clone(),
                            },
                        );
                        continue;
                    }
                }
                None => {
                    let privacy = self
                        .content
                        .locations
                        .get(&state.position.location)
                        .map_or(Privacy::Public, |l| l.privacy);
                    if privacy < self.config.ungated_clothing_min_privacy
                        && new_state != LayerState::Intact
                    {
                        safety.refuse(
                            &field,
                            &ValidationError::PrivacyDenied {
                                location: state.position.location.clone(),
                            },
                        );
                        continue;
                    }
                }
            }

            effects.push(EffectSpec::new(Effect::ClothingSet {
                character,
                layer,
                state: new_state,
            }));
        }
    }

    fn merge_modifiers(
        &self,
        proposed: &ExternalDelta,
        effects: &mut Vec<EffectSpec>,
        safety: &mut SafetyReport,
    ) {
        for (i, entry) in proposed.modifiers.iter().enumerate() {
            let field = format!("modifiers[{i}]");
            if !self.content.entities.contains_key(&entry.target) {
                safety.reject(
                    &field,
                    &ContentError::UnknownEntity(entry.target.clone()).into(),
                );
                continue;
            }
            if !self.content.modifiers.contains_key(&entry.id) {
                safety.reject(
                    &field,
                    &ContentError::UnknownModifier(entry.id.clone()).into(),
                );
                continue;
            }
            match entry.op.as_str() {
                "add" => effects.push(EffectSpec::new(Effect::ApplyModifier {
                    target: entry.target.clone(),
                    modifier: entry.id.clone(),
                    duration_minutes: entry.minutes,
                })),
                "remove" => effects.push(EffectSpec::new(Effect::RemoveModifier {
                    target: entry.target.clone(),
                    modifier: entry.id.clone(),
                })),
                other => {
                    safety.reject(
                        &field,
                        &ValidationError::Malformed {
                            field: field.clone(),
                            reason: format!("unknown modifier op `{other}`"),
                        },
                    );
                }
            }
        }
    }
}

/// Parses `"+N"` / `"-N"` / `"=N"`.
fn parse_meter_request(request: &str) -> Option<(NumericOp, f64)> {
    let (op, rest) = match request.as_bytes().first()? {
        b'+' => (NumericOp::Add, &request[1..]),
        b'-' => (NumericOp::Subtract, &request[1..]),
        b'=' => (NumericOp::Set, &request[1..]),
        _ => return None,
    };
    let value: f64 = rest.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((op, value))
}
