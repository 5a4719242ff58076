//! Immutable content definitions.
//!
//! A [`ContentPack`] is the engine's view of everything authors declared:
//! meters, flags, modifiers, gates, items, outfits, locations, nodes,
//! events, pools, and arcs. The loader (an external collaborator) parses
//! the authored files, validates the schema, checks id uniqueness, and
//! resolves cross-references; the engine assumes those invariants already
//! hold and treats the pack as immutable for the lifetime of a run.
//!
//! Because the pack never changes after load, it is safe to share one
//! instance across concurrent sessions without locking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::effect::EffectSpec;
use crate::ids::{
    ArcId, EntityId, EventId, FlagKey, GateId, ItemId, LayerId, LocationId, MeterId, ModifierId,
    NodeId, OutfitId, PoolId, SlotId, StageId, TimeSlotId, ZoneId,
};

// =============================================================================
// Scalars
// =============================================================================

/// A typed scalar flag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean flag.
    Bool(bool),
    /// Numeric flag.
    Num(f64),
    /// String flag.
    Text(String),
}

impl Scalar {
    /// Returns the declared kind of this value.
    #[must_use]
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Num(_) => ScalarKind::Num,
            Scalar::Text(_) => ScalarKind::Text,
        }
    }

    /// Converts to a wick value for expression evaluation.
    #[must_use]
    pub fn to_value(&self) -> wick::Value {
        match self {
            Scalar::Bool(b) => wick::Value::Bool(*b),
            Scalar::Num(n) => wick::Value::Num(*n),
            Scalar::Text(s) => wick::Value::Text(s.clone()),
        }
    }
}

/// The type a flag is declared with. Writes must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Number.
    Num,
    /// String.
    Text,
}

// =============================================================================
// Privacy
// =============================================================================

/// Privacy level of a location.
///
/// Ordered: `Public < SemiPrivate < Private`. Gates declare the minimum
/// privacy they require; a gate can never pass in a location below its
/// floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Privacy {
    /// Anyone may walk in.
    Public,
    /// Semi-private (a booth, a parked car).
    SemiPrivate,
    /// Private (a bedroom).
    Private,
}

// =============================================================================
// Meters and flags
// =============================================================================

/// A labeled value range on a meter (`friend = [40, 69]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDef {
    /// Label usable in expressions.
    pub label: String,
    /// Inclusive lower bound.
    pub lo: f64,
    /// Inclusive upper bound.
    pub hi: f64,
}

/// A bounded numeric meter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterDef {
    /// The meter's id.
    pub id: MeterId,
    /// Inclusive minimum; every write clamps here.
    pub min: f64,
    /// Inclusive maximum; every write clamps here.
    pub max: f64,
    /// Value a meter starts at before any write.
    pub default: f64,
    /// Cap on the total change magnitude a single effect batch may apply,
    /// independent of the absolute clamp.
    pub delta_cap_per_turn: Option<f64>,
    /// Labeled ranges.
    pub thresholds: Vec<ThresholdDef>,
}

impl MeterDef {
    /// Returns the threshold label `value` falls in, if any.
    #[must_use]
    pub fn threshold_label(&self, value: f64) -> Option<&str> {
        self.thresholds
            .iter()
            .find(|t| value >= t.lo && value <= t.hi)
            .map(|t| t.label.as_str())
    }
}

/// A typed flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDef {
    /// The flag's key.
    pub key: FlagKey,
    /// Declared type; writes with another type are rejected.
    pub kind: ScalarKind,
    /// Starting value.
    pub default: Scalar,
}

// =============================================================================
// Modifiers
// =============================================================================

/// How the effective value of a stacking group is computed from its
/// active members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stacking {
    /// Keep the single highest-priority member's value.
    Highest,
    /// Sum the members' values.
    Additive,
    /// Multiply the members' values.
    Multiplicative,
}

/// A named status modifier definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierDef {
    /// The modifier's id.
    pub id: ModifierId,
    /// Condition-bound activation: while this holds on the subject, the
    /// modifier is active. Checked once per turn after effects settle.
    pub when: Option<wick::Expr>,
    /// Entity the `when` condition applies to. Explicit
    /// `ApplyModifier` effects may target anyone.
    pub subject: Option<EntityId>,
    /// Default duration when applied without an explicit one.
    pub duration_minutes: Option<u32>,
    /// At most one active modifier per exclusive group; most recent wins.
    pub exclusive_group: Option<String>,
    /// Stacking group this modifier contributes to.
    pub stack_group: Option<String>,
    /// Contribution to the stacking group's effective value.
    pub stack_value: f64,
    /// Priority for `Highest` stacking and exclusion tie-breaks.
    pub priority: i32,
    /// Fired through the pipeline when the modifier activates.
    pub entry_effects: Vec<EffectSpec>,
    /// Fired through the pipeline when the modifier expires.
    pub exit_effects: Vec<EffectSpec>,
    /// Hard veto: while active, these gates evaluate false everywhere.
    pub disallow_gates: Vec<GateId>,
}

// =============================================================================
// Gates
// =============================================================================

/// A consent/safety gate definition.
///
/// Gate conditions are evaluated per entity with `self` bound to the
/// entity under consideration, so one definition covers every character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDef {
    /// The gate's id.
    pub id: GateId,
    /// Eligibility condition, evaluated with `self` bound.
    pub when: wick::Expr,
    /// Minimum location privacy for the gate to open at all.
    pub min_privacy: Privacy,
}

// =============================================================================
// Items, outfits, locations, nodes
// =============================================================================

/// An inventory item definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    /// The item's id.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Slot this item equips into, if equippable.
    pub slot: Option<SlotId>,
}

/// A clothing layer within an outfit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDef {
    /// The layer's id.
    pub id: LayerId,
    /// Gate that must be open to displace or remove this layer. Layers
    /// without one are checked against location privacy only.
    pub required_gate: Option<GateId>,
}

/// A wardrobe outfit definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutfitDef {
    /// The outfit's id.
    pub id: OutfitId,
    /// Layers, outermost first.
    pub layers: Vec<LayerDef>,
}

impl OutfitDef {
    /// Finds a layer by id.
    #[must_use]
    pub fn layer(&self, id: &LayerId) -> Option<&LayerDef> {
        self.layers.iter().find(|l| &l.id == id)
    }
}

/// A location definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationDef {
    /// The location's id.
    pub id: LocationId,
    /// Zone the location belongs to.
    pub zone: ZoneId,
    /// Privacy level, consulted by gates.
    pub privacy: Privacy,
    /// Characters normally found here, for `npc_present`.
    pub present: Vec<EntityId>,
}

/// A narrative node definition. The engine only needs to know the node
/// exists; its prose and choices live with the narrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// The node's id.
    pub id: NodeId,
}

/// A character (or other stateful entity) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// The entity's id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Outfit worn at run start.
    pub default_outfit: Option<OutfitId>,
}

// =============================================================================
// Events
// =============================================================================

/// Where an event may fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventScope {
    /// No location restriction.
    Anywhere,
    /// Only in this zone.
    Zone(ZoneId),
    /// Only at this location.
    Location(LocationId),
}

/// What makes an event eligible this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// Fires in a time window.
    Scheduled {
        /// Specific day, if pinned.
        day: Option<u32>,
        /// Time slots the window covers; empty means any slot.
        slots: Vec<TimeSlotId>,
    },
    /// Fires while a condition holds.
    Conditional {
        /// The condition.
        when: wick::Expr,
    },
    /// Member of a random pool; the pool's draw decides.
    Pool {
        /// The pool.
        pool: PoolId,
    },
}

/// A player-facing choice attached to a fired event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDef {
    /// Stable choice id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Effects applied if the player picks this choice.
    pub effects: Vec<EffectSpec>,
}

/// A narrative event definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDef {
    /// The event's id.
    pub id: EventId,
    /// Where it may fire.
    pub scope: EventScope,
    /// What makes it eligible.
    pub trigger: Trigger,
    /// Higher wins among eligible candidates.
    pub priority: i32,
    /// Interrupt events preempt all non-interrupt candidates.
    pub interrupt: bool,
    /// Fire at most once per run.
    pub once: bool,
    /// Fire at most this many times per run.
    pub max_fires: Option<u32>,
    /// Turns before the event is eligible again after firing.
    pub cooldown_turns: u32,
    /// Weight within its pool (ignored outside pools).
    pub weight: u32,
    /// Effects applied when the event fires.
    pub effects: Vec<EffectSpec>,
    /// Narrative payload surfaced unmodified to the narrative layer.
    pub narrative: Option<String>,
    /// Choices surfaced unmodified to the narrative layer.
    pub choices: Vec<ChoiceDef>,
}

/// A random event pool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDef {
    /// The pool's id.
    pub id: PoolId,
    /// Chance the pool produces a candidate at all this turn.
    pub chance_per_turn: f64,
}

// =============================================================================
// Arcs
// =============================================================================

/// How an arc selects among stages whose conditions hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArcEvaluation {
    /// Highest-declared stage whose condition holds.
    Highest,
    /// First stage, in declared order, whose condition holds.
    FirstMatch,
}

/// When a stage holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageCondition {
    /// Always holds; used for the initial stage.
    Always,
    /// Pure threshold condition.
    When(wick::Expr),
    /// Hysteresis pair: `enter_when` to come in, and the stage is only
    /// left once `exit_when` holds.
    Hysteresis {
        /// Condition to enter the stage.
        enter_when: wick::Expr,
        /// Condition that releases the stage.
        exit_when: wick::Expr,
    },
    /// Numeric hysteresis against the arc's tracked meter: enter at
    /// `value >= enter`, leave once `value < exit`.
    Threshold {
        /// Entry threshold.
        enter: f64,
        /// Exit threshold (typically below `enter`).
        exit: f64,
    },
}

/// A stage within an arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    /// The stage's id.
    pub id: StageId,
    /// When this stage holds.
    pub condition: StageCondition,
    /// Minimum turns the arc must remain here before transitioning again.
    pub debounce_turns: u32,
    /// Fired when the arc enters this stage.
    pub entry_effects: Vec<EffectSpec>,
    /// Fired when the arc leaves this stage.
    pub exit_effects: Vec<EffectSpec>,
    /// Fired once on entry, alongside `entry_effects`, for unlocks.
    pub unlock_effects: Vec<EffectSpec>,
}

/// A progression arc definition.
///
/// Stage declaration order is meaningful: it is the ordering `Highest`
/// evaluation uses, and `FirstMatch` iterates it front to back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcDef {
    /// The arc's id.
    pub id: ArcId,
    /// Selection mode.
    pub evaluation: ArcEvaluation,
    /// Meter `StageCondition::Threshold` stages read.
    pub tracked_meter: Option<(EntityId, MeterId)>,
    /// Arcs deactivated when this one activates, in precedence order.
    pub exclusive_with: Vec<ArcId>,
    /// Stages in declared (ascending) order. Never empty; the first
    /// stage is the arc's initial stage.
    pub stages: Vec<StageDef>,
}

impl ArcDef {
    /// Finds a stage by id.
    #[must_use]
    pub fn stage(&self, id: &StageId) -> Option<&StageDef> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// The stage the arc starts in.
    #[must_use]
    pub fn initial_stage(&self) -> &StageDef {
        &self.stages[0]
    }
}

// =============================================================================
// Time slots and run start
// =============================================================================

/// A named span of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotDef {
    /// The slot's id.
    pub id: TimeSlotId,
    /// Minute of day the slot begins (0..1440).
    pub start_minute: u32,
}

/// Where and when a run begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDef {
    /// Starting location.
    pub location: LocationId,
    /// Starting narrative node.
    pub node: NodeId,
    /// Starting minute of day.
    pub minute_of_day: u32,
}

// =============================================================================
// ContentPack
// =============================================================================

/// The complete set of immutable content tables for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPack {
    /// The entity the `has()` builtin and delta inventory default to.
    pub player: EntityId,
    /// Characters and other stateful entities.
    pub entities: BTreeMap<EntityId, EntityDef>,
    /// Meter definitions.
    pub meters: BTreeMap<MeterId, MeterDef>,
    /// Flag schema.
    pub flags: BTreeMap<FlagKey, FlagDef>,
    /// Modifier definitions.
    pub modifiers: BTreeMap<ModifierId, ModifierDef>,
    /// Stacking policy per stack group.
    pub stack_groups: BTreeMap<String, Stacking>,
    /// Gate definitions.
    pub gates: BTreeMap<GateId, GateDef>,
    /// Item definitions.
    pub items: BTreeMap<ItemId, ItemDef>,
    /// Outfit definitions.
    pub outfits: BTreeMap<OutfitId, OutfitDef>,
    /// Location definitions.
    pub locations: BTreeMap<LocationId, LocationDef>,
    /// Narrative nodes.
    pub nodes: BTreeMap<NodeId, NodeDef>,
    /// Event definitions.
    pub events: BTreeMap<EventId, EventDef>,
    /// Random pools.
    pub pools: BTreeMap<PoolId, PoolDef>,
    /// Arcs, in declaration order (order drives `exclusive_with`
    /// precedence).
    pub arcs: Vec<ArcDef>,
    /// Time slots, in day order.
    pub time_slots: Vec<TimeSlotDef>,
    /// Run start.
    pub start: StartDef,
}

impl ContentPack {
    /// Looks up an arc by id.
    #[must_use]
    pub fn arc(&self, id: &ArcId) -> Option<&ArcDef> {
        self.arcs.iter().find(|a| &a.id == id)
    }

    /// Returns the time slot covering `minute_of_day`, if slots are
    /// declared.
    #[must_use]
    pub fn slot_at(&self, minute_of_day: u32) -> Option<&TimeSlotDef> {
        let minute = minute_of_day % crate::state::MINUTES_PER_DAY;
        self.time_slots
            .iter()
            .rev()
            .find(|s| s.start_minute <= minute)
            .or_else(|| self.time_slots.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_label_lookup() {
        let def = MeterDef {
            id: MeterId::new("trust"),
            min: 0.0,
            max: 100.0,
            default: 0.0,
            delta_cap_per_turn: None,
            thresholds: vec![
                ThresholdDef {
                    label: "stranger".into(),
                    lo: 0.0,
                    hi: 39.0,
                },
                ThresholdDef {
                    label: "friend".into(),
                    lo: 40.0,
                    hi: 69.0,
                },
            ],
        };
        assert_eq!(def.threshold_label(45.0), Some("friend"));
        assert_eq!(def.threshold_label(10.0), Some("stranger"));
        assert_eq!(def.threshold_label(90.0), None);
    }

    #[test]
    fn privacy_orders_public_lowest() {
        assert!(Privacy::Public < Privacy::SemiPrivate);
        assert!(Privacy::SemiPrivate < Privacy::Private);
    }

    #[test]
    fn scalar_kind_matches_variant() {
        assert_eq!(Scalar::Bool(true).kind(), ScalarKind::Bool);
        assert_eq!(Scalar::Num(1.0).kind(), ScalarKind::Num);
        assert_eq!(Scalar::Text("x".into()).kind(), ScalarKind::Text);
    }

    #[test]
    fn slot_at_wraps_before_first_boundary() {
        let slots = vec![
            TimeSlotDef {
                id: TimeSlotId::new("morning"),
                start_minute: 360,
            },
            TimeSlotDef {
                id: TimeSlotId::new("evening"),
                start_minute: 1080,
            },
        ];
        let pack = ContentPack {
            player: EntityId::new("player"),
            entities: BTreeMap::new(),
            meters: BTreeMap::new(),
            flags: BTreeMap::new(),
            modifiers: BTreeMap::new(),
            stack_groups: BTreeMap::new(),
            gates: BTreeMap::new(),
            items: BTreeMap::new(),
            outfits: BTreeMap::new(),
            locations: BTreeMap::new(),
            nodes: BTreeMap::new(),
            events: BTreeMap::new(),
            pools: BTreeMap::new(),
            arcs: Vec::new(),
            time_slots: slots,
            start: StartDef {
                location: LocationId::new("nowhere"),
                node: NodeId::new("start"),
                minute_of_day: 480,
            },
        };
        assert_eq!(pack.slot_at(400).unwrap().id.as_str(), "morning");
        assert_eq!(pack.slot_at(1100).unwrap().id.as_str(), "evening");
        // Before the first boundary the previous day's last slot is still on.
        assert_eq!(pack.slot_at(100).unwrap().id.as_str(), "evening");
    }
}
