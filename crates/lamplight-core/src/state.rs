//! World state: the single mutable aggregate for a run.
//!
//! `WorldState` is created once at run start from declared defaults,
//! mutated every turn exclusively through the effect pipeline, and
//! serialized wholesale at checkpoints. Every collection is a `BTreeMap`
//! so iteration order is deterministic across platforms, the same
//! discipline the rest of the engine relies on for replayability.
//!
//! Read access is public; mutation is `pub(crate)` so nothing outside the
//! engine's own pipeline modules can write state directly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::content::{ContentPack, Scalar};
use crate::error::InvariantViolation;
use crate::ids::{
    ArcId, EntityId, EventId, FlagKey, ItemId, LayerId, LocationId, MeterId, ModifierId, NodeId,
    OutfitId, SlotId, StageId, TimeSlotId, ZoneId,
};

/// Minutes in a day; `minute_of_day` wraps here.
pub const MINUTES_PER_DAY: u32 = 1440;

// =============================================================================
// Component state
// =============================================================================

/// State of one clothing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerState {
    /// Worn normally.
    Intact,
    /// Pushed aside but still worn.
    Displaced,
    /// Taken off.
    Removed,
}

impl LayerState {
    /// Parses the wire spelling used by external deltas.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "intact" => Some(LayerState::Intact),
            "displaced" => Some(LayerState::Displaced),
            "removed" => Some(LayerState::Removed),
            _ => None,
        }
    }

    /// The wire spelling.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            LayerState::Intact => "intact",
            LayerState::Displaced => "displaced",
            LayerState::Removed => "removed",
        }
    }
}

/// A modifier currently active on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveModifier {
    /// Which modifier.
    pub id: ModifierId,
    /// Minutes until expiry; `None` means indefinite or condition-bound.
    pub remaining_minutes: Option<u32>,
    /// Turn the modifier became active, for exclusion and stacking
    /// tie-breaks.
    pub activated_turn: u32,
}

/// Current position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Current zone.
    pub zone: ZoneId,
    /// Current location within the zone.
    pub location: LocationId,
}

/// Current in-world time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// Day counter, starting at 1.
    pub day: u32,
    /// Named slot derived from `minute_of_day` (or advanced explicitly
    /// when content declares no slot boundaries).
    pub slot: TimeSlotId,
    /// Minute within the day.
    pub minute_of_day: u32,
}

/// Where an arc currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcState {
    /// Current stage.
    pub stage: StageId,
    /// Every stage the arc has entered, in order.
    pub history: Vec<StageId>,
    /// Turn the current stage was entered, for debounce.
    pub entered_turn: u32,
}

// =============================================================================
// WorldState
// =============================================================================

/// The single mutable aggregate owned by the engine for a run's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Monotonic turn counter.
    pub turn: u32,
    meters: BTreeMap<EntityId, BTreeMap<MeterId, f64>>,
    flags: BTreeMap<FlagKey, Scalar>,
    modifiers: BTreeMap<EntityId, Vec<ActiveModifier>>,
    inventory: BTreeMap<EntityId, BTreeMap<ItemId, u32>>,
    equipment: BTreeMap<EntityId, BTreeMap<SlotId, Option<ItemId>>>,
    clothing: BTreeMap<EntityId, BTreeMap<LayerId, LayerState>>,
    current_outfit: BTreeMap<EntityId, OutfitId>,
    /// Current position.
    pub position: Position,
    /// Current time.
    pub clock: Clock,
    arcs: BTreeMap<ArcId, ArcState>,
    event_cooldowns: BTreeMap<EventId, u32>,
    event_fire_counts: BTreeMap<EventId, u32>,
    unlocks: BTreeMap<String, BTreeSet<String>>,
    /// Current narrative node.
    pub current_node: NodeId,
    memory_log: Vec<String>,
}

impl WorldState {
    /// Builds the starting state from content defaults.
    ///
    /// # Panics
    ///
    /// Panics if the start location is missing from the pack; the loader
    /// guarantees it exists.
    #[must_use]
    pub fn from_content(content: &ContentPack) -> Self {
        let start_location = content
            .locations
            .get(&content.start.location)
            .expect("loader guarantees the start location exists");

        let mut flags = BTreeMap::new();
        for (key, def) in &content.flags {
            flags.insert(key.clone(), def.default.clone());
        }

        let mut current_outfit = BTreeMap::new();
        let mut clothing = BTreeMap::new();
        for (entity_id, entity) in &content.entities {
            if let Some(outfit_id) = &entity.default_outfit {
                current_outfit.insert(entity_id.clone(), outfit_id.clone());
                if let Some(outfit) = content.outfits.get(outfit_id) {
                    let layers: BTreeMap<LayerId, LayerState> = outfit
                        .layers
                        .iter()
                        .map(|l| (l.id.clone(), LayerState::Intact))
                        .collect();
                    clothing.insert(entity_id.clone(), layers);
                }
            }
        }

        let mut arcs = BTreeMap::new();
        for arc in &content.arcs {
            let initial = arc.initial_stage();
            arcs.insert(
                arc.id.clone(),
                ArcState {
                    stage: initial.id.clone(),
                    history: vec![initial.id.clone()],
                    entered_turn: 0,
                },
            );
        }

        let minute = content.start.minute_of_day % MINUTES_PER_DAY;
        let slot = content
            .slot_at(minute)
            .map_or_else(|| TimeSlotId::new("day"), |s| s.id.clone());

        Self {
            turn: 0,
            meters: BTreeMap::new(),
            flags,
            modifiers: BTreeMap::new(),
            inventory: BTreeMap::new(),
            equipment: BTreeMap::new(),
            clothing,
            current_outfit,
            position: Position {
                zone: start_location.zone.clone(),
                location: start_location.id.clone(),
            },
            clock: Clock {
                day: 1,
                slot,
                minute_of_day: minute,
            },
            arcs,
            event_cooldowns: BTreeMap::new(),
            event_fire_counts: BTreeMap::new(),
            unlocks: BTreeMap::new(),
            current_node: content.start.node.clone(),
            memory_log: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Meters
    // -------------------------------------------------------------------------

    /// Current meter value, falling back to the definition's default when
    /// never written.
    #[must_use]
    pub fn meter(&self, content: &ContentPack, entity: &EntityId, meter: &MeterId) -> f64 {
        self.meters
            .get(entity)
            .and_then(|m| m.get(meter).copied())
            .unwrap_or_else(|| content.meters.get(meter).map_or(0.0, |d| d.default))
    }

    /// Raw meter value, if ever written.
    #[must_use]
    pub fn meter_raw(&self, entity: &EntityId, meter: &MeterId) -> Option<f64> {
        self.meters.get(entity).and_then(|m| m.get(meter).copied())
    }

    pub(crate) fn set_meter(&mut self, entity: EntityId, meter: MeterId, value: f64) {
        self.meters.entry(entity).or_default().insert(meter, value);
    }

    // -------------------------------------------------------------------------
    // Flags
    // -------------------------------------------------------------------------

    /// Current flag value.
    #[must_use]
    pub fn flag(&self, key: &FlagKey) -> Option<&Scalar> {
        self.flags.get(key)
    }

    pub(crate) fn set_flag(&mut self, key: FlagKey, value: Scalar) {
        self.flags.insert(key, value);
    }

    // -------------------------------------------------------------------------
    // Modifiers
    // -------------------------------------------------------------------------

    /// Modifiers active on an entity.
    #[must_use]
    pub fn active_modifiers(&self, entity: &EntityId) -> &[ActiveModifier] {
        self.modifiers.get(entity).map_or(&[], Vec::as_slice)
    }

    /// True if `modifier` is active on `entity`.
    #[must_use]
    pub fn has_modifier(&self, entity: &EntityId, modifier: &ModifierId) -> bool {
        self.active_modifiers(entity).iter().any(|m| &m.id == modifier)
    }

    /// All entities that currently carry at least one modifier.
    pub fn modified_entities(&self) -> impl Iterator<Item = &EntityId> {
        self.modifiers.keys()
    }

    pub(crate) fn add_modifier(&mut self, entity: EntityId, active: ActiveModifier) {
        let list = self.modifiers.entry(entity).or_default();
        if let Some(existing) = list.iter_mut().find(|m| m.id == active.id) {
            // Re-application refreshes the duration but keeps the original
            // activation turn for tie-breaks.
            existing.remaining_minutes = active.remaining_minutes;
        } else {
            list.push(active);
        }
    }

    pub(crate) fn remove_modifier(&mut self, entity: &EntityId, modifier: &ModifierId) -> bool {
        let Some(list) = self.modifiers.get_mut(entity) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| &m.id != modifier);
        let removed = list.len() != before;
        if list.is_empty() {
            self.modifiers.remove(entity);
        }
        removed
    }

    pub(crate) fn modifiers_mut(
        &mut self,
    ) -> &mut BTreeMap<EntityId, Vec<ActiveModifier>> {
        &mut self.modifiers
    }

    // -------------------------------------------------------------------------
    // Inventory and equipment
    // -------------------------------------------------------------------------

    /// Count of `item` held by `owner`.
    #[must_use]
    pub fn item_count(&self, owner: &EntityId, item: &ItemId) -> u32 {
        self.inventory
            .get(owner)
            .and_then(|inv| inv.get(item).copied())
            .unwrap_or(0)
    }

    pub(crate) fn add_items(&mut self, owner: EntityId, item: ItemId, count: u32) {
        *self
            .inventory
            .entry(owner)
            .or_default()
            .entry(item)
            .or_insert(0) += count;
    }

    pub(crate) fn remove_items(&mut self, owner: &EntityId, item: &ItemId, count: u32) {
        if let Some(inv) = self.inventory.get_mut(owner) {
            if let Some(held) = inv.get_mut(item) {
                *held = held.saturating_sub(count);
                if *held == 0 {
                    inv.remove(item);
                }
            }
        }
    }

    /// Item equipped in `slot`, if any.
    #[must_use]
    pub fn equipped(&self, owner: &EntityId, slot: &SlotId) -> Option<&ItemId> {
        self.equipment
            .get(owner)
            .and_then(|eq| eq.get(slot))
            .and_then(Option::as_ref)
    }

    pub(crate) fn set_equipped(&mut self, owner: EntityId, slot: SlotId, item: Option<ItemId>) {
        self.equipment.entry(owner).or_default().insert(slot, item);
    }

    // -------------------------------------------------------------------------
    // Clothing
    // -------------------------------------------------------------------------

    /// State of one clothing layer; `None` when the character does not
    /// wear that layer.
    #[must_use]
    pub fn layer_state(&self, character: &EntityId, layer: &LayerId) -> Option<LayerState> {
        self.clothing
            .get(character)
            .and_then(|layers| layers.get(layer).copied())
    }

    /// Outfit a character currently wears.
    #[must_use]
    pub fn outfit(&self, character: &EntityId) -> Option<&OutfitId> {
        self.current_outfit.get(character)
    }

    pub(crate) fn set_layer_state(
        &mut self,
        character: EntityId,
        layer: LayerId,
        state: LayerState,
    ) {
        self.clothing
            .entry(character)
            .or_default()
            .insert(layer, state);
    }

    pub(crate) fn set_outfit(
        &mut self,
        character: EntityId,
        outfit: OutfitId,
        layers: impl Iterator<Item = LayerId>,
    ) {
        // Changing outfits resets every layer of the new outfit to intact.
        let map: BTreeMap<LayerId, LayerState> =
            layers.map(|l| (l, LayerState::Intact)).collect();
        self.clothing.insert(character.clone(), map);
        self.current_outfit.insert(character, outfit);
    }

    // -------------------------------------------------------------------------
    // Arcs
    // -------------------------------------------------------------------------

    /// Where `arc` currently is.
    #[must_use]
    pub fn arc(&self, arc: &ArcId) -> Option<&ArcState> {
        self.arcs.get(arc)
    }

    pub(crate) fn arc_mut(&mut self, arc: &ArcId) -> Option<&mut ArcState> {
        self.arcs.get_mut(arc)
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Times `event` has fired this run.
    #[must_use]
    pub fn event_fires(&self, event: &EventId) -> u32 {
        self.event_fire_counts.get(event).copied().unwrap_or(0)
    }

    /// Turn at which `event` leaves cooldown, if cooling down.
    #[must_use]
    pub fn event_cooldown_until(&self, event: &EventId) -> Option<u32> {
        self.event_cooldowns.get(event).copied()
    }

    pub(crate) fn record_event_fire(&mut self, event: EventId, cooldown_until: Option<u32>) {
        *self.event_fire_counts.entry(event.clone()).or_insert(0) += 1;
        match cooldown_until {
            Some(turn) => {
                self.event_cooldowns.insert(event, turn);
            }
            None => {
                self.event_cooldowns.remove(&event);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Unlocks and memory
    // -------------------------------------------------------------------------

    /// True if `id` of `kind` has been unlocked.
    #[must_use]
    pub fn is_unlocked(&self, kind: &str, id: &str) -> bool {
        self.unlocks.get(kind).is_some_and(|set| set.contains(id))
    }

    pub(crate) fn unlock(&mut self, kind: String, id: String) {
        self.unlocks.entry(kind).or_default().insert(id);
    }

    /// Free-text memory appends accepted from validated deltas.
    #[must_use]
    pub fn memory_log(&self) -> &[String] {
        &self.memory_log
    }

    pub(crate) fn append_memory(&mut self, text: String) {
        self.memory_log.push(text);
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Checks the at-rest invariants the engine relies on.
    ///
    /// A breach means a content-authoring or engine bug, never an expected
    /// runtime condition, so callers should treat it as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation`] describing the first breach found.
    pub fn check_invariants(&self, content: &ContentPack) -> Result<(), InvariantViolation> {
        for (entity, meters) in &self.meters {
            for (meter, value) in meters {
                let Some(def) = content.meters.get(meter) else {
                    return Err(InvariantViolation::new(format!(
                        "meter `{meter}` on `{entity}` has no definition"
                    )));
                };
                if *value < def.min || *value > def.max {
                    return Err(InvariantViolation::new(format!(
                        "meter `{meter}` on `{entity}` is {value}, outside [{}, {}]",
                        def.min, def.max
                    )));
                }
            }
        }

        for (key, value) in &self.flags {
            let Some(def) = content.flags.get(key) else {
                return Err(InvariantViolation::new(format!(
                    "flag `{key}` has no declaration"
                )));
            };
            if value.kind() != def.kind {
                return Err(InvariantViolation::new(format!(
                    "flag `{key}` holds {:?}, declared {:?}",
                    value.kind(),
                    def.kind
                )));
            }
        }

        for (entity, active) in &self.modifiers {
            let mut groups_seen = BTreeSet::new();
            for m in active {
                let Some(def) = content.modifiers.get(&m.id) else {
                    return Err(InvariantViolation::new(format!(
                        "modifier `{}` on `{entity}` has no definition",
                        m.id
                    )));
                };
                if let Some(group) = &def.exclusive_group {
                    if !groups_seen.insert(group.clone()) {
                        return Err(InvariantViolation::new(format!(
                            "entity `{entity}` holds two modifiers in exclusive group `{group}`"
                        )));
                    }
                }
            }
        }

        for (arc_id, arc_state) in &self.arcs {
            let Some(def) = content.arc(arc_id) else {
                return Err(InvariantViolation::new(format!(
                    "arc `{arc_id}` has no definition"
                )));
            };
            if def.stage(&arc_state.stage).is_none() {
                return Err(InvariantViolation::new(format!(
                    "arc `{arc_id}` is in undeclared stage `{}`",
                    arc_state.stage
                )));
            }
        }

        Ok(())
    }
}
