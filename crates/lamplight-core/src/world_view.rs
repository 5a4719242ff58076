//! Read-only expression window onto world state.
//!
//! `WorldView` is what wick expressions see: a borrowed, immutable view of
//! the current state and content tables, taken at a known point in the
//! turn. It implements [`wick::Host`], so every conditional in the engine
//! (guards, modifier activations, event triggers, arc thresholds, gate
//! predicates) reads state through this one surface and can never mutate
//! it.
//!
//! # Path Namespaces
//!
//! | root | resolves to |
//! |---|---|
//! | `meters.<entity>.<meter>` | number (definition default until written) |
//! | `flags.<key>` | declared scalar (dots in keys allowed) |
//! | `gates.<entity>.<gate>` | bool, from the current gate table |
//! | `modifiers.<entity>` | list of active modifier ids |
//! | `modifiers.<entity>.<id>` | bool |
//! | `inventory.<owner>.<item>` | count |
//! | `equipment.<owner>.<slot>` | item id or null |
//! | `clothing.<character>.<layer>` | `"intact"` / `"displaced"` / `"removed"` |
//! | `outfit.<character>` | outfit id |
//! | `location.zone` / `location.id` / `location.privacy` | strings |
//! | `time.day` / `time.minute_of_day` | numbers |
//! | `time.slot` | slot id |
//! | `arcs.<arc>.stage` | stage id |
//! | `arcs.<arc>.turns_in_stage` | number |
//! | `unlocks.<kind>.<id>` | bool |
//! | `node` | current node id |
//! | `turn` | number |
//!
//! The segment `self` resolves to the view's subject entity, which is how
//! one gate definition covers every character: `meters.self.trust >= 40`.

use wick::Value;

use crate::content::{ContentPack, Privacy, Scalar};
use crate::gate::GateTable;
use crate::ids::{ArcId, EntityId, FlagKey, GateId, ItemId, LayerId, MeterId, ModifierId, SlotId};
use crate::state::WorldState;

/// Immutable expression window over `(state, content)`.
pub struct WorldView<'a> {
    state: &'a WorldState,
    content: &'a ContentPack,
    gates: Option<&'a GateTable>,
    subject: Option<&'a EntityId>,
}

impl<'a> WorldView<'a> {
    /// Creates a view without gate access (used while the gate table is
    /// itself being computed).
    #[must_use]
    pub fn new(state: &'a WorldState, content: &'a ContentPack) -> Self {
        Self {
            state,
            content,
            gates: None,
            subject: None,
        }
    }

    /// Attaches the turn's computed gate table.
    #[must_use]
    pub fn with_gates(mut self, gates: &'a GateTable) -> Self {
        self.gates = Some(gates);
        self
    }

    /// Binds the `self` path segment to an entity.
    #[must_use]
    pub fn for_subject(mut self, subject: &'a EntityId) -> Self {
        self.subject = Some(subject);
        self
    }

    fn resolve_segment(&self, seg: &str) -> String {
        if seg == "self" {
            if let Some(subject) = self.subject {
                return subject.as_str().to_string();
            }
        }
        seg.to_string()
    }

    fn lookup_meters(&self, rest: &[String]) -> Value {
        let [entity, meter] = rest else {
            return Value::Null;
        };
        let entity = EntityId::new(&self.resolve_segment(entity));
        let meter = MeterId::new(meter);
        if !self.content.meters.contains_key(&meter) {
            return Value::Null;
        }
        Value::Num(self.state.meter(self.content, &entity, &meter))
    }

    fn lookup_flags(&self, rest: &[String]) -> Value {
        if rest.is_empty() {
            return Value::Null;
        }
        let key = FlagKey::new(&rest.join("."));
        self.state
            .flag(&key)
            .map_or(Value::Null, Scalar::to_value)
    }

    fn lookup_gates(&self, rest: &[String]) -> Value {
        let [entity, gate] = rest else {
            return Value::Null;
        };
        let entity = EntityId::new(&self.resolve_segment(entity));
        let gate = GateId::new(gate);
        // No table yet means the gates have not been computed this turn;
        // fail closed.
        let open = self
            .gates
            .is_some_and(|table| table.allows(&entity, &gate));
        Value::Bool(open)
    }

    fn lookup_modifiers(&self, rest: &[String]) -> Value {
        match rest {
            [entity] => {
                let entity = EntityId::new(&self.resolve_segment(entity));
                Value::List(
                    self.state
                        .active_modifiers(&entity)
                        .iter()
                        .map(|m| Value::Text(m.id.as_str().to_string()))
                        .collect(),
                )
            }
            [entity, modifier] => {
                let entity = EntityId::new(&self.resolve_segment(entity));
                Value::Bool(self.state.has_modifier(&entity, &ModifierId::new(modifier)))
            }
            _ => Value::Null,
        }
    }

    fn lookup_location(&self, rest: &[String]) -> Value {
        let [field] = rest else {
            return Value::Null;
        };
        match field.as_str() {
            "zone" => Value::Text(self.state.position.zone.as_str().to_string()),
            "id" => Value::Text(self.state.position.location.as_str().to_string()),
            "privacy" => {
                let privacy = self
                    .content
                    .locations
                    .get(&self.state.position.location)
                    .map_or(Privacy::Public, |l| l.privacy);
                Value::Text(privacy_wire(privacy).to_string())
            }
            _ => Value::Null,
        }
    }

    fn lookup_time(&self, rest: &[String]) -> Value {
        let [field] = rest else {
            return Value::Null;
        };
        match field.as_str() {
            "day" => Value::Num(f64::from(self.state.clock.day)),
            "slot" => Value::Text(self.state.clock.slot.as_str().to_string()),
            "minute_of_day" => Value::Num(f64::from(self.state.clock.minute_of_day)),
            _ => Value::Null,
        }
    }

    fn lookup_arcs(&self, rest: &[String]) -> Value {
        let [arc, field] = rest else {
            return Value::Null;
        };
        let Some(arc_state) = self.state.arc(&ArcId::new(arc)) else {
            return Value::Null;
        };
        match field.as_str() {
            "stage" => Value::Text(arc_state.stage.as_str().to_string()),
            "turns_in_stage" => {
                Value::Num(f64::from(self.state.turn.saturating_sub(arc_state.entered_turn)))
            }
            _ => Value::Null,
        }
    }
}

fn privacy_wire(privacy: Privacy) -> &'static str {
    match privacy {
        Privacy::Public => "public",
        Privacy::SemiPrivate => "semi_private",
        Privacy::Private => "private",
    }
}

impl wick::Host for WorldView<'_> {
    fn lookup(&self, path: &[String]) -> Value {
        let Some((root, rest)) = path.split_first() else {
            return Value::Null;
        };
        match root.as_str() {
            "meters" => self.lookup_meters(rest),
            "flags" => self.lookup_flags(rest),
            "gates" => self.lookup_gates(rest),
            "modifiers" => self.lookup_modifiers(rest),
            "inventory" => match rest {
                [owner, item] => {
                    let owner = EntityId::new(&self.resolve_segment(owner));
                    Value::Num(f64::from(self.state.item_count(&owner, &ItemId::new(item))))
                }
                _ => Value::Null,
            },
            "equipment" => match rest {
                [owner, slot] => {
                    let owner = EntityId::new(&self.resolve_segment(owner));
                    self.state
                        .equipped(&owner, &SlotId::new(slot))
                        .map_or(Value::Null, |item| Value::Text(item.as_str().to_string()))
                }
                _ => Value::Null,
            },
            "clothing" => match rest {
                [character, layer] => {
                    let character = EntityId::new(&self.resolve_segment(character));
                    self.state
                        .layer_state(&character, &LayerId::new(layer))
                        .map_or(Value::Null, |s| Value::Text(s.as_wire().to_string()))
                }
                _ => Value::Null,
            },
            "outfit" => match rest {
                [character] => {
                    let character = EntityId::new(&self.resolve_segment(character));
                    self.state
                        .outfit(&character)
                        .map_or(Value::Null, |o| Value::Text(o.as_str().to_string()))
                }
                _ => Value::Null,
            },
            "location" => self.lookup_location(rest),
            "time" => self.lookup_time(rest),
            "arcs" => self.lookup_arcs(rest),
            "unlocks" => match rest {
                [kind, id] => Value::Bool(self.state.is_unlocked(kind, id)),
                _ => Value::Null,
            },
            "node" => {
                if rest.is_empty() {
                    Value::Text(self.state.current_node.as_str().to_string())
                } else {
                    Value::Null
                }
            }
            "turn" => {
                if rest.is_empty() {
                    Value::Num(f64::from(self.state.turn))
                } else {
                    Value::Null
                }
            }
            _ => Value::Null,
        }
    }

    fn has_item(&self, item: &str) -> bool {
        self.state.item_count(&self.content.player, &ItemId::new(item)) > 0
    }

    fn npc_present(&self, npc: &str) -> bool {
        self.content
            .locations
            .get(&self.state.position.location)
            .is_some_and(|l| l.present.iter().any(|e| e.as_str() == npc))
    }
}
