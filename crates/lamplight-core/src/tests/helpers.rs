//! Shared test fixtures: the sample content pack and engine factories.
//!
//! The pack models a small slice of a narrative game: one NPC (`alex`),
//! a café / street / bedroom map, intoxication and mood modifiers,
//! consent gates, a weighted street-event pool, and a handful of arcs.
//! It is sized so every subsystem has something real to chew on.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::content::{
    ArcDef, ArcEvaluation, ChoiceDef, ContentPack, EntityDef, EventDef, EventScope, FlagDef,
    GateDef, ItemDef, LayerDef, LocationDef, MeterDef, ModifierDef, NodeDef, OutfitDef, PoolDef,
    Privacy, Scalar, ScalarKind, Stacking, StageCondition, StageDef, StartDef, ThresholdDef,
    TimeSlotDef, Trigger,
};
use crate::effect::{Effect, EffectSpec, NumericOp, UnlockKind};
use crate::engine::{Engine, EngineConfig};
use crate::ids::{
    ArcId, EntityId, EventId, FlagKey, GateId, ItemId, LayerId, LocationId, MeterId, ModifierId,
    NodeId, OutfitId, PoolId, SlotId, StageId, TimeSlotId, ZoneId,
};
use crate::rng::TurnRng;

/// A turn stream for tests that do not care about the key.
pub fn turn_rng() -> TurnRng {
    TurnRng::for_turn("game", "run", 1)
}

/// Engine configuration matching [`turn_rng`]'s key.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        game_id: "game".to_string(),
        run_id: "run".to_string(),
        ..EngineConfig::default()
    }
}

/// A fresh engine over the sample pack.
pub fn sample_engine(run_id: &str) -> Engine {
    Engine::new(
        Arc::new(sample_content()),
        EngineConfig {
            game_id: "game".to_string(),
            run_id: run_id.to_string(),
            ..EngineConfig::default()
        },
    )
}

fn meter_change(target: &str, meter: &str, op: NumericOp, value: f64) -> EffectSpec {
    EffectSpec::new(Effect::MeterChange {
        target: EntityId::new(target),
        meter: MeterId::new(meter),
        op,
        value,
    })
}

fn set_flag_text(key: &str, value: &str) -> EffectSpec {
    EffectSpec::new(Effect::FlagSet {
        key: FlagKey::new(key),
        value: Scalar::Text(value.to_string()),
    })
}

/// Builds the sample content pack used across the test suite.
#[allow(clippy::too_many_lines)]
pub fn sample_content() -> ContentPack {
    let mut entities = BTreeMap::new();
    entities.insert(
        EntityId::new("player"),
        EntityDef {
            id: EntityId::new("player"),
            name: "You".to_string(),
            default_outfit: None,
        },
    );
    entities.insert(
        EntityId::new("alex"),
        EntityDef {
            id: EntityId::new("alex"),
            name: "Alex".to_string(),
            default_outfit: Some(OutfitId::new("casual")),
        },
    );

    let mut meters = BTreeMap::new();
    meters.insert(
        MeterId::new("trust"),
        MeterDef {
            id: MeterId::new("trust"),
            min: 0.0,
            max: 100.0,
            default: 45.0,
            delta_cap_per_turn: None,
            thresholds: vec![
                ThresholdDef {
                    label: "stranger".to_string(),
                    lo: 0.0,
                    hi: 39.0,
                },
                ThresholdDef {
                    label: "friend".to_string(),
                    lo: 40.0,
                    hi: 69.0,
                },
                ThresholdDef {
                    label: "close".to_string(),
                    lo: 70.0,
                    hi: 100.0,
                },
            ],
        },
    );
    meters.insert(
        MeterId::new("desire"),
        MeterDef {
            id: MeterId::new("desire"),
            min: 0.0,
            max: 100.0,
            default: 0.0,
            delta_cap_per_turn: Some(15.0),
            thresholds: Vec::new(),
        },
    );
    meters.insert(
        MeterId::new("corruption"),
        MeterDef {
            id: MeterId::new("corruption"),
            min: 0.0,
            max: 100.0,
            default: 0.0,
            delta_cap_per_turn: None,
            thresholds: Vec::new(),
        },
    );

    let mut flags = BTreeMap::new();
    flags.insert(
        FlagKey::new("alex.met"),
        FlagDef {
            key: FlagKey::new("alex.met"),
            kind: ScalarKind::Bool,
            default: Scalar::Bool(false),
        },
    );
    flags.insert(
        FlagKey::new("street.last_event"),
        FlagDef {
            key: FlagKey::new("street.last_event"),
            kind: ScalarKind::Text,
            default: Scalar::Text(String::new()),
        },
    );

    let mut modifiers = BTreeMap::new();
    modifiers.insert(
        ModifierId::new("tipsy"),
        ModifierDef {
            id: ModifierId::new("tipsy"),
            when: None,
            subject: None,
            duration_minutes: Some(90),
            exclusive_group: Some("intoxication".to_string()),
            stack_group: Some("intoxication_level".to_string()),
            stack_value: 1.0,
            priority: 1,
            entry_effects: Vec::new(),
            exit_effects: Vec::new(),
            disallow_gates: Vec::new(),
        },
    );
    modifiers.insert(
        ModifierId::new("drunk"),
        ModifierDef {
            id: ModifierId::new("drunk"),
            when: None,
            subject: None,
            duration_minutes: Some(180),
            exclusive_group: Some("intoxication".to_string()),
            stack_group: Some("intoxication_level".to_string()),
            stack_value: 2.0,
            priority: 2,
            entry_effects: Vec::new(),
            exit_effects: Vec::new(),
            disallow_gates: vec![GateId::new("accept_kiss"), GateId::new("accept_undress")],
        },
    );
    modifiers.insert(
        ModifierId::new("confident"),
        ModifierDef {
            id: ModifierId::new("confident"),
            when: None,
            subject: None,
            duration_minutes: None,
            exclusive_group: None,
            stack_group: Some("mood".to_string()),
            stack_value: 5.0,
            priority: 1,
            entry_effects: vec![meter_change("alex", "desire", NumericOp::Add, 5.0)],
            exit_effects: Vec::new(),
            disallow_gates: Vec::new(),
        },
    );
    modifiers.insert(
        ModifierId::new("withdrawn"),
        ModifierDef {
            id: ModifierId::new("withdrawn"),
            when: Some(wick::parse("meters.self.trust < 20").unwrap()),
            subject: Some(EntityId::new("alex")),
            duration_minutes: None,
            exclusive_group: None,
            stack_group: Some("mood".to_string()),
            stack_value: -10.0,
            priority: 1,
            entry_effects: Vec::new(),
            exit_effects: Vec::new(),
            disallow_gates: Vec::new(),
        },
    );

    let mut stack_groups: BTreeMap<String, Stacking> = BTreeMap::new();
    stack_groups.insert("intoxication_level".to_string(), Stacking::Highest);
    stack_groups.insert("mood".to_string(), Stacking::Additive);

    let mut gates = BTreeMap::new();
    gates.insert(
        GateId::new("accept_kiss"),
        GateDef {
            id: GateId::new("accept_kiss"),
            when: wick::parse("meters.self.trust >= 60").unwrap(),
            min_privacy: Privacy::SemiPrivate,
        },
    );
    gates.insert(
        GateId::new("accept_undress"),
        GateDef {
            id: GateId::new("accept_undress"),
            when: wick::parse("meters.self.trust >= 75").unwrap(),
            min_privacy: Privacy::Private,
        },
    );

    let mut items = BTreeMap::new();
    items.insert(
        ItemId::new("rose"),
        ItemDef {
            id: ItemId::new("rose"),
            name: "Rose".to_string(),
            slot: None,
        },
    );
    items.insert(
        ItemId::new("scarf"),
        ItemDef {
            id: ItemId::new("scarf"),
            name: "Wool scarf".to_string(),
            slot: Some(SlotId::new("neck")),
        },
    );

    let mut outfits = BTreeMap::new();
    outfits.insert(
        OutfitId::new("casual"),
        OutfitDef {
            id: OutfitId::new("casual"),
            layers: vec![
                LayerDef {
                    id: LayerId::new("top"),
                    required_gate: Some(GateId::new("accept_undress")),
                },
                LayerDef {
                    id: LayerId::new("skirt"),
                    required_gate: Some(GateId::new("accept_undress")),
                },
                LayerDef {
                    id: LayerId::new("shoes"),
                    required_gate: None,
                },
            ],
        },
    );

    let mut locations = BTreeMap::new();
    locations.insert(
        LocationId::new("cafe"),
        LocationDef {
            id: LocationId::new("cafe"),
            zone: ZoneId::new("downtown"),
            privacy: Privacy::Public,
            present: vec![EntityId::new("alex")],
        },
    );
    locations.insert(
        LocationId::new("street"),
        LocationDef {
            id: LocationId::new("street"),
            zone: ZoneId::new("downtown"),
            privacy: Privacy::Public,
            present: Vec::new(),
        },
    );
    locations.insert(
        LocationId::new("bedroom"),
        LocationDef {
            id: LocationId::new("bedroom"),
            zone: ZoneId::new("apartment"),
            privacy: Privacy::Private,
            present: vec![EntityId::new("alex")],
        },
    );

    let mut nodes = BTreeMap::new();
    for id in ["start", "confession"] {
        nodes.insert(NodeId::new(id), NodeDef { id: NodeId::new(id) });
    }

    let mut events = BTreeMap::new();
    events.insert(
        EventId::new("confession"),
        EventDef {
            id: EventId::new("confession"),
            scope: EventScope::Location(LocationId::new("cafe")),
            trigger: Trigger::Conditional {
                when: wick::parse("meters.alex.trust >= 80").unwrap(),
            },
            priority: 10,
            interrupt: false,
            once: true,
            max_fires: None,
            cooldown_turns: 0,
            weight: 1,
            effects: vec![meter_change("alex", "desire", NumericOp::Add, 10.0)],
            narrative: Some("Alex sets down the cup and takes a breath.".to_string()),
            choices: vec![
                ChoiceDef {
                    id: "lean_in".to_string(),
                    label: "Lean in".to_string(),
                    effects: vec![meter_change("alex", "trust", NumericOp::Add, 5.0)],
                },
                ChoiceDef {
                    id: "deflect".to_string(),
                    label: "Change the subject".to_string(),
                    effects: Vec::new(),
                },
            ],
        },
    );
    events.insert(
        EventId::new("teasing"),
        EventDef {
            id: EventId::new("teasing"),
            scope: EventScope::Anywhere,
            trigger: Trigger::Conditional {
                when: wick::parse("meters.alex.trust >= 50").unwrap(),
            },
            priority: 1,
            interrupt: false,
            once: false,
            max_fires: None,
            cooldown_turns: 2,
            weight: 1,
            effects: vec![meter_change("alex", "desire", NumericOp::Add, 2.0)],
            narrative: Some("Alex smirks at something you said.".to_string()),
            choices: Vec::new(),
        },
    );
    events.insert(
        EventId::new("curfew_reminder"),
        EventDef {
            id: EventId::new("curfew_reminder"),
            scope: EventScope::Anywhere,
            trigger: Trigger::Scheduled {
                day: None,
                slots: vec![TimeSlotId::new("evening")],
            },
            priority: 5,
            interrupt: false,
            once: false,
            max_fires: None,
            cooldown_turns: 6,
            weight: 1,
            effects: Vec::new(),
            narrative: Some("The streetlights flicker on.".to_string()),
            choices: Vec::new(),
        },
    );
    events.insert(
        EventId::new("busker"),
        EventDef {
            id: EventId::new("busker"),
            scope: EventScope::Location(LocationId::new("street")),
            trigger: Trigger::Pool {
                pool: PoolId::new("street_pool"),
            },
            priority: 0,
            interrupt: false,
            once: false,
            max_fires: None,
            cooldown_turns: 0,
            weight: 70,
            effects: vec![set_flag_text("street.last_event", "busker")],
            narrative: Some("A busker strikes up a waltz.".to_string()),
            choices: Vec::new(),
        },
    );
    events.insert(
        EventId::new("pickpocket"),
        EventDef {
            id: EventId::new("pickpocket"),
            scope: EventScope::Location(LocationId::new("street")),
            trigger: Trigger::Pool {
                pool: PoolId::new("street_pool"),
            },
            priority: 0,
            interrupt: false,
            once: false,
            max_fires: None,
            cooldown_turns: 0,
            weight: 30,
            effects: vec![set_flag_text("street.last_event", "pickpocket")],
            narrative: Some("A stranger bumps into you, apologizing too quickly.".to_string()),
            choices: Vec::new(),
        },
    );

    let mut pools = BTreeMap::new();
    pools.insert(
        PoolId::new("street_pool"),
        PoolDef {
            id: PoolId::new("street_pool"),
            chance_per_turn: 1.0,
        },
    );

    let arcs = vec![
        ArcDef {
            id: ArcId::new("romance_arc"),
            evaluation: ArcEvaluation::Highest,
            tracked_meter: None,
            exclusive_with: vec![ArcId::new("rivalry_arc")],
            stages: vec![
                StageDef {
                    id: StageId::new("distant"),
                    condition: StageCondition::Always,
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
                StageDef {
                    id: StageId::new("dating"),
                    condition: StageCondition::When(
                        wick::parse("meters.alex.trust >= 70").unwrap(),
                    ),
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
            ],
        },
        ArcDef {
            id: ArcId::new("rivalry_arc"),
            evaluation: ArcEvaluation::Highest,
            tracked_meter: None,
            exclusive_with: vec![ArcId::new("romance_arc")],
            stages: vec![
                StageDef {
                    id: StageId::new("neutral"),
                    condition: StageCondition::Always,
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
                StageDef {
                    id: StageId::new("feuding"),
                    condition: StageCondition::When(
                        wick::parse("meters.alex.trust < 10").unwrap(),
                    ),
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
            ],
        },
        ArcDef {
            id: ArcId::new("corruption_arc"),
            evaluation: ArcEvaluation::Highest,
            tracked_meter: Some((EntityId::new("player"), MeterId::new("corruption"))),
            exclusive_with: Vec::new(),
            stages: vec![
                StageDef {
                    id: StageId::new("innocent"),
                    condition: StageCondition::Always,
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
                StageDef {
                    id: StageId::new("curious"),
                    condition: StageCondition::Threshold {
                        enter: 20.0,
                        exit: 18.0,
                    },
                    debounce_turns: 2,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: vec![EffectSpec::new(Effect::Unlock {
                        kind: UnlockKind::Location,
                        id: "club".to_string(),
                    })],
                },
                StageDef {
                    id: StageId::new("bold"),
                    condition: StageCondition::Threshold {
                        enter: 60.0,
                        exit: 55.0,
                    },
                    debounce_turns: 1,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
            ],
        },
        ArcDef {
            id: ArcId::new("daily_rhythm"),
            evaluation: ArcEvaluation::FirstMatch,
            tracked_meter: None,
            exclusive_with: Vec::new(),
            stages: vec![
                StageDef {
                    id: StageId::new("out_and_about"),
                    condition: StageCondition::When(
                        wick::parse("time.slot == 'evening'").unwrap(),
                    ),
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
                StageDef {
                    id: StageId::new("settled"),
                    condition: StageCondition::Always,
                    debounce_turns: 0,
                    entry_effects: Vec::new(),
                    exit_effects: Vec::new(),
                    unlock_effects: Vec::new(),
                },
            ],
        },
    ];

    let time_slots = vec![
        TimeSlotDef {
            id: TimeSlotId::new("morning"),
            start_minute: 360,
        },
        TimeSlotDef {
            id: TimeSlotId::new("afternoon"),
            start_minute: 720,
        },
        TimeSlotDef {
            id: TimeSlotId::new("evening"),
            start_minute: 1080,
        },
    ];

    ContentPack {
        player: EntityId::new("player"),
        entities,
        meters,
        flags,
        modifiers,
        stack_groups,
        gates,
        items,
        outfits,
        locations,
        nodes,
        events,
        pools,
        arcs,
        time_slots,
        start: StartDef {
            location: LocationId::new("cafe"),
            node: NodeId::new("start"),
            minute_of_day: 480,
        },
    }
}
