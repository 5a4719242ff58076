//! Error taxonomy for turn resolution.
//!
//! Propagation policy, in one place:
//!
//! - [`ContentError`]: a bad reference or malformed effect inside a
//!   batch. The single effect is rejected and logged; the batch continues.
//! - [`ValidationError`]: an externally-proposed delta that is out of
//!   bounds or gate-violating. The sub-delta is dropped, a violation is
//!   recorded, the rest of the delta continues.
//! - [`DeltaParseError`]: a structurally malformed delta payload.
//!   Triggers the bounded retry, then fails closed for the turn.
//! - [`InvariantViolation`]: engine or authoring bug. Fatal; never
//!   swallowed.
//!
//! Players never see any of these: refused gated actions surface as
//! authored in-character refusal text, everything else degrades to
//! "nothing happened this turn" plus a diagnostic.

use thiserror::Error;

use crate::content::ScalarKind;
use crate::ids::{
    EntityId, FlagKey, GateId, ItemId, LayerId, LocationId, MeterId, ModifierId,
    NodeId, OutfitId, SlotId,
};

/// A bad reference or malformed effect in authored content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// Entity id not in the pack.
    #[error("unknown entity `{0}`")]
    UnknownEntity(EntityId),
    /// Meter id not in the pack.
    #[error("unknown meter `{0}`")]
    UnknownMeter(MeterId),
    /// Flag key not declared.
    #[error("unknown flag `{0}`")]
    UnknownFlag(FlagKey),
    /// Item id not in the pack.
    #[error("unknown item `{0}`")]
    UnknownItem(ItemId),
    /// Modifier id not in the pack.
    #[error("unknown modifier `{0}`")]
    UnknownModifier(ModifierId),
    /// Location id not in the pack.
    #[error("unknown location `{0}`")]
    UnknownLocation(LocationId),
    /// Outfit id not in the pack.
    #[error("unknown outfit `{0}`")]
    UnknownOutfit(OutfitId),
    /// Layer not part of the character's current outfit.
    #[error("layer `{layer}` is not part of `{character}`'s current outfit")]
    UnknownLayer {
        /// The character.
        character: EntityId,
        /// The layer.
        layer: LayerId,
    },
    /// Node id not in the pack.
    #[error("unknown node `{0}`")]
    UnknownNode(NodeId),
    /// Equipment slot mismatch.
    #[error("item `{item}` does not fit slot `{slot}`")]
    SlotMismatch {
        /// The item.
        item: ItemId,
        /// The slot.
        slot: SlotId,
    },
    /// Write type does not match the flag's declared type.
    #[error("flag `{key}` expects {expected:?}, got {got:?}")]
    FlagTypeMismatch {
        /// The flag.
        key: FlagKey,
        /// Declared type.
        expected: ScalarKind,
        /// Attempted write type.
        got: ScalarKind,
    },
    /// Meter division with a zero operand.
    #[error("division by zero on meter `{0}`")]
    DivisionByZero(MeterId),
    /// Recursive effect nesting exceeded the configured cap.
    #[error("effect nesting exceeds depth {limit}")]
    EffectTooDeep {
        /// The configured cap.
        limit: u8,
    },
    /// A `Random` effect with no positive-weight branch.
    #[error("random effect has no selectable branch")]
    EmptyRandom,
}

/// An externally-proposed delta that failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Requested meter value (or magnitude) outside declared bounds.
    #[error("meter `{meter}` request {requested} is outside [{min}, {max}]")]
    MeterOutOfRange {
        /// The meter.
        meter: MeterId,
        /// The requested value.
        requested: f64,
        /// Declared minimum.
        min: f64,
        /// Declared maximum.
        max: f64,
    },
    /// Requested change magnitude exceeds the per-turn cap.
    #[error("meter `{meter}` change {requested} exceeds per-turn cap {cap}")]
    DeltaCapExceeded {
        /// The meter.
        meter: MeterId,
        /// Requested magnitude.
        requested: f64,
        /// The cap.
        cap: f64,
    },
    /// A consent gate is closed for this entity.
    #[error("gate `{gate}` is closed for `{entity}`")]
    GateDenied {
        /// The entity.
        entity: EntityId,
        /// The gate.
        gate: GateId,
    },
    /// The current location is not private enough.
    #[error("location `{location}` is not private enough")]
    PrivacyDenied {
        /// The location.
        location: LocationId,
    },
    /// A field referenced something that does not exist.
    #[error(transparent)]
    UnknownReference(#[from] ContentError),
    /// A field was present but unintelligible.
    #[error("malformed `{field}`: {reason}")]
    Malformed {
        /// The delta field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// A structurally malformed external delta payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaParseError {
    /// Not valid JSON, or not the expected shape.
    #[error("malformed delta payload: {0}")]
    Json(String),
}

/// A broken engine invariant. Fatal: aborting the run is the only safe
/// response, since it implies a bug rather than bad runtime input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(String);

impl InvariantViolation {
    /// Creates a violation with a description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }
}
