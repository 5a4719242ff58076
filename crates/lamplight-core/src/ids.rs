//! Stable string identifiers for content and state.
//!
//! Content definitions are keyed by stable string ids chosen by authors;
//! the loader guarantees uniqueness and cross-reference validity before a
//! `ContentPack` ever reaches the engine. Each id kind gets its own
//! newtype so an `EventId` can never be passed where an `ArcId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an id from a string.
            #[must_use]
            pub fn new(id: &str) -> Self {
                Self(id.to_string())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A character or other stateful entity.
    EntityId
);
string_id!(
    /// A bounded numeric meter (`trust`, `corruption`).
    MeterId
);
string_id!(
    /// A typed scalar progression flag. May contain dots (`alex.met`).
    FlagKey
);
string_id!(
    /// A named status modifier (`tipsy`, `confident`).
    ModifierId
);
string_id!(
    /// A consent/safety gate (`accept_kiss`).
    GateId
);
string_id!(
    /// An inventory item.
    ItemId
);
string_id!(
    /// An equipment slot on a character.
    SlotId
);
string_id!(
    /// A named span of the day (`morning`, `night`).
    TimeSlotId
);
string_id!(
    /// A clothing layer within an outfit.
    LayerId
);
string_id!(
    /// A wardrobe outfit.
    OutfitId
);
string_id!(
    /// A zone grouping several locations.
    ZoneId
);
string_id!(
    /// A single location within a zone.
    LocationId
);
string_id!(
    /// A narrative node.
    NodeId
);
string_id!(
    /// A random event pool.
    PoolId
);
string_id!(
    /// A narrative event.
    EventId
);
string_id!(
    /// A long-running progression arc.
    ArcId
);
string_id!(
    /// A stage within an arc.
    StageId
);
