//! Identifiers for workers, scheduling requests and calls
//!
//! All ids are UUIDv7 so they sort by creation time, which keeps call-store
//! listings and diagnostics in a stable order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sector::SectorId;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh id
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// First 8 hex chars, for compact log output
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Identity of one connected worker handle
    WorkerId
}

uuid_id! {
    /// Identity of one scheduling request, used for removal
    SchedId
}

/// Identity of one dispatched piece of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    pub sector: SectorId,
    pub id: Uuid,
}

impl CallId {
    /// New call on the given sector
    pub fn new(sector: SectorId) -> Self {
        Self {
            sector,
            id: Uuid::now_v7(),
        }
    }

    /// Key under which the call is tracked in the call store
    pub fn store_key(&self) -> String {
        format!("call/{}", self.id)
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.sector, self.id)
    }
}
