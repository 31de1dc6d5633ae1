//! Strongly-typed identifiers.
//!
//! Object and class ids are small integers assigned by the topology; the
//! all-ones pattern is reserved as the invalid id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed u32 id newtype wrapper.
///
/// Generates: struct, `new()`, `raw()`, `is_valid()`, an `INVALID` sentinel,
/// Display (hex, the way controller traces print ids), Serialize, Deserialize.
macro_rules! define_raw_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Reserved invalid id (all ones).
            pub const INVALID: $name = $name(u32::MAX);

            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }
    };
}

define_raw_id!(ObjectId);
define_raw_id!(ClassId);
