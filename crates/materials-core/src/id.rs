use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares an opaque, string-backed identifier. These id spaces are open:
/// scenarios register new values at runtime, so they are handles into
/// registries rather than closed enums.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }
    };
}

string_id! {
    /// Identifies a material type (iron ore, vaccine, ...).
    MaterialId
}

string_id! {
    /// Identifies a materials producer.
    MaterialsProducerId
}

string_id! {
    /// Identifies a batch property. Scoped to a single material.
    BatchPropertyId
}

string_id! {
    /// Identifies a materials producer property.
    ProducerPropertyId
}

string_id! {
    /// Identifies a fungible resource owned by the resources subsystem.
    ResourceId
}

string_id! {
    /// Identifies a region owned by the regions subsystem.
    RegionId
}

/// Identifies a batch. Allocated from a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub i64);

/// Identifies a stage. Allocated from a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub i64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_compare_by_name() {
        let a = MaterialId::new("iron");
        let b = MaterialId::from("iron");
        let c = MaterialId::new("copper");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(c < a);
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(MaterialsProducerId::new("mill"), 1);
        map.insert(MaterialsProducerId::new("smelter"), 2);
        assert_eq!(map[&MaterialsProducerId::new("mill")], 1);
    }

    #[test]
    fn display_formats() {
        assert_eq!(BatchId(7).to_string(), "batch#7");
        assert_eq!(StageId(3).to_string(), "stage#3");
        assert_eq!(ResourceId::new("fuel").to_string(), "fuel");
    }

    #[test]
    fn counter_ids_copy() {
        let a = BatchId(5);
        let b = a;
        assert_eq!(a, b);
    }
}
