//! Serde data file structs for materials scenarios.
//!
//! These structs define the on-disk format for materials, producers,
//! batches, stages and the resources subsystem. They are deserialized from
//! RON, JSON, or TOML data files and then resolved into core types by the
//! loader. Everything is referenced by name; numeric batch and stage ids are
//! assigned by the loader in file order.

use serde::Deserialize;
use std::collections::BTreeMap;

// ===========================================================================
// Properties
// ===========================================================================

/// A property definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyData {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyTypeData,
    #[serde(default)]
    pub default: Option<ValueData>,
    #[serde(default = "default_true")]
    pub mutable: bool,
}

fn default_true() -> bool {
    true
}

/// The declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyTypeData {
    Boolean,
    Integer,
    Double,
    Text,
}

/// A property value as written in a data file. Integers are accepted where
/// a double is declared.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

// ===========================================================================
// Materials file
// ===========================================================================

/// Top-level contents of `materials.{ron,json,toml}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialsData {
    pub materials: Vec<MaterialData>,
    #[serde(default)]
    pub producer_properties: Vec<PropertyData>,
    pub producers: Vec<ProducerData>,
    #[serde(default)]
    pub batches: Vec<BatchData>,
    #[serde(default)]
    pub stages: Vec<StageData>,
}

/// A material type and the batch properties defined for it.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialData {
    pub name: String,
    #[serde(default)]
    pub batch_properties: Vec<PropertyData>,
}

/// A materials producer with its property values and ledger balances.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerData {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueData>,
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
}

/// A batch, named so stages can refer to it.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchData {
    pub name: String,
    pub material: String,
    pub producer: String,
    pub amount: f64,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueData>,
}

/// A stage and its member batches, in order.
#[derive(Debug, Clone, Deserialize)]
pub struct StageData {
    pub name: String,
    pub producer: String,
    #[serde(default)]
    pub offered: bool,
    #[serde(default)]
    pub batches: Vec<String>,
}

// ===========================================================================
// Resources file
// ===========================================================================

/// Top-level contents of the optional `resources.{ron,json,toml}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesData {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values() {
        let values: Vec<ValueData> = serde_json::from_str(r#"[true, 3, 2.5, "hot"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ValueData::Boolean(true),
                ValueData::Integer(3),
                ValueData::Double(2.5),
                ValueData::Text("hot".to_string()),
            ]
        );
    }

    #[test]
    fn property_defaults() {
        let property: PropertyData =
            serde_json::from_str(r#"{ "name": "grade", "type": "integer" }"#).unwrap();
        assert_eq!(property.property_type, PropertyTypeData::Integer);
        assert!(property.default.is_none());
        assert!(property.mutable);
    }

    #[test]
    fn minimal_materials_file() {
        let data: MaterialsData = ron::from_str(
            r#"(
                materials: [(name: "ore")],
                producers: [(name: "mine")],
            )"#,
        )
        .unwrap();
        assert_eq!(data.materials.len(), 1);
        assert!(data.batches.is_empty());
        assert!(data.stages.is_empty());
        assert!(data.producers[0].resources.is_empty());
    }
}
