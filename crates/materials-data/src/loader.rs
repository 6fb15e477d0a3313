//! Resolution pipeline: reads scenario files, resolves names into ids, and
//! builds a validated [`MaterialsState`] plus its resources subsystem.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`load_scenario`].

use crate::schema::{MaterialsData, PropertyData, PropertyTypeData, ResourcesData, ValueData};
use materials_core::error::MaterialsError;
use materials_core::id::*;
use materials_core::manager::MaterialsDataManager;
use materials_core::property::{PropertyDefinition, PropertyType, PropertyValue};
use materials_core::resources::RegionResources;
use materials_core::state::MaterialsState;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base name of the required materials file.
pub const MATERIALS_FILE: &str = "materials";

/// Base name of the optional resources file.
pub const RESOURCES_FILE: &str = "resources";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during scenario loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: &'static str, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The resolved scenario violates a materials invariant.
    #[error("invalid scenario: {0}")]
    Invalid(#[from] MaterialsError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let extensions = ["ron", "toml", "json"];
    let mut found: Option<PathBuf> = None;

    for ext in &extensions {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(ref existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.clone(),
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &'static str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name,
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Json => serde_json::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Format::Toml => toml::from_str(&content).map_err(|e| DataLoadError::Parse {
            file: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Value conversion
// ===========================================================================

impl From<PropertyTypeData> for PropertyType {
    fn from(data: PropertyTypeData) -> Self {
        match data {
            PropertyTypeData::Boolean => PropertyType::Boolean,
            PropertyTypeData::Integer => PropertyType::Integer,
            PropertyTypeData::Double => PropertyType::Double,
            PropertyTypeData::Text => PropertyType::Text,
        }
    }
}

/// Convert a written value for a property of the declared type. Integers
/// widen to doubles; any other mismatch is left for state validation.
fn convert_value(value: &ValueData, declared: PropertyTypeData) -> PropertyValue {
    match (value, declared) {
        (ValueData::Integer(i), PropertyTypeData::Double) => PropertyValue::Double(*i as f64),
        (ValueData::Boolean(b), _) => PropertyValue::Boolean(*b),
        (ValueData::Integer(i), _) => PropertyValue::Integer(*i),
        (ValueData::Double(d), _) => PropertyValue::Double(*d),
        (ValueData::Text(s), _) => PropertyValue::Text(s.clone()),
    }
}

fn build_definition(data: &PropertyData) -> Result<PropertyDefinition, DataLoadError> {
    let mut builder = PropertyDefinition::builder(data.property_type.into()).mutable(data.mutable);
    if let Some(default) = &data.default {
        builder = builder.default_value(convert_value(default, data.property_type));
    }
    builder
        .build()
        .map_err(|e| DataLoadError::Invalid(MaterialsError::from(e)))
}

// ===========================================================================
// Scenario loading
// ===========================================================================

/// A fully resolved scenario, ready to construct a store.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub state: MaterialsState,
    pub resources: RegionResources,
}

impl Scenario {
    pub fn into_store(self) -> Result<MaterialsDataManager, MaterialsError> {
        MaterialsDataManager::new(&self.state, Box::new(self.resources))
    }
}

/// Load a scenario directory: `materials.*` is required, `resources.*` is
/// optional.
pub fn load_scenario(dir: &Path) -> Result<Scenario, DataLoadError> {
    let materials_path = require_data_file(dir, MATERIALS_FILE)?;
    debug!(file = %materials_path.display(), "reading materials data");
    let materials: MaterialsData = deserialize_file(&materials_path)?;

    let (resources, resource_ids) = match find_data_file(dir, RESOURCES_FILE)? {
        Some(path) => {
            debug!(file = %path.display(), "reading resources data");
            let data: ResourcesData = deserialize_file(&path)?;
            resolve_resources(&data, &path)?
        }
        None => (RegionResources::new(), HashMap::new()),
    };

    let state = resolve_materials(&materials, &materials_path, &resource_ids)?;
    info!(
        dir = %dir.display(),
        producers = state.producer_ids().len(),
        batches = state.batches().len(),
        stages = state.stages().len(),
        "scenario loaded"
    );
    Ok(Scenario { state, resources })
}

fn resolve_resources(
    data: &ResourcesData,
    file: &Path,
) -> Result<(RegionResources, HashMap<String, ResourceId>), DataLoadError> {
    let mut resource_ids = HashMap::new();
    let mut resources = RegionResources::new();
    for name in &data.resources {
        check_duplicate(&resource_ids, name, file)?;
        let id = ResourceId::new(name.as_str());
        resources = resources.with_resource(id.clone());
        resource_ids.insert(name.clone(), id);
    }
    let mut region_ids: HashMap<String, ()> = HashMap::new();
    for name in &data.regions {
        check_duplicate(&region_ids, name, file)?;
        resources.add_region_id(RegionId::new(name.as_str()));
        region_ids.insert(name.clone(), ());
    }
    Ok((resources, resource_ids))
}

fn resolve_materials(
    data: &MaterialsData,
    file: &Path,
    resource_ids: &HashMap<String, ResourceId>,
) -> Result<MaterialsState, DataLoadError> {
    let mut builder = MaterialsState::builder();

    // Materials and their batch property schemas.
    let mut materials: HashMap<String, MaterialId> = HashMap::new();
    let mut batch_property_types: HashMap<String, HashMap<String, PropertyTypeData>> =
        HashMap::new();
    for material in &data.materials {
        check_duplicate(&materials, &material.name, file)?;
        let id = MaterialId::new(material.name.as_str());
        builder.add_material(id.clone());
        let mut types = HashMap::new();
        for property in &material.batch_properties {
            check_duplicate(&types, &property.name, file)?;
            builder.define_batch_property(
                id.clone(),
                BatchPropertyId::new(property.name.as_str()),
                build_definition(property)?,
            );
            types.insert(property.name.clone(), property.property_type);
        }
        materials.insert(material.name.clone(), id);
        batch_property_types.insert(material.name.clone(), types);
    }

    // Producer property schema.
    let mut producer_property_types: HashMap<String, PropertyTypeData> = HashMap::new();
    for property in &data.producer_properties {
        check_duplicate(&producer_property_types, &property.name, file)?;
        builder.define_producer_property(
            ProducerPropertyId::new(property.name.as_str()),
            build_definition(property)?,
        );
        producer_property_types.insert(property.name.clone(), property.property_type);
    }

    // Producers, their property values and ledgers.
    let mut producers: HashMap<String, MaterialsProducerId> = HashMap::new();
    for producer in &data.producers {
        check_duplicate(&producers, &producer.name, file)?;
        let id = MaterialsProducerId::new(producer.name.as_str());
        builder.add_producer(id.clone());
        for (name, value) in &producer.properties {
            let declared = resolve_name(&producer_property_types, name, file, "producer property")?;
            builder.set_producer_property_value(
                id.clone(),
                ProducerPropertyId::new(name.as_str()),
                convert_value(value, *declared),
            );
        }
        for (name, level) in &producer.resources {
            let resource = resolve_name(resource_ids, name, file, "resource")?;
            builder.set_producer_resource_level(id.clone(), resource.clone(), *level);
        }
        producers.insert(producer.name.clone(), id);
    }

    // Batches, numbered in file order.
    let mut batches: HashMap<String, BatchId> = HashMap::new();
    for (index, batch) in data.batches.iter().enumerate() {
        check_duplicate(&batches, &batch.name, file)?;
        let id = BatchId(index as i64);
        let material = resolve_name(&materials, &batch.material, file, "material")?;
        let producer = resolve_name(&producers, &batch.producer, file, "producer")?;
        builder.add_batch(id, material.clone(), batch.amount, producer.clone());
        let types = resolve_name(&batch_property_types, &batch.material, file, "material")?;
        for (name, value) in &batch.properties {
            let declared = resolve_name(types, name, file, "batch property")?;
            builder.set_batch_property_value(
                id,
                BatchPropertyId::new(name.as_str()),
                convert_value(value, *declared),
            );
        }
        batches.insert(batch.name.clone(), id);
    }

    // Stages, numbered in file order.
    let mut stages: HashMap<String, StageId> = HashMap::new();
    for (index, stage) in data.stages.iter().enumerate() {
        check_duplicate(&stages, &stage.name, file)?;
        let id = StageId(index as i64);
        let producer = resolve_name(&producers, &stage.producer, file, "producer")?;
        builder.add_stage(id, stage.offered, producer.clone());
        for member in &stage.batches {
            let batch = resolve_name(&batches, member, file, "batch")?;
            builder.add_batch_to_stage(id, *batch);
        }
        stages.insert(stage.name.clone(), id);
    }

    Ok(builder.build()?)
}

// ===========================================================================
// Tests
// ===========================================================================
