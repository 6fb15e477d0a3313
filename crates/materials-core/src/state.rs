//! Immutable description of the materials world at a point in time.
//!
//! [`MaterialsState`] is both the initial configuration of a
//! [`crate::manager::MaterialsDataManager`] and the checkpoint it exports.
//! It is produced by [`MaterialsStateBuilder`], which accumulates facts in
//! any order (last write wins per key) and validates the whole graph in
//! [`MaterialsStateBuilder::build`].
//!
//! Equality compares every relation and value. Stage membership keeps
//! insertion order and compares order-sensitively; every other collection
//! is keyed and compares order-insensitively.

use crate::error::{MaterialsError, check_material_amount, check_resource_amount};
use crate::id::*;
use crate::property::{PropertyDefinition, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A property value together with the simulation time it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub value: PropertyValue,
    pub time: f64,
}

/// A batch as recorded in a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub material: MaterialId,
    pub producer: MaterialsProducerId,
    pub amount: f64,
}

/// A stage as recorded in a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub producer: MaterialsProducerId,
    pub offered: bool,
}

/// Validated, immutable snapshot of every materials entity, schema and value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialsState {
    material_ids: BTreeSet<MaterialId>,
    producer_ids: BTreeSet<MaterialsProducerId>,
    producer_property_definitions: BTreeMap<ProducerPropertyId, PropertyDefinition>,
    producer_property_values:
        BTreeMap<MaterialsProducerId, BTreeMap<ProducerPropertyId, TimedValue>>,
    resource_levels: BTreeMap<MaterialsProducerId, BTreeMap<ResourceId, i64>>,
    batch_property_definitions: BTreeMap<MaterialId, BTreeMap<BatchPropertyId, PropertyDefinition>>,
    batches: BTreeMap<BatchId, BatchEntry>,
    batch_property_values: BTreeMap<BatchId, BTreeMap<BatchPropertyId, TimedValue>>,
    stages: BTreeMap<StageId, StageEntry>,
    stage_batches: BTreeMap<StageId, Vec<BatchId>>,
    next_batch_id: i64,
    next_stage_id: i64,
}

impl MaterialsState {
    pub fn builder() -> MaterialsStateBuilder {
        MaterialsStateBuilder::new()
    }

    /// A builder pre-populated with every fact of this state.
    pub fn clone_builder(&self) -> MaterialsStateBuilder {
        let mut memberships = Vec::new();
        for (stage, batches) in &self.stage_batches {
            for batch in batches {
                memberships.push((*stage, *batch));
            }
        }
        MaterialsStateBuilder {
            material_ids: self.material_ids.clone(),
            producer_ids: self.producer_ids.clone(),
            producer_property_definitions: self.producer_property_definitions.clone(),
            producer_property_values: self.producer_property_values.clone(),
            resource_levels: self.resource_levels.clone(),
            batch_property_definitions: self.batch_property_definitions.clone(),
            batches: self.batches.clone(),
            batch_property_values: self.batch_property_values.clone(),
            stages: self.stages.clone(),
            memberships,
            next_batch_id: Some(self.next_batch_id),
            next_stage_id: Some(self.next_stage_id),
        }
    }

    pub fn material_ids(&self) -> &BTreeSet<MaterialId> {
        &self.material_ids
    }

    pub fn producer_ids(&self) -> &BTreeSet<MaterialsProducerId> {
        &self.producer_ids
    }

    pub fn producer_property_definitions(
        &self,
    ) -> &BTreeMap<ProducerPropertyId, PropertyDefinition> {
        &self.producer_property_definitions
    }

    /// Explicitly assigned property values for a producer.
    pub fn producer_property_values(
        &self,
        producer: &MaterialsProducerId,
    ) -> impl Iterator<Item = (&ProducerPropertyId, &TimedValue)> {
        self.producer_property_values
            .get(producer)
            .into_iter()
            .flat_map(|values| values.iter())
    }

    pub fn producer_property_value(
        &self,
        producer: &MaterialsProducerId,
        property: &ProducerPropertyId,
    ) -> Option<&TimedValue> {
        self.producer_property_values.get(producer)?.get(property)
    }

    /// Recorded resource levels for a producer. Absent entries mean zero.
    pub fn resource_levels(
        &self,
        producer: &MaterialsProducerId,
    ) -> impl Iterator<Item = (&ResourceId, i64)> {
        self.resource_levels
            .get(producer)
            .into_iter()
            .flat_map(|levels| levels.iter().map(|(r, l)| (r, *l)))
    }

    pub fn resource_level(&self, producer: &MaterialsProducerId, resource: &ResourceId) -> i64 {
        self.resource_levels
            .get(producer)
            .and_then(|levels| levels.get(resource))
            .copied()
            .unwrap_or(0)
    }

    /// Every resource id referenced by any producer's ledger.
    pub fn referenced_resource_ids(&self) -> BTreeSet<&ResourceId> {
        self.resource_levels
            .values()
            .flat_map(|levels| levels.keys())
            .collect()
    }

    pub fn batch_property_definitions(
        &self,
        material: &MaterialId,
    ) -> impl Iterator<Item = (&BatchPropertyId, &PropertyDefinition)> {
        self.batch_property_definitions
            .get(material)
            .into_iter()
            .flat_map(|defs| defs.iter())
    }

    pub fn batches(&self) -> &BTreeMap<BatchId, BatchEntry> {
        &self.batches
    }

    pub fn batch_property_values(
        &self,
        batch: BatchId,
    ) -> impl Iterator<Item = (&BatchPropertyId, &TimedValue)> {
        self.batch_property_values
            .get(&batch)
            .into_iter()
            .flat_map(|values| values.iter())
    }

    pub fn stages(&self) -> &BTreeMap<StageId, StageEntry> {
        &self.stages
    }

    /// Member batches of a stage, in insertion order.
    pub fn stage_batches(&self, stage: StageId) -> &[BatchId] {
        self.stage_batches
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn next_batch_id(&self) -> i64 {
        self.next_batch_id
    }

    pub fn next_stage_id(&self) -> i64 {
        self.next_stage_id
    }
}

/// Append-only accumulator for [`MaterialsState`].
#[derive(Debug, Clone, Default)]
pub struct MaterialsStateBuilder {
    material_ids: BTreeSet<MaterialId>,
    producer_ids: BTreeSet<MaterialsProducerId>,
    producer_property_definitions: BTreeMap<ProducerPropertyId, PropertyDefinition>,
    producer_property_values:
        BTreeMap<MaterialsProducerId, BTreeMap<ProducerPropertyId, TimedValue>>,
    resource_levels: BTreeMap<MaterialsProducerId, BTreeMap<ResourceId, i64>>,
    batch_property_definitions: BTreeMap<MaterialId, BTreeMap<BatchPropertyId, PropertyDefinition>>,
    batches: BTreeMap<BatchId, BatchEntry>,
    batch_property_values: BTreeMap<BatchId, BTreeMap<BatchPropertyId, TimedValue>>,
    stages: BTreeMap<StageId, StageEntry>,
    memberships: Vec<(StageId, BatchId)>,
    next_batch_id: Option<i64>,
    next_stage_id: Option<i64>,
}

impl MaterialsStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: MaterialId) -> &mut Self {
        self.material_ids.insert(material);
        self
    }

    pub fn add_producer(&mut self, producer: MaterialsProducerId) -> &mut Self {
        self.producer_ids.insert(producer);
        self
    }

    pub fn define_producer_property(
        &mut self,
        property: ProducerPropertyId,
        definition: PropertyDefinition,
    ) -> &mut Self {
        self.producer_property_definitions.insert(property, definition);
        self
    }

    pub fn set_producer_property_value(
        &mut self,
        producer: MaterialsProducerId,
        property: ProducerPropertyId,
        value: PropertyValue,
    ) -> &mut Self {
        self.set_producer_property_value_at(producer, property, value, 0.0)
    }

    /// Record a producer property value together with its last-write time.
    pub fn set_producer_property_value_at(
        &mut self,
        producer: MaterialsProducerId,
        property: ProducerPropertyId,
        value: PropertyValue,
        time: f64,
    ) -> &mut Self {
        self.producer_property_values
            .entry(producer)
            .or_default()
            .insert(property, TimedValue { value, time });
        self
    }

    pub fn set_producer_resource_level(
        &mut self,
        producer: MaterialsProducerId,
        resource: ResourceId,
        level: i64,
    ) -> &mut Self {
        self.resource_levels
            .entry(producer)
            .or_default()
            .insert(resource, level);
        self
    }

    pub fn define_batch_property(
        &mut self,
        material: MaterialId,
        property: BatchPropertyId,
        definition: PropertyDefinition,
    ) -> &mut Self {
        self.batch_property_definitions
            .entry(material)
            .or_default()
            .insert(property, definition);
        self
    }

    pub fn add_batch(
        &mut self,
        batch: BatchId,
        material: MaterialId,
        amount: f64,
        producer: MaterialsProducerId,
    ) -> &mut Self {
        self.batches.insert(
            batch,
            BatchEntry {
                material,
                producer,
                amount,
            },
        );
        self
    }

    pub fn set_batch_property_value(
        &mut self,
        batch: BatchId,
        property: BatchPropertyId,
        value: PropertyValue,
    ) -> &mut Self {
        self.set_batch_property_value_at(batch, property, value, 0.0)
    }

    /// Record a batch property value together with its last-write time.
    pub fn set_batch_property_value_at(
        &mut self,
        batch: BatchId,
        property: BatchPropertyId,
        value: PropertyValue,
        time: f64,
    ) -> &mut Self {
        self.batch_property_values
            .entry(batch)
            .or_default()
            .insert(property, TimedValue { value, time });
        self
    }

    pub fn add_stage(
        &mut self,
        stage: StageId,
        offered: bool,
        producer: MaterialsProducerId,
    ) -> &mut Self {
        self.stages.insert(stage, StageEntry { producer, offered });
        self
    }

    /// Place a batch on a stage. Repeating the same pair has no effect.
    pub fn add_batch_to_stage(&mut self, stage: StageId, batch: BatchId) -> &mut Self {
        if !self.memberships.contains(&(stage, batch)) {
            self.memberships.push((stage, batch));
        }
        self
    }

    pub fn set_next_batch_id(&mut self, next: i64) -> &mut Self {
        self.next_batch_id = Some(next);
        self
    }

    pub fn set_next_stage_id(&mut self, next: i64) -> &mut Self {
        self.next_stage_id = Some(next);
        self
    }

    /// Validate every cross-entity relation and freeze the state.
    pub fn build(self) -> Result<MaterialsState, MaterialsError> {
        let next_batch_id = self.next_batch_id.unwrap_or(0);
        if next_batch_id < 0 {
            return Err(MaterialsError::NegativeBatchIdCounter(next_batch_id));
        }
        let next_stage_id = self.next_stage_id.unwrap_or(0);
        if next_stage_id < 0 {
            return Err(MaterialsError::NegativeStageIdCounter(next_stage_id));
        }

        // Property schemas. Definitions decoded from a snapshot never went
        // through their builder.
        for (property, definition) in &self.producer_property_definitions {
            check_definition(property, definition)?;
        }
        for definitions in self.batch_property_definitions.values() {
            for (property, definition) in definitions {
                check_definition(property, definition)?;
            }
        }

        // Producer property values.
        for (producer, values) in &self.producer_property_values {
            if !self.producer_ids.contains(producer) {
                return Err(MaterialsError::UnknownProducerId(producer.clone()));
            }
            for (property, timed) in values {
                let definition = self
                    .producer_property_definitions
                    .get(property)
                    .ok_or_else(|| MaterialsError::UnknownProducerPropertyId(property.clone()))?;
                if !definition.is_compatible(&timed.value) {
                    return Err(MaterialsError::IncompatibleValue {
                        property: property.to_string(),
                        expected: definition.property_type(),
                    });
                }
            }
        }

        // Resource ledgers.
        for (producer, levels) in &self.resource_levels {
            if !self.producer_ids.contains(producer) {
                return Err(MaterialsError::UnknownProducerId(producer.clone()));
            }
            for level in levels.values() {
                check_resource_amount(*level)?;
            }
        }

        // Batch property schema.
        for material in self.batch_property_definitions.keys() {
            if !self.material_ids.contains(material) {
                return Err(MaterialsError::UnknownMaterialId(material.clone()));
            }
        }

        // Batches.
        for batch in self.batches.values() {
            if !self.material_ids.contains(&batch.material) {
                return Err(MaterialsError::UnknownMaterialId(batch.material.clone()));
            }
            if !self.producer_ids.contains(&batch.producer) {
                return Err(MaterialsError::UnknownProducerId(batch.producer.clone()));
            }
            check_material_amount(batch.amount)?;
        }

        // Batch property values.
        for (batch_id, values) in &self.batch_property_values {
            let batch = self
                .batches
                .get(batch_id)
                .ok_or(MaterialsError::UnknownBatchId(*batch_id))?;
            for (property, timed) in values {
                let definition = self
                    .batch_property_definitions
                    .get(&batch.material)
                    .and_then(|defs| defs.get(property))
                    .ok_or_else(|| MaterialsError::UnknownBatchPropertyId {
                        material: batch.material.clone(),
                        property: property.clone(),
                    })?;
                if !definition.is_compatible(&timed.value) {
                    return Err(MaterialsError::IncompatibleValue {
                        property: property.to_string(),
                        expected: definition.property_type(),
                    });
                }
            }
        }

        // Stages and membership.
        for stage in self.stages.values() {
            if !self.producer_ids.contains(&stage.producer) {
                return Err(MaterialsError::UnknownProducerId(stage.producer.clone()));
            }
        }
        let mut stage_batches: BTreeMap<StageId, Vec<BatchId>> =
            self.stages.keys().map(|stage| (*stage, Vec::new())).collect();
        let mut placement: BTreeMap<BatchId, StageId> = BTreeMap::new();
        for (stage_id, batch_id) in &self.memberships {
            let stage = self
                .stages
                .get(stage_id)
                .ok_or(MaterialsError::UnknownStageId(*stage_id))?;
            let batch = self
                .batches
                .get(batch_id)
                .ok_or(MaterialsError::UnknownBatchId(*batch_id))?;
            if let Some(first) = placement.insert(*batch_id, *stage_id) {
                return Err(MaterialsError::BatchOnMultipleStages {
                    batch: *batch_id,
                    first,
                    second: *stage_id,
                });
            }
            if batch.producer != stage.producer {
                return Err(MaterialsError::BatchStagedToDifferentOwner {
                    batch: *batch_id,
                    stage: *stage_id,
                });
            }
            stage_batches.entry(*stage_id).or_default().push(*batch_id);
        }

        // Required values for properties without defaults.
        for (property, definition) in &self.producer_property_definitions {
            if definition.has_default() {
                continue;
            }
            for producer in &self.producer_ids {
                let assigned = self
                    .producer_property_values
                    .get(producer)
                    .is_some_and(|values| values.contains_key(property));
                if !assigned {
                    return Err(MaterialsError::InsufficientPropertyValueAssignment(
                        property.to_string(),
                    ));
                }
            }
        }
        for (batch_id, batch) in &self.batches {
            let Some(definitions) = self.batch_property_definitions.get(&batch.material) else {
                continue;
            };
            for (property, definition) in definitions {
                if definition.has_default() {
                    continue;
                }
                let assigned = self
                    .batch_property_values
                    .get(batch_id)
                    .is_some_and(|values| values.contains_key(property));
                if !assigned {
                    return Err(MaterialsError::InsufficientPropertyValueAssignment(
                        property.to_string(),
                    ));
                }
            }
        }

        // Counters never hand out an id that is already taken.
        let next_batch_id = match self.batches.keys().next_back() {
            Some(max) => {
                let after = max.0.checked_add(1).ok_or(MaterialsError::BatchIdCounterExhausted)?;
                next_batch_id.max(after)
            }
            None => next_batch_id,
        };
        let next_stage_id = match self.stages.keys().next_back() {
            Some(max) => {
                let after = max.0.checked_add(1).ok_or(MaterialsError::StageIdCounterExhausted)?;
                next_stage_id.max(after)
            }
            None => next_stage_id,
        };

        Ok(MaterialsState {
            material_ids: self.material_ids,
            producer_ids: self.producer_ids,
            producer_property_definitions: self.producer_property_definitions,
            producer_property_values: self.producer_property_values,
            resource_levels: self.resource_levels,
            batch_property_definitions: self.batch_property_definitions,
            batches: self.batches,
            batch_property_values: self.batch_property_values,
            stages: self.stages,
            stage_batches,
            next_batch_id,
            next_stage_id,
        })
    }
}

fn check_definition(
    property: &impl std::fmt::Display,
    definition: &PropertyDefinition,
) -> Result<(), MaterialsError> {
    match definition.default_value() {
        Some(default) if !definition.is_compatible(default) => {
            Err(MaterialsError::IncompatibleValue {
                property: property.to_string(),
                expected: definition.property_type(),
            })
        }
        _ => Ok(()),
    }
}
