//! The live materials store.
//!
//! [`MaterialsDataManager`] owns the mutable entity graph of producers,
//! batches and stages together with their property schemas and resource
//! ledgers. Every command validates all of its preconditions first, then
//! mutates, then publishes its events through the store's bus.
//!
//! # Deferred destruction
//!
//! Removing a batch or stage marks it as pending removal and publishes the
//! imminent-removal event while the entity is still fully queryable. The
//! entity stays visible for the rest of the current activation and is
//! reaped by [`MaterialsDataManager::end_activation`], which the scheduler
//! calls when control returns to it. Commands that would mutate an entity
//! pending removal are rejected.

use crate::error::{MaterialsError, check_material_amount, check_resource_amount};
use crate::event::{self, EventBus, EventFilter, MaterialsEvent, SubscriptionId};
use crate::id::*;
use crate::property::{PropertyDefinition, PropertyValue};
use crate::resources::Resources;
use crate::state::{MaterialsState, TimedValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, trace};

// ---------------------------------------------------------------------------
// Construction payloads
// ---------------------------------------------------------------------------

/// Everything needed to create a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConstruction {
    pub producer: MaterialsProducerId,
    pub material: MaterialId,
    pub amount: f64,
    pub properties: Vec<(BatchPropertyId, PropertyValue)>,
}

impl BatchConstruction {
    pub fn new(producer: MaterialsProducerId, material: MaterialId, amount: f64) -> Self {
        Self {
            producer,
            material,
            amount,
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        property: BatchPropertyId,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.push((property, value.into()));
        self
    }
}

/// Everything needed to create a materials producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConstruction {
    pub producer: MaterialsProducerId,
    pub properties: Vec<(ProducerPropertyId, PropertyValue)>,
}

impl ProducerConstruction {
    pub fn new(producer: MaterialsProducerId) -> Self {
        Self {
            producer,
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        property: ProducerPropertyId,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.push((property, value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BatchRecord {
    material: MaterialId,
    producer: MaterialsProducerId,
    amount: f64,
    stage: Option<StageId>,
    properties: BTreeMap<BatchPropertyId, TimedValue>,
    pending_removal: bool,
}

#[derive(Debug, Clone)]
struct StageRecord {
    producer: MaterialsProducerId,
    offered: bool,
    /// Member batches in the order they joined.
    batches: Vec<BatchId>,
    pending_removal: bool,
}

#[derive(Debug, Clone, Default)]
struct ProducerRecord {
    inventory: BTreeSet<BatchId>,
    stages: BTreeSet<StageId>,
    properties: BTreeMap<ProducerPropertyId, TimedValue>,
    resources: BTreeMap<ResourceId, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Batch(BatchId),
    Stage(StageId),
}

// ---------------------------------------------------------------------------
// MaterialsDataManager
// ---------------------------------------------------------------------------

/// The mutable materials store. See the module docs for the command and
/// removal contracts.
#[derive(Debug)]
pub struct MaterialsDataManager {
    time: f64,
    material_ids: BTreeSet<MaterialId>,
    producers: BTreeMap<MaterialsProducerId, ProducerRecord>,
    producer_property_definitions: BTreeMap<ProducerPropertyId, PropertyDefinition>,
    batch_property_definitions: BTreeMap<MaterialId, BTreeMap<BatchPropertyId, PropertyDefinition>>,
    batches: BTreeMap<BatchId, BatchRecord>,
    stages: BTreeMap<StageId, StageRecord>,
    next_batch_id: i64,
    next_stage_id: i64,
    removals: Vec<Removal>,
    resources: Box<dyn Resources>,
    pub(crate) bus: EventBus,
}

impl MaterialsDataManager {
    /// Build a store from a validated state. Every resource id named in the
    /// state's ledgers must be known to `resources`; every producer gets a
    /// ledger entry for every known resource id.
    pub fn new(
        state: &MaterialsState,
        resources: Box<dyn Resources>,
    ) -> Result<Self, MaterialsError> {
        for resource in state.referenced_resource_ids() {
            if !resources.resource_id_exists(resource) {
                return Err(MaterialsError::UnknownResourceId(resource.clone()));
            }
        }
        let resource_ids = resources.resource_ids();

        let mut producers = BTreeMap::new();
        for producer in state.producer_ids() {
            let record = ProducerRecord {
                properties: state
                    .producer_property_values(producer)
                    .map(|(property, timed)| (property.clone(), timed.clone()))
                    .collect(),
                resources: resource_ids
                    .iter()
                    .map(|resource| (resource.clone(), state.resource_level(producer, resource)))
                    .collect(),
                ..ProducerRecord::default()
            };
            producers.insert(producer.clone(), record);
        }

        let mut batch_property_definitions: BTreeMap<
            MaterialId,
            BTreeMap<BatchPropertyId, PropertyDefinition>,
        > = BTreeMap::new();
        for material in state.material_ids() {
            let definitions = state
                .batch_property_definitions(material)
                .map(|(property, definition)| (property.clone(), definition.clone()))
                .collect();
            batch_property_definitions.insert(material.clone(), definitions);
        }

        let mut batches = BTreeMap::new();
        for (batch_id, entry) in state.batches() {
            batches.insert(
                *batch_id,
                BatchRecord {
                    material: entry.material.clone(),
                    producer: entry.producer.clone(),
                    amount: entry.amount,
                    stage: None,
                    properties: state
                        .batch_property_values(*batch_id)
                        .map(|(property, timed)| (property.clone(), timed.clone()))
                        .collect(),
                    pending_removal: false,
                },
            );
        }

        let mut stages = BTreeMap::new();
        for (stage_id, entry) in state.stages() {
            let members = state.stage_batches(*stage_id).to_vec();
            for batch_id in &members {
                if let Some(batch) = batches.get_mut(batch_id) {
                    batch.stage = Some(*stage_id);
                }
            }
            if let Some(producer) = producers.get_mut(&entry.producer) {
                producer.stages.insert(*stage_id);
            }
            stages.insert(
                *stage_id,
                StageRecord {
                    producer: entry.producer.clone(),
                    offered: entry.offered,
                    batches: members,
                    pending_removal: false,
                },
            );
        }

        for (batch_id, batch) in &batches {
            if batch.stage.is_none()
                && let Some(producer) = producers.get_mut(&batch.producer)
            {
                producer.inventory.insert(*batch_id);
            }
        }

        info!(
            producers = producers.len(),
            batches = batches.len(),
            stages = stages.len(),
            "materials store initialized"
        );

        Ok(Self {
            time: 0.0,
            material_ids: state.material_ids().clone(),
            producers,
            producer_property_definitions: state.producer_property_definitions().clone(),
            batch_property_definitions,
            batches,
            stages,
            next_batch_id: state.next_batch_id(),
            next_stage_id: state.next_stage_id(),
            removals: Vec::new(),
            resources,
            bus: EventBus::default(),
        })
    }

    // -----------------------------------------------------------------------
    // Clock and activation boundary
    // -----------------------------------------------------------------------

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Reap every batch and stage removed during the current activation.
    /// Called by the scheduler when an activation ends. Returns the number
    /// of entities reaped.
    pub fn end_activation(&mut self) -> usize {
        let removals = std::mem::take(&mut self.removals);
        let count = removals.len();
        for removal in removals {
            match removal {
                Removal::Batch(batch_id) => self.reap_batch(batch_id),
                Removal::Stage(stage_id) => self.reap_stage(stage_id),
            }
        }
        if count > 0 {
            trace!(count, time = self.time, "reaped removed materials entities");
        }
        count
    }

    fn reap_batch(&mut self, batch_id: BatchId) {
        let Some(batch) = self.batches.remove(&batch_id) else {
            return;
        };
        match batch.stage {
            Some(stage_id) => {
                if let Some(stage) = self.stages.get_mut(&stage_id) {
                    stage.batches.retain(|b| *b != batch_id);
                }
            }
            None => {
                if let Some(producer) = self.producers.get_mut(&batch.producer) {
                    producer.inventory.remove(&batch_id);
                }
            }
        }
    }

    fn reap_stage(&mut self, stage_id: StageId) {
        let Some(stage) = self.stages.remove(&stage_id) else {
            return;
        };
        if let Some(producer) = self.producers.get_mut(&stage.producer) {
            producer.stages.remove(&stage_id);
        }
        // Members still listed here survive the stage.
        for batch_id in stage.batches {
            if let Some(batch) = self.batches.get_mut(&batch_id) {
                batch.stage = None;
                if let Some(producer) = self.producers.get_mut(&batch.producer) {
                    producer.inventory.insert(batch_id);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a handler for the events selected by `filter`.
    pub fn subscribe(
        &mut self,
        filter: EventFilter,
        handler: impl FnMut(&mut MaterialsDataManager, &MaterialsEvent) + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(filter, Box::new(handler))
    }

    pub fn unsubscribe(&mut self, subscription: SubscriptionId) {
        self.bus.unsubscribe(subscription);
    }

    /// Total events published since construction.
    pub fn events_published(&self) -> u64 {
        self.bus.total_published()
    }

    fn publish(&mut self, events: Vec<MaterialsEvent>) {
        event::deliver(self, events);
    }

    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    fn batch_record(&self, batch: BatchId) -> Result<&BatchRecord, MaterialsError> {
        self.batches
            .get(&batch)
            .ok_or(MaterialsError::UnknownBatchId(batch))
    }

    fn live_batch(&self, batch: BatchId) -> Result<&BatchRecord, MaterialsError> {
        let record = self.batch_record(batch)?;
        if record.pending_removal {
            return Err(MaterialsError::BatchPendingRemoval(batch));
        }
        Ok(record)
    }

    fn stage_record(&self, stage: StageId) -> Result<&StageRecord, MaterialsError> {
        self.stages
            .get(&stage)
            .ok_or(MaterialsError::UnknownStageId(stage))
    }

    fn live_stage(&self, stage: StageId) -> Result<&StageRecord, MaterialsError> {
        let record = self.stage_record(stage)?;
        if record.pending_removal {
            return Err(MaterialsError::StagePendingRemoval(stage));
        }
        Ok(record)
    }

    fn producer_record(
        &self,
        producer: &MaterialsProducerId,
    ) -> Result<&ProducerRecord, MaterialsError> {
        self.producers
            .get(producer)
            .ok_or_else(|| MaterialsError::UnknownProducerId(producer.clone()))
    }

    fn check_material(&self, material: &MaterialId) -> Result<(), MaterialsError> {
        if !self.material_ids.contains(material) {
            return Err(MaterialsError::UnknownMaterialId(material.clone()));
        }
        Ok(())
    }

    fn check_resource(&self, resource: &ResourceId) -> Result<(), MaterialsError> {
        if !self.resources.resource_id_exists(resource) {
            return Err(MaterialsError::UnknownResourceId(resource.clone()));
        }
        Ok(())
    }

    /// Fails if the batch sits on an offered stage.
    fn check_batch_unlocked(&self, batch: &BatchRecord) -> Result<(), MaterialsError> {
        if let Some(stage_id) = batch.stage
            && self.stage_record(stage_id)?.offered
        {
            return Err(MaterialsError::OfferedStageUnalterable(stage_id));
        }
        Ok(())
    }

    fn batch_definition(
        &self,
        material: &MaterialId,
        property: &BatchPropertyId,
    ) -> Result<&PropertyDefinition, MaterialsError> {
        self.batch_property_definitions
            .get(material)
            .and_then(|defs| defs.get(property))
            .ok_or_else(|| MaterialsError::UnknownBatchPropertyId {
                material: material.clone(),
                property: property.clone(),
            })
    }

    fn producer_definition(
        &self,
        property: &ProducerPropertyId,
    ) -> Result<&PropertyDefinition, MaterialsError> {
        self.producer_property_definitions
            .get(property)
            .ok_or_else(|| MaterialsError::UnknownProducerPropertyId(property.clone()))
    }

    /// Validate the initial property values of a new batch and resolve them
    /// into a map (later duplicates win).
    fn resolve_batch_values(
        &self,
        material: &MaterialId,
        values: &[(BatchPropertyId, PropertyValue)],
    ) -> Result<BTreeMap<BatchPropertyId, PropertyValue>, MaterialsError> {
        let mut resolved = BTreeMap::new();
        for (property, value) in values {
            let definition = self.batch_definition(material, property)?;
            if !definition.is_compatible(value) {
                return Err(MaterialsError::IncompatibleValue {
                    property: property.to_string(),
                    expected: definition.property_type(),
                });
            }
            resolved.insert(property.clone(), value.clone());
        }
        if let Some(definitions) = self.batch_property_definitions.get(material) {
            for (property, definition) in definitions {
                if !definition.has_default() && !resolved.contains_key(property) {
                    return Err(MaterialsError::InsufficientPropertyValueAssignment(
                        property.to_string(),
                    ));
                }
            }
        }
        Ok(resolved)
    }

    /// Fails once the batch id counter has no successor.
    fn check_batch_counter(&self) -> Result<(), MaterialsError> {
        if self.next_batch_id == i64::MAX {
            return Err(MaterialsError::BatchIdCounterExhausted);
        }
        Ok(())
    }

    /// Create a batch record in the producer's inventory. Preconditions,
    /// including [`Self::check_batch_counter`], are the caller's
    /// responsibility.
    fn insert_batch(
        &mut self,
        producer: MaterialsProducerId,
        material: MaterialId,
        amount: f64,
        values: BTreeMap<BatchPropertyId, PropertyValue>,
    ) -> BatchId {
        let batch_id = BatchId(self.next_batch_id);
        self.next_batch_id += 1;
        let time = self.time;
        let properties = values
            .into_iter()
            .map(|(property, value)| (property, TimedValue { value, time }))
            .collect();
        if let Some(record) = self.producers.get_mut(&producer) {
            record.inventory.insert(batch_id);
        }
        self.batches.insert(
            batch_id,
            BatchRecord {
                material,
                producer,
                amount,
                stage: None,
                properties,
                pending_removal: false,
            },
        );
        batch_id
    }

    /// Mark a batch for removal at the end of the activation.
    fn mark_batch_removed(&mut self, batch_id: BatchId) -> Option<MaterialsEvent> {
        let batch = self.batches.get_mut(&batch_id)?;
        if batch.pending_removal {
            return None;
        }
        batch.pending_removal = true;
        self.removals.push(Removal::Batch(batch_id));
        Some(MaterialsEvent::BatchImminentRemoval {
            batch: batch_id,
            producer: batch.producer.clone(),
        })
    }

    fn mark_stage_removed(&mut self, stage_id: StageId) -> Option<MaterialsEvent> {
        let stage = self.stages.get_mut(&stage_id)?;
        stage.pending_removal = true;
        self.removals.push(Removal::Stage(stage_id));
        Some(MaterialsEvent::StageImminentRemoval {
            stage: stage_id,
            producer: stage.producer.clone(),
        })
    }

    /// Mark every live member of a stage for removal.
    fn mark_stage_batches_removed(&mut self, stage_id: StageId) -> Vec<MaterialsEvent> {
        let members = self
            .stages
            .get(&stage_id)
            .map(|stage| stage.batches.clone())
            .unwrap_or_default();
        members
            .into_iter()
            .filter_map(|batch_id| self.mark_batch_removed(batch_id))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Commands: identifiers and schema
    // -----------------------------------------------------------------------

    /// Register a new material type.
    pub fn add_material_id(&mut self, material: MaterialId) -> Result<(), MaterialsError> {
        if self.material_ids.contains(&material) {
            return Err(MaterialsError::DuplicateMaterialId(material));
        }
        self.material_ids.insert(material.clone());
        self.batch_property_definitions
            .insert(material.clone(), BTreeMap::new());
        debug!(%material, "material added");
        self.publish(vec![MaterialsEvent::MaterialAdded { material }]);
        Ok(())
    }

    /// Register a resource id with the resources collaborator and provision
    /// a zero balance for every producer.
    pub fn add_resource_id(&mut self, resource: ResourceId) -> Result<(), MaterialsError> {
        if self.resources.resource_id_exists(&resource) {
            return Err(MaterialsError::DuplicateResourceId(resource));
        }
        self.resources.add_resource_id(resource.clone())?;
        for producer in self.producers.values_mut() {
            producer.resources.insert(resource.clone(), 0);
        }
        debug!(%resource, "resource id provisioned for producers");
        Ok(())
    }

    /// Add a materials producer. Every producer property without a default
    /// must be given a value.
    pub fn add_materials_producer(
        &mut self,
        construction: ProducerConstruction,
    ) -> Result<(), MaterialsError> {
        let ProducerConstruction {
            producer,
            properties,
        } = construction;
        if self.producers.contains_key(&producer) {
            return Err(MaterialsError::DuplicateProducerId(producer));
        }
        let mut values = BTreeMap::new();
        for (property, value) in properties {
            let definition = self.producer_definition(&property)?;
            if !definition.is_compatible(&value) {
                return Err(MaterialsError::IncompatibleValue {
                    property: property.to_string(),
                    expected: definition.property_type(),
                });
            }
            values.insert(property, value);
        }
        for (property, definition) in &self.producer_property_definitions {
            if !definition.has_default() && !values.contains_key(property) {
                return Err(MaterialsError::InsufficientPropertyValueAssignment(
                    property.to_string(),
                ));
            }
        }

        let time = self.time;
        let record = ProducerRecord {
            properties: values
                .into_iter()
                .map(|(property, value)| (property, TimedValue { value, time }))
                .collect(),
            resources: self
                .resources
                .resource_ids()
                .into_iter()
                .map(|resource| (resource, 0))
                .collect(),
            ..ProducerRecord::default()
        };
        self.producers.insert(producer.clone(), record);
        debug!(%producer, "materials producer added");
        self.publish(vec![MaterialsEvent::ProducerAdded { producer }]);
        Ok(())
    }

    /// Define a producer property. Without a default, `values` must cover
    /// every existing producer.
    pub fn define_producer_property(
        &mut self,
        property: ProducerPropertyId,
        definition: PropertyDefinition,
        values: BTreeMap<MaterialsProducerId, PropertyValue>,
    ) -> Result<(), MaterialsError> {
        if self.producer_property_definitions.contains_key(&property) {
            return Err(MaterialsError::DuplicateProducerPropertyDefinition(property));
        }
        for (producer, value) in &values {
            self.producer_record(producer)?;
            if !definition.is_compatible(value) {
                return Err(MaterialsError::IncompatibleValue {
                    property: property.to_string(),
                    expected: definition.property_type(),
                });
            }
        }
        if !definition.has_default()
            && self.producers.keys().any(|producer| !values.contains_key(producer))
        {
            return Err(MaterialsError::InsufficientPropertyValueAssignment(
                property.to_string(),
            ));
        }

        let time = self.time;
        for (producer, value) in values {
            if let Some(record) = self.producers.get_mut(&producer) {
                record
                    .properties
                    .insert(property.clone(), TimedValue { value, time });
            }
        }
        self.producer_property_definitions
            .insert(property.clone(), definition);
        debug!(%property, "producer property defined");
        self.publish(vec![MaterialsEvent::ProducerPropertyDefined { property }]);
        Ok(())
    }

    /// Define a batch property for one material. Without a default, `values`
    /// must cover every existing batch of that material.
    pub fn define_batch_property(
        &mut self,
        material: MaterialId,
        property: BatchPropertyId,
        definition: PropertyDefinition,
        values: BTreeMap<BatchId, PropertyValue>,
    ) -> Result<(), MaterialsError> {
        self.check_material(&material)?;
        let already_defined = self
            .batch_property_definitions
            .get(&material)
            .is_some_and(|defs| defs.contains_key(&property));
        if already_defined {
            return Err(MaterialsError::DuplicateBatchPropertyDefinition { material, property });
        }
        for (batch_id, value) in &values {
            let batch = self.batch_record(*batch_id)?;
            if batch.material != material {
                return Err(MaterialsError::MaterialTypeMismatch {
                    expected: material,
                    actual: batch.material.clone(),
                });
            }
            if !definition.is_compatible(value) {
                return Err(MaterialsError::IncompatibleValue {
                    property: property.to_string(),
                    expected: definition.property_type(),
                });
            }
        }
        if !definition.has_default() {
            let uncovered = self
                .batches
                .iter()
                .any(|(batch_id, batch)| {
                    batch.material == material && !values.contains_key(batch_id)
                });
            if uncovered {
                return Err(MaterialsError::InsufficientPropertyValueAssignment(
                    property.to_string(),
                ));
            }
        }

        let time = self.time;
        for (batch_id, value) in values {
            if let Some(batch) = self.batches.get_mut(&batch_id) {
                batch
                    .properties
                    .insert(property.clone(), TimedValue { value, time });
            }
        }
        self.batch_property_definitions
            .entry(material.clone())
            .or_default()
            .insert(property.clone(), definition);
        debug!(%material, %property, "batch property defined");
        self.publish(vec![MaterialsEvent::BatchPropertyDefined { material, property }]);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commands: batches and stages
    // -----------------------------------------------------------------------

    /// Create a batch in the producer's inventory.
    pub fn add_batch(
        &mut self,
        construction: BatchConstruction,
    ) -> Result<BatchId, MaterialsError> {
        let BatchConstruction {
            producer,
            material,
            amount,
            properties,
        } = construction;
        self.producer_record(&producer)?;
        self.check_material(&material)?;
        check_material_amount(amount)?;
        let values = self.resolve_batch_values(&material, &properties)?;
        self.check_batch_counter()?;

        let batch = self.insert_batch(producer.clone(), material.clone(), amount, values);
        debug!(%batch, %producer, %material, amount, "batch added");
        self.publish(vec![MaterialsEvent::BatchAdded {
            batch,
            producer,
            material,
        }]);
        Ok(batch)
    }

    /// Create an empty, unoffered stage owned by `producer`.
    pub fn add_stage(&mut self, producer: MaterialsProducerId) -> Result<StageId, MaterialsError> {
        self.producer_record(&producer)?;
        if self.next_stage_id == i64::MAX {
            return Err(MaterialsError::StageIdCounterExhausted);
        }
        let stage = StageId(self.next_stage_id);
        self.next_stage_id += 1;
        self.stages.insert(
            stage,
            StageRecord {
                producer: producer.clone(),
                offered: false,
                batches: Vec::new(),
                pending_removal: false,
            },
        );
        if let Some(record) = self.producers.get_mut(&producer) {
            record.stages.insert(stage);
        }
        debug!(%stage, %producer, "stage added");
        self.publish(vec![MaterialsEvent::StageAdded { stage, producer }]);
        Ok(stage)
    }

    pub fn move_batch_to_stage(
        &mut self,
        batch: BatchId,
        stage: StageId,
    ) -> Result<(), MaterialsError> {
        let batch_record = self.live_batch(batch)?;
        let stage_record = self.live_stage(stage)?;
        if batch_record.stage.is_some() {
            return Err(MaterialsError::BatchAlreadyStaged(batch));
        }
        if stage_record.offered {
            return Err(MaterialsError::OfferedStageUnalterable(stage));
        }
        if batch_record.producer != stage_record.producer {
            return Err(MaterialsError::BatchStagedToDifferentOwner { batch, stage });
        }
        let producer = batch_record.producer.clone();

        if let Some(record) = self.producers.get_mut(&producer) {
            record.inventory.remove(&batch);
        }
        if let Some(record) = self.stages.get_mut(&stage) {
            record.batches.push(batch);
        }
        if let Some(record) = self.batches.get_mut(&batch) {
            record.stage = Some(stage);
        }
        debug!(%batch, %stage, "batch moved to stage");
        self.publish(vec![MaterialsEvent::StageMembershipAdded {
            batch,
            stage,
            producer,
        }]);
        Ok(())
    }

    pub fn move_batch_to_inventory(&mut self, batch: BatchId) -> Result<(), MaterialsError> {
        let batch_record = self.live_batch(batch)?;
        let stage = batch_record
            .stage
            .ok_or(MaterialsError::BatchNotStaged(batch))?;
        if self.stage_record(stage)?.offered {
            return Err(MaterialsError::OfferedStageUnalterable(stage));
        }
        let producer = batch_record.producer.clone();

        let event = self.demote_batch(batch, stage, producer);
        debug!(%batch, %stage, "batch moved to inventory");
        self.publish(vec![event]);
        Ok(())
    }

    /// Move a staged batch back into its producer's inventory.
    fn demote_batch(
        &mut self,
        batch: BatchId,
        stage: StageId,
        producer: MaterialsProducerId,
    ) -> MaterialsEvent {
        if let Some(record) = self.stages.get_mut(&stage) {
            record.batches.retain(|b| *b != batch);
        }
        if let Some(record) = self.batches.get_mut(&batch) {
            record.stage = None;
        }
        if let Some(record) = self.producers.get_mut(&producer) {
            record.inventory.insert(batch);
        }
        MaterialsEvent::StageMembershipRemoved {
            batch,
            stage,
            producer,
        }
    }

    /// Announce a batch's removal. The batch stays queryable until the end
    /// of the current activation.
    pub fn remove_batch(&mut self, batch: BatchId) -> Result<(), MaterialsError> {
        let batch_record = self.live_batch(batch)?;
        self.check_batch_unlocked(batch_record)?;

        let events: Vec<MaterialsEvent> = self.mark_batch_removed(batch).into_iter().collect();
        debug!(%batch, "batch removal scheduled");
        self.publish(events);
        Ok(())
    }

    /// Announce a stage's removal. Member batches are either destroyed with
    /// it or returned to the producer's inventory.
    pub fn remove_stage(
        &mut self,
        stage: StageId,
        destroy_batches: bool,
    ) -> Result<(), MaterialsError> {
        let stage_record = self.live_stage(stage)?;
        if stage_record.offered {
            return Err(MaterialsError::OfferedStageUnalterable(stage));
        }
        let producer = stage_record.producer.clone();

        let mut events = if destroy_batches {
            self.mark_stage_batches_removed(stage)
        } else {
            let members: Vec<BatchId> = stage_record
                .batches
                .iter()
                .copied()
                .filter(|b| self.batches.get(b).is_some_and(|r| !r.pending_removal))
                .collect();
            members
                .into_iter()
                .map(|batch| self.demote_batch(batch, stage, producer.clone()))
                .collect()
        };
        events.extend(self.mark_stage_removed(stage));
        debug!(%stage, destroy_batches, "stage removal scheduled");
        self.publish(events);
        Ok(())
    }

    pub fn set_stage_offer(&mut self, stage: StageId, offered: bool) -> Result<(), MaterialsError> {
        let stage_record = self.live_stage(stage)?;
        let previous = stage_record.offered;
        let producer = stage_record.producer.clone();

        if let Some(record) = self.stages.get_mut(&stage) {
            record.offered = offered;
        }
        debug!(%stage, offered, "stage offer updated");
        self.publish(vec![MaterialsEvent::StageOfferUpdated {
            stage,
            producer,
            previous,
            current: offered,
        }]);
        Ok(())
    }

    /// Destroy a stage and its batches, replacing them with one new batch in
    /// the stage owner's inventory.
    pub fn convert_stage_to_batch(
        &mut self,
        stage: StageId,
        material: MaterialId,
        amount: f64,
        properties: Vec<(BatchPropertyId, PropertyValue)>,
    ) -> Result<BatchId, MaterialsError> {
        let stage_record = self.live_stage(stage)?;
        if stage_record.offered {
            return Err(MaterialsError::OfferedStageUnalterable(stage));
        }
        let producer = stage_record.producer.clone();
        self.check_material(&material)?;
        check_material_amount(amount)?;
        let values = self.resolve_batch_values(&material, &properties)?;
        self.check_batch_counter()?;

        let mut events = self.mark_stage_batches_removed(stage);
        let batch = self.insert_batch(producer.clone(), material.clone(), amount, values);
        events.push(MaterialsEvent::BatchAdded {
            batch,
            producer,
            material,
        });
        events.extend(self.mark_stage_removed(stage));
        debug!(%stage, %batch, amount, "stage converted to batch");
        self.publish(events);
        Ok(batch)
    }

    /// Destroy a stage and its batches, crediting `amount` of `resource` to
    /// the stage owner's ledger.
    pub fn convert_stage_to_resource(
        &mut self,
        stage: StageId,
        resource: ResourceId,
        amount: i64,
    ) -> Result<(), MaterialsError> {
        let stage_record = self.live_stage(stage)?;
        if stage_record.offered {
            return Err(MaterialsError::OfferedStageUnalterable(stage));
        }
        let producer = stage_record.producer.clone();
        self.check_resource(&resource)?;
        check_resource_amount(amount)?;
        let previous = self.producer_resource_level(&producer, &resource)?;
        let current = previous
            .checked_add(amount)
            .ok_or(MaterialsError::ResourceArithmeticOverflow)?;

        let mut events = self.mark_stage_batches_removed(stage);
        if let Some(record) = self.producers.get_mut(&producer) {
            record.resources.insert(resource.clone(), current);
        }
        events.push(MaterialsEvent::ProducerResourceUpdated {
            producer,
            resource: resource.clone(),
            previous,
            current,
        });
        events.extend(self.mark_stage_removed(stage));
        debug!(%stage, %resource, amount, "stage converted to resource");
        self.publish(events);
        Ok(())
    }

    /// Shift `amount` from one batch to another of the same material and
    /// owner. A zero amount is accepted and changes nothing.
    pub fn transfer_material(
        &mut self,
        source: BatchId,
        destination: BatchId,
        amount: f64,
    ) -> Result<(), MaterialsError> {
        let source_record = self.live_batch(source)?;
        let destination_record = self.live_batch(destination)?;
        if source == destination {
            return Err(MaterialsError::ReflexiveBatchShift(source));
        }
        if source_record.material != destination_record.material {
            return Err(MaterialsError::MaterialTypeMismatch {
                expected: source_record.material.clone(),
                actual: destination_record.material.clone(),
            });
        }
        if source_record.producer != destination_record.producer {
            return Err(MaterialsError::BatchShiftOwnerMismatch {
                source_batch: source,
                destination_batch: destination,
            });
        }
        self.check_batch_unlocked(source_record)?;
        self.check_batch_unlocked(destination_record)?;
        check_material_amount(amount)?;
        if amount > source_record.amount {
            return Err(MaterialsError::InsufficientMaterialAvailable {
                requested: amount,
                available: source_record.amount,
            });
        }
        let destination_after = destination_record.amount + amount;
        if !destination_after.is_finite() {
            return Err(MaterialsError::MaterialArithmeticOverflow);
        }
        if amount == 0.0 {
            return Ok(());
        }
        let producer = source_record.producer.clone();
        let source_before = source_record.amount;
        let destination_before = destination_record.amount;
        let source_after = source_before - amount;

        if let Some(record) = self.batches.get_mut(&source) {
            record.amount = source_after;
        }
        if let Some(record) = self.batches.get_mut(&destination) {
            record.amount = destination_after;
        }
        debug!(%source, %destination, amount, "material transferred");
        self.publish(vec![
            MaterialsEvent::BatchAmountUpdated {
                batch: source,
                producer: producer.clone(),
                previous: source_before,
                current: source_after,
            },
            MaterialsEvent::BatchAmountUpdated {
                batch: destination,
                producer,
                previous: destination_before,
                current: destination_after,
            },
        ]);
        Ok(())
    }

    /// Hand an offered stage, and the batches on it, to another producer.
    pub fn transfer_offered_stage(
        &mut self,
        stage: StageId,
        new_producer: MaterialsProducerId,
    ) -> Result<(), MaterialsError> {
        let stage_record = self.live_stage(stage)?;
        self.producer_record(&new_producer)?;
        if !stage_record.offered {
            return Err(MaterialsError::UnofferedStageNotTransferable(stage));
        }
        if stage_record.producer == new_producer {
            return Err(MaterialsError::ReflexiveStageTransfer(stage));
        }
        let previous = stage_record.producer.clone();
        let members = stage_record.batches.clone();

        if let Some(record) = self.producers.get_mut(&previous) {
            record.stages.remove(&stage);
        }
        if let Some(record) = self.producers.get_mut(&new_producer) {
            record.stages.insert(stage);
        }
        if let Some(record) = self.stages.get_mut(&stage) {
            record.producer = new_producer.clone();
        }
        for batch in members {
            if let Some(record) = self.batches.get_mut(&batch) {
                record.producer = new_producer.clone();
            }
        }
        debug!(%stage, from = %previous, to = %new_producer, "offered stage transferred");
        self.publish(vec![
            MaterialsEvent::StageProducerUpdated {
                stage,
                previous,
                current: new_producer.clone(),
            },
            MaterialsEvent::StageOfferUpdated {
                stage,
                producer: new_producer,
                previous: true,
                current: true,
            },
        ]);
        Ok(())
    }

    /// Move `amount` of a resource from a producer's ledger into a region.
    pub fn transfer_resource_to_region(
        &mut self,
        producer: MaterialsProducerId,
        resource: ResourceId,
        region: RegionId,
        amount: i64,
    ) -> Result<(), MaterialsError> {
        self.producer_record(&producer)?;
        self.check_resource(&resource)?;
        if !self.resources.region_id_exists(&region) {
            return Err(MaterialsError::UnknownRegionId(region));
        }
        check_resource_amount(amount)?;
        let previous = self.producer_resource_level(&producer, &resource)?;
        if amount > previous {
            return Err(MaterialsError::InsufficientResourcesAvailable {
                requested: amount,
                available: previous,
            });
        }
        // The region credit is checked and applied atomically by the
        // collaborator; the local debit cannot fail after it.
        self.resources.credit_region(&region, &resource, amount)?;
        let current = previous - amount;
        if let Some(record) = self.producers.get_mut(&producer) {
            record.resources.insert(resource.clone(), current);
        }
        debug!(%producer, %resource, %region, amount, "resource transferred to region");
        self.publish(vec![MaterialsEvent::ProducerResourceUpdated {
            producer,
            resource,
            previous,
            current,
        }]);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commands: property values
    // -----------------------------------------------------------------------

    pub fn set_batch_property(
        &mut self,
        batch: BatchId,
        property: BatchPropertyId,
        value: PropertyValue,
    ) -> Result<(), MaterialsError> {
        let batch_record = self.live_batch(batch)?;
        let definition = self.batch_definition(&batch_record.material, &property)?;
        if !definition.is_mutable() {
            return Err(MaterialsError::ImmutablePropertyAssignment(property.to_string()));
        }
        if !definition.is_compatible(&value) {
            return Err(MaterialsError::IncompatibleValue {
                property: property.to_string(),
                expected: definition.property_type(),
            });
        }
        self.check_batch_unlocked(batch_record)?;
        let previous = self.batch_property_value(batch, &property)?;
        let producer = batch_record.producer.clone();

        let time = self.time;
        if let Some(record) = self.batches.get_mut(&batch) {
            record.properties.insert(
                property.clone(),
                TimedValue {
                    value: value.clone(),
                    time,
                },
            );
        }
        debug!(%batch, %property, "batch property updated");
        self.publish(vec![MaterialsEvent::BatchPropertyUpdated {
            batch,
            producer,
            property,
            previous,
            current: value,
        }]);
        Ok(())
    }

    pub fn set_producer_property(
        &mut self,
        producer: MaterialsProducerId,
        property: ProducerPropertyId,
        value: PropertyValue,
    ) -> Result<(), MaterialsError> {
        self.producer_record(&producer)?;
        let definition = self.producer_definition(&property)?;
        if !definition.is_mutable() {
            return Err(MaterialsError::ImmutablePropertyAssignment(property.to_string()));
        }
        if !definition.is_compatible(&value) {
            return Err(MaterialsError::IncompatibleValue {
                property: property.to_string(),
                expected: definition.property_type(),
            });
        }
        let previous = self.producer_property_value(&producer, &property)?;

        let time = self.time;
        if let Some(record) = self.producers.get_mut(&producer) {
            record.properties.insert(
                property.clone(),
                TimedValue {
                    value: value.clone(),
                    time,
                },
            );
        }
        debug!(%producer, %property, "producer property updated");
        self.publish(vec![MaterialsEvent::ProducerPropertyUpdated {
            producer,
            property,
            previous,
            current: value,
        }]);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn material_ids(&self) -> impl Iterator<Item = &MaterialId> {
        self.material_ids.iter()
    }

    pub fn material_id_exists(&self, material: &MaterialId) -> bool {
        self.material_ids.contains(material)
    }

    pub fn producer_ids(&self) -> impl Iterator<Item = &MaterialsProducerId> {
        self.producers.keys()
    }

    pub fn producer_id_exists(&self, producer: &MaterialsProducerId) -> bool {
        self.producers.contains_key(producer)
    }

    /// True until the batch is reaped, including while it is pending removal.
    pub fn batch_exists(&self, batch: BatchId) -> bool {
        self.batches.contains_key(&batch)
    }

    pub fn is_batch_pending_removal(&self, batch: BatchId) -> Result<bool, MaterialsError> {
        Ok(self.batch_record(batch)?.pending_removal)
    }

    pub fn batch_amount(&self, batch: BatchId) -> Result<f64, MaterialsError> {
        Ok(self.batch_record(batch)?.amount)
    }

    pub fn batch_material(&self, batch: BatchId) -> Result<&MaterialId, MaterialsError> {
        Ok(&self.batch_record(batch)?.material)
    }

    /// The owning producer. Fixed for the batch's life, except that
    /// [`Self::transfer_offered_stage`] hands member batches to the stage's
    /// new owner.
    pub fn batch_producer(&self, batch: BatchId) -> Result<&MaterialsProducerId, MaterialsError> {
        Ok(&self.batch_record(batch)?.producer)
    }

    pub fn batch_stage(&self, batch: BatchId) -> Result<Option<StageId>, MaterialsError> {
        Ok(self.batch_record(batch)?.stage)
    }

    pub fn batch_property_ids(
        &self,
        material: &MaterialId,
    ) -> Result<impl Iterator<Item = &BatchPropertyId>, MaterialsError> {
        self.check_material(material)?;
        Ok(self
            .batch_property_definitions
            .get(material)
            .into_iter()
            .flat_map(|defs| defs.keys()))
    }

    pub fn batch_property_id_exists(
        &self,
        material: &MaterialId,
        property: &BatchPropertyId,
    ) -> bool {
        self.batch_property_definitions
            .get(material)
            .is_some_and(|defs| defs.contains_key(property))
    }

    pub fn batch_property_definition(
        &self,
        material: &MaterialId,
        property: &BatchPropertyId,
    ) -> Result<&PropertyDefinition, MaterialsError> {
        self.check_material(material)?;
        self.batch_definition(material, property)
    }

    /// The batch's value for a property, falling back to the default.
    pub fn batch_property_value(
        &self,
        batch: BatchId,
        property: &BatchPropertyId,
    ) -> Result<PropertyValue, MaterialsError> {
        let record = self.batch_record(batch)?;
        let definition = self.batch_definition(&record.material, property)?;
        record
            .properties
            .get(property)
            .map(|timed| &timed.value)
            .or(definition.default_value())
            .cloned()
            .ok_or_else(|| {
                MaterialsError::InsufficientPropertyValueAssignment(property.to_string())
            })
    }

    /// When the property was last written. Default-backed values report 0.
    pub fn batch_property_time(
        &self,
        batch: BatchId,
        property: &BatchPropertyId,
    ) -> Result<f64, MaterialsError> {
        let record = self.batch_record(batch)?;
        self.batch_definition(&record.material, property)?;
        Ok(record
            .properties
            .get(property)
            .map_or(0.0, |timed| timed.time))
    }

    /// Unstaged batches owned by a producer.
    pub fn inventory_batches(
        &self,
        producer: &MaterialsProducerId,
    ) -> Result<Vec<BatchId>, MaterialsError> {
        Ok(self.producer_record(producer)?.inventory.iter().copied().collect())
    }

    pub fn inventory_batches_by_material(
        &self,
        producer: &MaterialsProducerId,
        material: &MaterialId,
    ) -> Result<Vec<BatchId>, MaterialsError> {
        let record = self.producer_record(producer)?;
        self.check_material(material)?;
        Ok(record
            .inventory
            .iter()
            .copied()
            .filter(|b| self.batches.get(b).is_some_and(|r| r.material == *material))
            .collect())
    }

    pub fn stage_exists(&self, stage: StageId) -> bool {
        self.stages.contains_key(&stage)
    }

    pub fn is_stage_pending_removal(&self, stage: StageId) -> Result<bool, MaterialsError> {
        Ok(self.stage_record(stage)?.pending_removal)
    }

    /// Member batches of a stage, in the order they joined.
    pub fn stage_batches(&self, stage: StageId) -> Result<Vec<BatchId>, MaterialsError> {
        Ok(self.stage_record(stage)?.batches.clone())
    }

    pub fn stage_batches_by_material(
        &self,
        stage: StageId,
        material: &MaterialId,
    ) -> Result<Vec<BatchId>, MaterialsError> {
        let record = self.stage_record(stage)?;
        self.check_material(material)?;
        Ok(record
            .batches
            .iter()
            .copied()
            .filter(|b| self.batches.get(b).is_some_and(|r| r.material == *material))
            .collect())
    }

    pub fn stages(&self, producer: &MaterialsProducerId) -> Result<Vec<StageId>, MaterialsError> {
        Ok(self.producer_record(producer)?.stages.iter().copied().collect())
    }

    pub fn offered_stages(
        &self,
        producer: &MaterialsProducerId,
    ) -> Result<Vec<StageId>, MaterialsError> {
        Ok(self
            .producer_record(producer)?
            .stages
            .iter()
            .copied()
            .filter(|s| self.stages.get(s).is_some_and(|r| r.offered))
            .collect())
    }

    pub fn is_stage_offered(&self, stage: StageId) -> Result<bool, MaterialsError> {
        Ok(self.stage_record(stage)?.offered)
    }

    pub fn stage_producer(&self, stage: StageId) -> Result<&MaterialsProducerId, MaterialsError> {
        Ok(&self.stage_record(stage)?.producer)
    }

    pub fn producer_property_ids(&self) -> impl Iterator<Item = &ProducerPropertyId> {
        self.producer_property_definitions.keys()
    }

    pub fn producer_property_id_exists(&self, property: &ProducerPropertyId) -> bool {
        self.producer_property_definitions.contains_key(property)
    }

    pub fn producer_property_definition(
        &self,
        property: &ProducerPropertyId,
    ) -> Result<&PropertyDefinition, MaterialsError> {
        self.producer_definition(property)
    }

    /// The producer's value for a property, falling back to the default.
    pub fn producer_property_value(
        &self,
        producer: &MaterialsProducerId,
        property: &ProducerPropertyId,
    ) -> Result<PropertyValue, MaterialsError> {
        let record = self.producer_record(producer)?;
        let definition = self.producer_definition(property)?;
        record
            .properties
            .get(property)
            .map(|timed| &timed.value)
            .or(definition.default_value())
            .cloned()
            .ok_or_else(|| {
                MaterialsError::InsufficientPropertyValueAssignment(property.to_string())
            })
    }

    /// When the property was last written. Default-backed values report 0.
    pub fn producer_property_time(
        &self,
        producer: &MaterialsProducerId,
        property: &ProducerPropertyId,
    ) -> Result<f64, MaterialsError> {
        let record = self.producer_record(producer)?;
        self.producer_definition(property)?;
        Ok(record
            .properties
            .get(property)
            .map_or(0.0, |timed| timed.time))
    }

    pub fn producer_resource_level(
        &self,
        producer: &MaterialsProducerId,
        resource: &ResourceId,
    ) -> Result<i64, MaterialsError> {
        let record = self.producer_record(producer)?;
        self.check_resource(resource)?;
        Ok(record.resources.get(resource).copied().unwrap_or(0))
    }

    /// The resources collaborator.
    pub fn resources(&self) -> &dyn Resources {
        self.resources.as_ref()
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Externalize the store. Entities pending removal are left out; a store
    /// rebuilt from the result behaves identically once the current
    /// activation has ended.
    pub fn to_state(&self) -> Result<MaterialsState, MaterialsError> {
        let mut builder = MaterialsState::builder();
        for material in &self.material_ids {
            builder.add_material(material.clone());
        }
        for (property, definition) in &self.producer_property_definitions {
            builder.define_producer_property(property.clone(), definition.clone());
        }
        for (producer, record) in &self.producers {
            builder.add_producer(producer.clone());
            for (property, timed) in &record.properties {
                builder.set_producer_property_value_at(
                    producer.clone(),
                    property.clone(),
                    timed.value.clone(),
                    timed.time,
                );
            }
            for (resource, level) in &record.resources {
                builder.set_producer_resource_level(producer.clone(), resource.clone(), *level);
            }
        }
        for (material, definitions) in &self.batch_property_definitions {
            for (property, definition) in definitions {
                builder.define_batch_property(
                    material.clone(),
                    property.clone(),
                    definition.clone(),
                );
            }
        }
        for (batch_id, record) in &self.batches {
            if record.pending_removal {
                continue;
            }
            builder.add_batch(
                *batch_id,
                record.material.clone(),
                record.amount,
                record.producer.clone(),
            );
            for (property, timed) in &record.properties {
                builder.set_batch_property_value_at(
                    *batch_id,
                    property.clone(),
                    timed.value.clone(),
                    timed.time,
                );
            }
        }
        for (stage_id, record) in &self.stages {
            if record.pending_removal {
                continue;
            }
            builder.add_stage(*stage_id, record.offered, record.producer.clone());
            for batch_id in &record.batches {
                if self.batches.get(batch_id).is_some_and(|b| !b.pending_removal) {
                    builder.add_batch_to_stage(*stage_id, *batch_id);
                }
            }
        }
        builder
            .set_next_batch_id(self.next_batch_id)
            .set_next_stage_id(self.next_stage_id);
        let state = builder.build()?;
        info!(
            batches = state.batches().len(),
            stages = state.stages().len(),
            "materials state exported"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::property::PropertyType;
    use crate::resources::RegionResources;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn steel() -> MaterialId {
        MaterialId::new("steel")
    }

    fn mill() -> MaterialsProducerId {
        MaterialsProducerId::new("mill")
    }

    fn store() -> MaterialsDataManager {
        let mut builder = MaterialsState::builder();
        builder.add_material(steel()).add_producer(mill());
        open(&builder.build().unwrap())
    }

    fn open(state: &MaterialsState) -> MaterialsDataManager {
        MaterialsDataManager::new(state, Box::new(RegionResources::new())).unwrap()
    }

    #[test]
    fn batch_ids_come_from_counter() {
        let mut store = store();
        let a = store
            .add_batch(BatchConstruction::new(mill(), steel(), 1.0))
            .unwrap();
        let b = store
            .add_batch(BatchConstruction::new(mill(), steel(), 2.0))
            .unwrap();
        assert_eq!(a, BatchId(0));
        assert_eq!(b, BatchId(1));
        assert_eq!(store.inventory_batches(&mill()).unwrap(), vec![a, b]);
    }

    #[test]
    fn exhausted_counters_reject_new_entities() {
        let mut builder = MaterialsState::builder();
        builder
            .add_material(steel())
            .add_producer(mill())
            .set_next_batch_id(i64::MAX)
            .set_next_stage_id(i64::MAX);
        let mut store = open(&builder.build().unwrap());
        let before = store.events_published();

        assert_eq!(
            store.add_batch(BatchConstruction::new(mill(), steel(), 1.0)),
            Err(MaterialsError::BatchIdCounterExhausted)
        );
        assert_eq!(store.add_stage(mill()), Err(MaterialsError::StageIdCounterExhausted));
        assert_eq!(store.events_published(), before);
        assert!(store.inventory_batches(&mill()).unwrap().is_empty());
        assert!(store.stages(&mill()).unwrap().is_empty());
    }

    #[test]
    fn failed_command_publishes_nothing() {
        let mut store = store();
        let before = store.events_published();
        let result = store.add_batch(BatchConstruction::new(mill(), steel(), -1.0));
        assert_eq!(result, Err(MaterialsError::NegativeMaterialAmount(-1.0)));
        assert_eq!(store.events_published(), before);
        assert!(store.inventory_batches(&mill()).unwrap().is_empty());
    }

    #[test]
    fn removal_is_visible_until_activation_ends() {
        let mut store = store();
        let batch = store
            .add_batch(BatchConstruction::new(mill(), steel(), 1.0))
            .unwrap();
        store.remove_batch(batch).unwrap();
        assert!(store.batch_exists(batch));
        assert_eq!(store.is_batch_pending_removal(batch), Ok(true));
        assert_eq!(
            store.remove_batch(batch),
            Err(MaterialsError::BatchPendingRemoval(batch))
        );
        assert_eq!(store.end_activation(), 1);
        assert!(!store.batch_exists(batch));
        assert!(store.inventory_batches(&mill()).unwrap().is_empty());
    }

    #[test]
    fn handlers_may_issue_commands() {
        let mut store = store();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        store.subscribe(EventFilter::of_kind(EventKind::BatchAdded), |store, event| {
            if let MaterialsEvent::BatchAdded { producer, .. } = event {
                store.add_stage(producer.clone()).unwrap();
            }
        });
        store.subscribe(EventFilter::of_kind(EventKind::StageAdded), move |_, event| {
            log.borrow_mut().push(event.clone());
        });
        store
            .add_batch(BatchConstruction::new(mill(), steel(), 1.0))
            .unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![MaterialsEvent::StageAdded {
                stage: StageId(0),
                producer: mill(),
            }]
        );
    }

    #[test]
    fn unsubscribed_handler_stops_receiving() {
        let mut store = store();
        let count = Rc::new(RefCell::new(0));
        let counter = count.clone();
        let id = store.subscribe(EventFilter::of_kind(EventKind::StageAdded), move |_, _| {
            *counter.borrow_mut() += 1;
        });
        store.add_stage(mill()).unwrap();
        store.unsubscribe(id);
        store.add_stage(mill()).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn default_backed_property_time_is_zero() {
        let mut builder = MaterialsState::builder();
        builder
            .add_material(steel())
            .add_producer(mill())
            .define_batch_property(
                steel(),
                BatchPropertyId::new("grade"),
                PropertyDefinition::builder(PropertyType::Integer)
                    .default_value(1_i64)
                    .build()
                    .unwrap(),
            );
        let mut store = open(&builder.build().unwrap());
        store.set_time(4.0);
        let batch = store
            .add_batch(BatchConstruction::new(mill(), steel(), 1.0))
            .unwrap();
        let grade = BatchPropertyId::new("grade");
        assert_eq!(store.batch_property_value(batch, &grade), Ok(PropertyValue::Integer(1)));
        assert_eq!(store.batch_property_time(batch, &grade), Ok(0.0));
        store
            .set_batch_property(batch, grade.clone(), PropertyValue::Integer(3))
            .unwrap();
        assert_eq!(store.batch_property_time(batch, &grade), Ok(4.0));
    }
}
