//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::event::{EventFilter, EventKind, MaterialsEvent};
use crate::id::*;
use crate::manager::{BatchConstruction, MaterialsDataManager};
use crate::property::{PropertyDefinition, PropertyType};
use crate::resources::RegionResources;
use crate::sim::Simulation;
use crate::state::MaterialsState;
use std::cell::RefCell;
use std::rc::Rc;

// ===========================================================================
// Identifiers
// ===========================================================================

pub fn ore() -> MaterialId {
    MaterialId::new("ore")
}
pub fn steel() -> MaterialId {
    MaterialId::new("steel")
}

pub fn mill() -> MaterialsProducerId {
    MaterialsProducerId::new("mill")
}
pub fn forge() -> MaterialsProducerId {
    MaterialsProducerId::new("forge")
}

pub fn fuel() -> ResourceId {
    ResourceId::new("fuel")
}
pub fn water() -> ResourceId {
    ResourceId::new("water")
}

pub fn north() -> RegionId {
    RegionId::new("north")
}

/// Integer batch property on steel, default 1, mutable.
pub fn grade() -> BatchPropertyId {
    BatchPropertyId::new("grade")
}

/// Text producer property, default "idle", mutable.
pub fn status() -> ProducerPropertyId {
    ProducerPropertyId::new("status")
}

// ===========================================================================
// Fixtures
// ===========================================================================

/// Resources subsystem knowing `fuel`, `water` and the `north` region.
pub fn standard_resources() -> RegionResources {
    RegionResources::new()
        .with_resource(fuel())
        .with_resource(water())
        .with_region(north())
}

/// Two producers (`mill`, `forge`), two materials (`ore`, `steel`), the
/// `grade` batch property and the `status` producer property. No batches
/// or stages.
pub fn standard_state() -> MaterialsState {
    let mut builder = MaterialsState::builder();
    builder
        .add_material(ore())
        .add_material(steel())
        .add_producer(mill())
        .add_producer(forge())
        .define_batch_property(
            steel(),
            grade(),
            PropertyDefinition::builder(PropertyType::Integer)
                .default_value(1_i64)
                .build()
                .expect("grade definition"),
        )
        .define_producer_property(
            status(),
            PropertyDefinition::builder(PropertyType::Text)
                .default_value("idle")
                .build()
                .expect("status definition"),
        );
    builder.build().expect("standard state")
}

pub fn standard_store() -> MaterialsDataManager {
    MaterialsDataManager::new(&standard_state(), Box::new(standard_resources()))
        .expect("standard store")
}

pub fn standard_simulation() -> Simulation {
    Simulation::new(standard_store())
}

/// Add a batch with no explicit properties.
pub fn add_batch(
    store: &mut MaterialsDataManager,
    producer: MaterialsProducerId,
    material: MaterialId,
    amount: f64,
) -> BatchId {
    store
        .add_batch(BatchConstruction::new(producer, material, amount))
        .expect("add batch")
}

// ===========================================================================
// Event recording
// ===========================================================================

pub type EventLog = Rc<RefCell<Vec<MaterialsEvent>>>;

/// Subscribe a recorder for one event kind.
pub fn record(store: &mut MaterialsDataManager, kind: EventKind) -> EventLog {
    record_filtered(store, EventFilter::of_kind(kind))
}

pub fn record_filtered(store: &mut MaterialsDataManager, filter: EventFilter) -> EventLog {
    let log: EventLog = Rc::default();
    let sink = log.clone();
    store.subscribe(filter, move |_, event| sink.borrow_mut().push(event.clone()));
    log
}

/// Subscribe a recorder for every event kind, preserving global order.
pub fn record_all(store: &mut MaterialsDataManager) -> EventLog {
    let log: EventLog = Rc::default();
    for kind in EventKind::ALL {
        let sink = log.clone();
        store.subscribe(EventFilter::of_kind(kind), move |_, event| {
            sink.borrow_mut().push(event.clone())
        });
    }
    log
}
