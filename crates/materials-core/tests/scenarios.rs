//! End-to-end scenarios for the materials store.
//!
//! These tests drive the store through realistic command sequences and
//! check the resulting inventories, stages, ledgers and error behavior.

use materials_core::error::MaterialsError;
use materials_core::id::*;
use materials_core::manager::{BatchConstruction, MaterialsDataManager, ProducerConstruction};
use materials_core::property::{PropertyDefinition, PropertyType, PropertyValue};
use materials_core::resources::{RegionResources, Resources};
use materials_core::state::MaterialsState;
use materials_core::test_utils::*;
use std::collections::BTreeMap;

// ===========================================================================
// Offered stages
// ===========================================================================

#[test]
fn offered_stage_blocks_demotion_until_unoffered() {
    let state = MaterialsState::builder().build().unwrap();
    let mut store = MaterialsDataManager::new(&state, Box::new(RegionResources::new())).unwrap();
    let p1 = MaterialsProducerId::new("P1");
    let p2 = MaterialsProducerId::new("P2");
    let m1 = MaterialId::new("M1");
    store.add_materials_producer(ProducerConstruction::new(p1.clone())).unwrap();
    store.add_materials_producer(ProducerConstruction::new(p2.clone())).unwrap();
    store.add_material_id(m1.clone()).unwrap();

    let batch = add_batch(&mut store, p1.clone(), m1, 10.0);
    let stage = store.add_stage(p1.clone()).unwrap();
    store.move_batch_to_stage(batch, stage).unwrap();
    store.set_stage_offer(stage, true).unwrap();

    assert_eq!(
        store.move_batch_to_inventory(batch),
        Err(MaterialsError::OfferedStageUnalterable(stage))
    );
    assert_eq!(store.stage_batches(stage).unwrap(), vec![batch]);

    store.set_stage_offer(stage, false).unwrap();
    store.move_batch_to_inventory(batch).unwrap();
    assert_eq!(store.inventory_batches(&p1).unwrap(), vec![batch]);
    assert_eq!(store.batch_stage(batch), Ok(None));
    assert!(store.stage_batches(stage).unwrap().is_empty());
    assert!(store.inventory_batches(&p2).unwrap().is_empty());
}

#[test]
fn offered_stage_freezes_members() {
    let mut store = standard_store();
    let a = add_batch(&mut store, mill(), steel(), 4.0);
    let b = add_batch(&mut store, mill(), steel(), 6.0);
    let loose = add_batch(&mut store, mill(), steel(), 1.0);
    let stage = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(a, stage).unwrap();
    store.move_batch_to_stage(b, stage).unwrap();
    store.set_stage_offer(stage, true).unwrap();

    let locked = Err(MaterialsError::OfferedStageUnalterable(stage));
    assert_eq!(store.transfer_material(a, b, 1.0), locked);
    assert_eq!(store.transfer_material(loose, a, 1.0), locked);
    assert_eq!(
        store.set_batch_property(a, grade(), PropertyValue::Integer(5)),
        locked
    );
    assert_eq!(store.remove_batch(a), locked);
    assert_eq!(store.move_batch_to_stage(loose, stage), locked);
    assert_eq!(store.remove_stage(stage, true), locked);
    assert_eq!(
        store.convert_stage_to_batch(stage, steel(), 1.0, Vec::new()),
        Err(MaterialsError::OfferedStageUnalterable(stage))
    );
    assert_eq!(store.convert_stage_to_resource(stage, fuel(), 1), locked);

    assert_eq!(store.batch_amount(a), Ok(4.0));
    assert_eq!(store.stage_batches(stage).unwrap(), vec![a, b]);
    assert_eq!(store.offered_stages(&mill()).unwrap(), vec![stage]);
}

#[test]
fn offered_stage_transfer_moves_stage_and_members() {
    let mut store = standard_store();
    let batch = add_batch(&mut store, mill(), steel(), 3.0);
    let stage = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(batch, stage).unwrap();

    assert_eq!(
        store.transfer_offered_stage(stage, forge()),
        Err(MaterialsError::UnofferedStageNotTransferable(stage))
    );
    store.set_stage_offer(stage, true).unwrap();
    assert_eq!(
        store.transfer_offered_stage(stage, mill()),
        Err(MaterialsError::ReflexiveStageTransfer(stage))
    );
    store.transfer_offered_stage(stage, forge()).unwrap();

    assert_eq!(store.stage_producer(stage), Ok(&forge()));
    assert_eq!(store.is_stage_offered(stage), Ok(true));
    assert_eq!(store.batch_producer(batch), Ok(&forge()));
    assert!(store.stages(&mill()).unwrap().is_empty());
    assert_eq!(store.stages(&forge()).unwrap(), vec![stage]);

    // The new owner unoffers and unpacks the stage.
    store.set_stage_offer(stage, false).unwrap();
    store.move_batch_to_inventory(batch).unwrap();
    assert_eq!(store.inventory_batches(&forge()).unwrap(), vec![batch]);
}

#[test]
fn batch_owner_changes_only_with_stage_transfer() {
    let mut store = standard_store();
    let batch = add_batch(&mut store, mill(), steel(), 6.0);
    let other = add_batch(&mut store, mill(), steel(), 1.0);
    let owned_by_mill = |store: &MaterialsDataManager| {
        assert_eq!(store.batch_producer(batch), Ok(&mill()));
    };

    let stage = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(batch, stage).unwrap();
    owned_by_mill(&store);
    store.move_batch_to_inventory(batch).unwrap();
    store.transfer_material(batch, other, 2.0).unwrap();
    store.set_batch_property(batch, grade(), PropertyValue::Integer(3)).unwrap();
    owned_by_mill(&store);

    store.move_batch_to_stage(batch, stage).unwrap();
    store.set_stage_offer(stage, true).unwrap();
    store.set_stage_offer(stage, false).unwrap();
    owned_by_mill(&store);

    store.move_batch_to_inventory(batch).unwrap();
    store.remove_batch(batch).unwrap();
    owned_by_mill(&store);

    let moved = add_batch(&mut store, mill(), steel(), 1.0);
    store.move_batch_to_stage(moved, stage).unwrap();
    store.set_stage_offer(stage, true).unwrap();
    store.transfer_offered_stage(stage, forge()).unwrap();
    assert_eq!(store.batch_producer(moved), Ok(&forge()));
    assert_eq!(store.batch_producer(other), Ok(&mill()));
}

#[test]
fn batch_cannot_join_another_producers_stage() {
    let mut store = standard_store();
    let batch = add_batch(&mut store, mill(), steel(), 1.0);
    let stage = store.add_stage(forge()).unwrap();
    assert_eq!(
        store.move_batch_to_stage(batch, stage),
        Err(MaterialsError::BatchStagedToDifferentOwner { batch, stage })
    );
    let own = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(batch, own).unwrap();
    assert_eq!(
        store.move_batch_to_stage(batch, own),
        Err(MaterialsError::BatchAlreadyStaged(batch))
    );
    store.move_batch_to_inventory(batch).unwrap();
    assert_eq!(
        store.move_batch_to_inventory(batch),
        Err(MaterialsError::BatchNotStaged(batch))
    );
}

// ===========================================================================
// Stage conversion
// ===========================================================================

#[test]
fn convert_stage_with_three_batches_to_batch() {
    let mut sim = standard_simulation();
    let store = sim.materials_mut();
    let members: Vec<BatchId> = (0..3)
        .map(|i| add_batch(store, mill(), ore(), 1.0 + i as f64))
        .collect();
    let stage = store.add_stage(mill()).unwrap();
    for batch in &members {
        store.move_batch_to_stage(*batch, stage).unwrap();
    }
    let product = store
        .convert_stage_to_batch(stage, steel(), 4.5, vec![(grade(), PropertyValue::Integer(3))])
        .unwrap();

    // Still visible within the activation that removed them.
    assert!(members.iter().all(|b| store.batch_exists(*b)));
    assert!(store.stage_exists(stage));

    sim.execute();
    let store = sim.materials();
    assert!(members.iter().all(|b| !store.batch_exists(*b)));
    assert!(!store.stage_exists(stage));
    assert_eq!(store.inventory_batches(&mill()).unwrap(), vec![product]);
    assert_eq!(store.batch_material(product), Ok(&steel()));
    assert_eq!(store.batch_amount(product), Ok(4.5));
    assert_eq!(
        store.batch_property_value(product, &grade()),
        Ok(PropertyValue::Integer(3))
    );
}

#[test]
fn convert_stage_to_resource_credits_owner() {
    let mut store = standard_store();
    let batch = add_batch(&mut store, mill(), ore(), 2.0);
    let stage = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(batch, stage).unwrap();
    store.convert_stage_to_resource(stage, fuel(), 40).unwrap();
    assert_eq!(store.producer_resource_level(&mill(), &fuel()), Ok(40));
    assert_eq!(store.is_stage_pending_removal(stage), Ok(true));
    assert_eq!(store.is_batch_pending_removal(batch), Ok(true));
    assert_eq!(store.end_activation(), 2);
}

#[test]
fn ledger_overflow_leaves_ledger_unchanged() {
    let mut builder = standard_state().clone_builder();
    builder.set_producer_resource_level(mill(), fuel(), i64::MAX - 1);
    let state = builder.build().unwrap();
    let mut store = MaterialsDataManager::new(&state, Box::new(standard_resources())).unwrap();

    let stage = store.add_stage(mill()).unwrap();
    assert_eq!(
        store.convert_stage_to_resource(stage, fuel(), 1_000),
        Err(MaterialsError::ResourceArithmeticOverflow)
    );
    assert_eq!(
        store.producer_resource_level(&mill(), &fuel()),
        Ok(i64::MAX - 1)
    );
    assert_eq!(store.is_stage_pending_removal(stage), Ok(false));
}

// ===========================================================================
// Material transfer
// ===========================================================================

#[test]
fn transfer_material_conserves_total() {
    let mut store = standard_store();
    let a = add_batch(&mut store, mill(), steel(), 10.0);
    let b = add_batch(&mut store, mill(), steel(), 2.5);
    store.transfer_material(a, b, 3.25).unwrap();
    assert_eq!(store.batch_amount(a), Ok(6.75));
    assert_eq!(store.batch_amount(b), Ok(5.75));
    store.transfer_material(a, b, 6.75).unwrap();
    assert_eq!(store.batch_amount(a), Ok(0.0));
    assert_eq!(store.batch_amount(b), Ok(12.5));
}

#[test]
fn transfer_material_rejections() {
    let mut store = standard_store();
    let a = add_batch(&mut store, mill(), steel(), 10.0);
    let b = add_batch(&mut store, mill(), steel(), 1.0);
    let other_material = add_batch(&mut store, mill(), ore(), 1.0);
    let other_owner = add_batch(&mut store, forge(), steel(), 1.0);

    assert_eq!(
        store.transfer_material(a, a, 1.0),
        Err(MaterialsError::ReflexiveBatchShift(a))
    );
    assert_eq!(
        store.transfer_material(a, other_material, 1.0),
        Err(MaterialsError::MaterialTypeMismatch {
            expected: steel(),
            actual: ore()
        })
    );
    assert_eq!(
        store.transfer_material(a, other_owner, 1.0),
        Err(MaterialsError::BatchShiftOwnerMismatch {
            source_batch: a,
            destination_batch: other_owner
        })
    );
    assert_eq!(
        store.transfer_material(a, b, 10.5),
        Err(MaterialsError::InsufficientMaterialAvailable {
            requested: 10.5,
            available: 10.0
        })
    );
    assert_eq!(
        store.transfer_material(a, b, -1.0),
        Err(MaterialsError::NegativeMaterialAmount(-1.0))
    );
    assert_eq!(
        store.transfer_material(a, BatchId(99), 1.0),
        Err(MaterialsError::UnknownBatchId(BatchId(99)))
    );
    assert_eq!(store.batch_amount(a), Ok(10.0));
    assert_eq!(store.batch_amount(b), Ok(1.0));
}

#[test]
fn transfer_material_overflow() {
    let mut store = standard_store();
    let a = add_batch(&mut store, mill(), steel(), f64::MAX);
    let b = add_batch(&mut store, mill(), steel(), f64::MAX);
    assert_eq!(
        store.transfer_material(a, b, f64::MAX),
        Err(MaterialsError::MaterialArithmeticOverflow)
    );
    assert_eq!(store.batch_amount(a), Ok(f64::MAX));
}

#[test]
fn zero_transfer_is_a_silent_no_op() {
    let mut store = standard_store();
    let a = add_batch(&mut store, mill(), steel(), 1.0);
    let b = add_batch(&mut store, mill(), steel(), 1.0);
    let published = store.events_published();
    store.transfer_material(a, b, 0.0).unwrap();
    assert_eq!(store.events_published(), published);
    assert_eq!(store.batch_amount(a), Ok(1.0));
}

// ===========================================================================
// Resources
// ===========================================================================

#[test]
fn resource_to_region_transfer() {
    let mut builder = standard_state().clone_builder();
    builder.set_producer_resource_level(mill(), fuel(), 50);
    let state = builder.build().unwrap();
    let mut store = MaterialsDataManager::new(&state, Box::new(standard_resources())).unwrap();

    store
        .transfer_resource_to_region(mill(), fuel(), north(), 20)
        .unwrap();
    assert_eq!(store.producer_resource_level(&mill(), &fuel()), Ok(30));
    assert_eq!(store.resources().region_resource_level(&north(), &fuel()), Ok(20));

    assert_eq!(
        store.transfer_resource_to_region(mill(), fuel(), north(), 31),
        Err(MaterialsError::InsufficientResourcesAvailable {
            requested: 31,
            available: 30
        })
    );
    assert_eq!(
        store.transfer_resource_to_region(mill(), fuel(), RegionId::new("south"), 1),
        Err(MaterialsError::UnknownRegionId(RegionId::new("south")))
    );
    assert_eq!(
        store.transfer_resource_to_region(mill(), fuel(), north(), -1),
        Err(MaterialsError::NegativeResourceAmount(-1))
    );
    assert_eq!(store.producer_resource_level(&mill(), &fuel()), Ok(30));
}

#[test]
fn new_resource_ids_are_provisioned_for_every_producer() {
    let mut store = standard_store();
    let coal = ResourceId::new("coal");
    assert_eq!(
        store.producer_resource_level(&mill(), &coal),
        Err(MaterialsError::UnknownResourceId(coal.clone()))
    );
    store.add_resource_id(coal.clone()).unwrap();
    assert_eq!(store.producer_resource_level(&mill(), &coal), Ok(0));
    assert_eq!(store.producer_resource_level(&forge(), &coal), Ok(0));
    assert_eq!(
        store.add_resource_id(coal.clone()),
        Err(MaterialsError::DuplicateResourceId(coal))
    );
}

#[test]
fn state_naming_unknown_resource_is_rejected() {
    let mut builder = standard_state().clone_builder();
    builder.set_producer_resource_level(mill(), ResourceId::new("coal"), 5);
    let state = builder.build().unwrap();
    let result = MaterialsDataManager::new(&state, Box::new(standard_resources()));
    assert!(matches!(
        result,
        Err(MaterialsError::UnknownResourceId(id)) if id == ResourceId::new("coal")
    ));
}

// ===========================================================================
// Properties
// ===========================================================================

#[test]
fn required_producer_property_needs_every_producer() {
    let mut store = standard_store();
    let capacity = ProducerPropertyId::new("capacity");
    let definition = PropertyDefinition::builder(PropertyType::Double).build().unwrap();
    let partial = BTreeMap::from([(mill(), PropertyValue::Double(5.0))]);
    assert_eq!(
        store.define_producer_property(capacity.clone(), definition.clone(), partial),
        Err(MaterialsError::InsufficientPropertyValueAssignment(
            "capacity".to_string()
        ))
    );
    assert!(!store.producer_property_id_exists(&capacity));

    let full = BTreeMap::from([
        (mill(), PropertyValue::Double(5.0)),
        (forge(), PropertyValue::Double(7.0)),
    ]);
    store
        .define_producer_property(capacity.clone(), definition, full)
        .unwrap();
    assert_eq!(
        store.producer_property_value(&forge(), &capacity),
        Ok(PropertyValue::Double(7.0))
    );

    // New producers must now supply it too.
    let smelter = MaterialsProducerId::new("smelter");
    assert_eq!(
        store.add_materials_producer(ProducerConstruction::new(smelter.clone())),
        Err(MaterialsError::InsufficientPropertyValueAssignment(
            "capacity".to_string()
        ))
    );
    store
        .add_materials_producer(
            ProducerConstruction::new(smelter.clone()).with_property(capacity.clone(), 1.5),
        )
        .unwrap();
    assert_eq!(
        store.producer_property_value(&smelter, &status()),
        Ok(PropertyValue::from("idle"))
    );
}

#[test]
fn immutable_and_incompatible_assignments() {
    let mut store = standard_store();
    let serial = BatchPropertyId::new("serial");
    let batch = add_batch(&mut store, mill(), steel(), 1.0);
    store
        .define_batch_property(
            steel(),
            serial.clone(),
            PropertyDefinition::builder(PropertyType::Text)
                .mutable(false)
                .build()
                .unwrap(),
            BTreeMap::from([(batch, PropertyValue::from("S-1"))]),
        )
        .unwrap();

    assert_eq!(
        store.set_batch_property(batch, serial.clone(), PropertyValue::from("S-2")),
        Err(MaterialsError::ImmutablePropertyAssignment("serial".to_string()))
    );
    assert_eq!(
        store.set_batch_property(batch, grade(), PropertyValue::Boolean(true)),
        Err(MaterialsError::IncompatibleValue {
            property: "grade".to_string(),
            expected: PropertyType::Integer
        })
    );
    assert_eq!(
        store.set_batch_property(batch, BatchPropertyId::new("colour"), PropertyValue::Integer(1)),
        Err(MaterialsError::UnknownBatchPropertyId {
            material: steel(),
            property: BatchPropertyId::new("colour")
        })
    );

    // New steel batches must carry the required serial.
    assert_eq!(
        store.add_batch(BatchConstruction::new(mill(), steel(), 1.0)),
        Err(MaterialsError::InsufficientPropertyValueAssignment(
            "serial".to_string()
        ))
    );
    let second = store
        .add_batch(
            BatchConstruction::new(mill(), steel(), 1.0).with_property(serial.clone(), "S-2"),
        )
        .unwrap();
    assert_eq!(
        store.batch_property_value(second, &serial),
        Ok(PropertyValue::from("S-2"))
    );
}

#[test]
fn non_finite_double_values_rejected() {
    let mut store = standard_store();
    let purity = BatchPropertyId::new("purity");
    let batch = add_batch(&mut store, mill(), steel(), 1.0);
    store
        .define_batch_property(
            steel(),
            purity.clone(),
            PropertyDefinition::builder(PropertyType::Double)
                .default_value(1.0)
                .build()
                .unwrap(),
            BTreeMap::new(),
        )
        .unwrap();

    for value in [f64::NAN, f64::INFINITY] {
        assert_eq!(
            store.set_batch_property(batch, purity.clone(), PropertyValue::Double(value)),
            Err(MaterialsError::IncompatibleValue {
                property: "purity".to_string(),
                expected: PropertyType::Double
            })
        );
    }
    assert_eq!(
        store.batch_property_value(batch, &purity),
        Ok(PropertyValue::Double(1.0))
    );
}

#[test]
fn batch_property_values_must_match_material() {
    let mut store = standard_store();
    let ore_batch = add_batch(&mut store, mill(), ore(), 1.0);
    let purity = BatchPropertyId::new("purity");
    assert_eq!(
        store.define_batch_property(
            steel(),
            purity.clone(),
            PropertyDefinition::builder(PropertyType::Double)
                .default_value(0.5)
                .build()
                .unwrap(),
            BTreeMap::from([(ore_batch, PropertyValue::Double(0.9))]),
        ),
        Err(MaterialsError::MaterialTypeMismatch {
            expected: steel(),
            actual: ore()
        })
    );
    assert!(!store.batch_property_id_exists(&steel(), &purity));
}

#[test]
fn property_times_follow_the_clock() {
    let mut sim = standard_simulation();
    sim.add_plan(2.0, |sim| {
        sim.materials_mut()
            .set_producer_property(mill(), status(), PropertyValue::from("busy"))
            .unwrap();
    })
    .unwrap();
    sim.execute();
    let store = sim.materials();
    assert_eq!(store.time(), 2.0);
    assert_eq!(store.producer_property_time(&mill(), &status()), Ok(2.0));
    assert_eq!(store.producer_property_time(&forge(), &status()), Ok(0.0));
    assert_eq!(
        store.producer_property_value(&forge(), &status()),
        Ok(PropertyValue::from("idle"))
    );
}

// ===========================================================================
// Identifiers
// ===========================================================================

#[test]
fn duplicate_registrations_rejected() {
    let mut store = standard_store();
    assert_eq!(
        store.add_material_id(steel()),
        Err(MaterialsError::DuplicateMaterialId(steel()))
    );
    assert_eq!(
        store.add_materials_producer(ProducerConstruction::new(mill())),
        Err(MaterialsError::DuplicateProducerId(mill()))
    );
    assert_eq!(
        store.define_batch_property(
            steel(),
            grade(),
            PropertyDefinition::builder(PropertyType::Integer)
                .default_value(0_i64)
                .build()
                .unwrap(),
            BTreeMap::new(),
        ),
        Err(MaterialsError::DuplicateBatchPropertyDefinition {
            material: steel(),
            property: grade()
        })
    );
}

#[test]
fn queries_by_material() {
    let mut store = standard_store();
    let s1 = add_batch(&mut store, mill(), steel(), 1.0);
    let o1 = add_batch(&mut store, mill(), ore(), 1.0);
    let s2 = add_batch(&mut store, mill(), steel(), 1.0);
    let stage = store.add_stage(mill()).unwrap();
    store.move_batch_to_stage(s2, stage).unwrap();
    store.move_batch_to_stage(o1, stage).unwrap();

    assert_eq!(
        store.inventory_batches_by_material(&mill(), &steel()).unwrap(),
        vec![s1]
    );
    assert_eq!(store.stage_batches_by_material(stage, &ore()).unwrap(), vec![o1]);
    assert_eq!(store.stage_batches(stage).unwrap(), vec![s2, o1]);
    assert_eq!(
        store.inventory_batches_by_material(&mill(), &MaterialId::new("gold")),
        Err(MaterialsError::UnknownMaterialId(MaterialId::new("gold")))
    );
    let ids: Vec<_> = store.batch_property_ids(&steel()).unwrap().cloned().collect();
    assert_eq!(ids, vec![grade()]);
}
