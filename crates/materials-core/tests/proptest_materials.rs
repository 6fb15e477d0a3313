//! Property-based tests for the materials store.
//!
//! Uses proptest to generate random command sequences, then verifies that
//! ownership, conservation and export invariants hold whatever the mix of
//! successes and rejections.

use materials_core::id::*;
use materials_core::manager::MaterialsDataManager;
use materials_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum Op {
    AddBatch { forge: bool, steel: bool, amount: u16 },
    AddStage { forge: bool },
    Stage { batch: u8, stage: u8 },
    Unstage { batch: u8 },
    Offer { stage: u8, offered: bool },
    Transfer { from: u8, to: u8, amount: u16 },
    TransferStage { stage: u8 },
    RemoveBatch { batch: u8 },
    RemoveStage { stage: u8, destroy: bool },
    ConvertToResource { stage: u8, amount: u16 },
    EndActivation,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<bool>(), any::<bool>(), 0..64u16)
            .prop_map(|(forge, steel, amount)| Op::AddBatch { forge, steel, amount }),
        2 => any::<bool>().prop_map(|forge| Op::AddStage { forge }),
        3 => (0..16u8, 0..8u8).prop_map(|(batch, stage)| Op::Stage { batch, stage }),
        1 => (0..16u8).prop_map(|batch| Op::Unstage { batch }),
        2 => (0..8u8, any::<bool>()).prop_map(|(stage, offered)| Op::Offer { stage, offered }),
        3 => (0..16u8, 0..16u8, 0..80u16)
            .prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
        1 => (0..8u8).prop_map(|stage| Op::TransferStage { stage }),
        1 => (0..16u8).prop_map(|batch| Op::RemoveBatch { batch }),
        1 => (0..8u8, any::<bool>())
            .prop_map(|(stage, destroy)| Op::RemoveStage { stage, destroy }),
        1 => (0..8u8, 0..100u16)
            .prop_map(|(stage, amount)| Op::ConvertToResource { stage, amount }),
        1 => Just(Op::EndActivation),
    ]
}

fn producer(forge_side: bool) -> MaterialsProducerId {
    if forge_side { forge() } else { mill() }
}

/// Apply an op, ignoring rejections. Amounts are quarter units so that
/// every sum stays exact in binary floating point.
fn apply(store: &mut MaterialsDataManager, op: &Op) {
    let _ = match *op {
        Op::AddBatch { forge, steel: is_steel, amount } => {
            let material = if is_steel { steel() } else { ore() };
            store
                .add_batch(materials_core::manager::BatchConstruction::new(
                    producer(forge),
                    material,
                    f64::from(amount) / 4.0,
                ))
                .map(|_| ())
        }
        Op::AddStage { forge } => store.add_stage(producer(forge)).map(|_| ()),
        Op::Stage { batch, stage } => {
            store.move_batch_to_stage(BatchId(batch.into()), StageId(stage.into()))
        }
        Op::Unstage { batch } => store.move_batch_to_inventory(BatchId(batch.into())),
        Op::Offer { stage, offered } => store.set_stage_offer(StageId(stage.into()), offered),
        Op::Transfer { from, to, amount } => store.transfer_material(
            BatchId(from.into()),
            BatchId(to.into()),
            f64::from(amount) / 4.0,
        ),
        Op::TransferStage { stage } => {
            let stage = StageId(stage.into());
            match store.stage_producer(stage).cloned() {
                Ok(owner) => store.transfer_offered_stage(stage, producer(owner == mill())),
                Err(e) => Err(e),
            }
        }
        Op::RemoveBatch { batch } => store.remove_batch(BatchId(batch.into())),
        Op::RemoveStage { stage, destroy } => store.remove_stage(StageId(stage.into()), destroy),
        Op::ConvertToResource { stage, amount } => {
            store.convert_stage_to_resource(StageId(stage.into()), fuel(), amount.into())
        }
        Op::EndActivation => {
            store.end_activation();
            Ok(())
        }
    };
}

fn live_batches(store: &MaterialsDataManager) -> Vec<BatchId> {
    (0..64)
        .map(BatchId)
        .filter(|b| store.batch_exists(*b) && store.is_batch_pending_removal(*b) == Ok(false))
        .collect()
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Every batch is either in its owner's inventory or on exactly one of
    /// its owner's stages.
    #[test]
    fn batch_placement_is_consistent(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut store = standard_store();
        for op in &ops {
            apply(&mut store, op);
        }
        for batch in (0..64).map(BatchId).filter(|b| store.batch_exists(*b)) {
            let owner = store.batch_producer(batch).unwrap().clone();
            match store.batch_stage(batch).unwrap() {
                Some(stage) => {
                    prop_assert_eq!(store.stage_producer(stage).unwrap(), &owner);
                    prop_assert!(store.stage_batches(stage).unwrap().contains(&batch));
                    prop_assert!(!store.inventory_batches(&owner).unwrap().contains(&batch));
                }
                None => {
                    prop_assert!(store.inventory_batches(&owner).unwrap().contains(&batch));
                }
            }
        }
    }

    /// Material transfers never change the total of a material held by a
    /// producer.
    #[test]
    fn transfers_conserve_material(
        amounts in proptest::collection::vec(0..64u16, 2..6),
        transfers in proptest::collection::vec((0..6u8, 0..6u8, 0..80u16), 0..30),
    ) {
        let mut store = standard_store();
        for amount in &amounts {
            add_batch(&mut store, mill(), steel(), f64::from(*amount) / 4.0);
        }
        let total: f64 = amounts.iter().map(|a| f64::from(*a) / 4.0).sum();
        for (from, to, amount) in transfers {
            let _ = store.transfer_material(
                BatchId(from.into()),
                BatchId(to.into()),
                f64::from(amount) / 4.0,
            );
        }
        let after: f64 = store
            .inventory_batches(&mill())
            .unwrap()
            .iter()
            .map(|b| store.batch_amount(*b).unwrap())
            .sum();
        prop_assert_eq!(after, total);
        for batch in store.inventory_batches(&mill()).unwrap() {
            prop_assert!(store.batch_amount(batch).unwrap() >= 0.0);
        }
    }

    /// Exporting, rebuilding and exporting again yields the same state.
    #[test]
    fn export_round_trip(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut store = standard_store();
        for op in &ops {
            apply(&mut store, op);
        }
        let first = store.to_state().unwrap();
        let rebuilt = MaterialsDataManager::new(&first, Box::new(standard_resources())).unwrap();
        prop_assert_eq!(rebuilt.to_state().unwrap(), first.clone());
        prop_assert_eq!(live_batches(&rebuilt).len(), first.batches().len());
    }

    /// Ledger balances never go negative.
    #[test]
    fn ledgers_stay_non_negative(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut store = standard_store();
        for op in &ops {
            apply(&mut store, op);
        }
        for producer in [mill(), forge()] {
            prop_assert!(store.producer_resource_level(&producer, &fuel()).unwrap() >= 0);
        }
    }
}
