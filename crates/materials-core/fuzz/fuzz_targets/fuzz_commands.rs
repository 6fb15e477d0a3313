#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use materials_core::id::*;
use materials_core::manager::{BatchConstruction, MaterialsDataManager};
use materials_core::test_utils::*;

#[derive(Debug, Arbitrary)]
enum Command {
    AddBatch { forge: bool, amount: f64 },
    AddStage { forge: bool },
    Stage { batch: u8, stage: u8 },
    Unstage { batch: u8 },
    Offer { stage: u8, offered: bool },
    Transfer { from: u8, to: u8, amount: f64 },
    TransferStage { stage: u8, forge: bool },
    RemoveBatch { batch: u8 },
    RemoveStage { stage: u8, destroy: bool },
    ConvertToBatch { stage: u8, amount: f64 },
    ConvertToResource { stage: u8, amount: i64 },
    ToRegion { forge: bool, amount: i64 },
    EndActivation,
}

fn producer(forge_side: bool) -> MaterialsProducerId {
    if forge_side { forge() } else { mill() }
}

fn run(store: &mut MaterialsDataManager, command: &Command) {
    let _ = match *command {
        Command::AddBatch { forge, amount } => store
            .add_batch(BatchConstruction::new(producer(forge), steel(), amount))
            .map(|_| ()),
        Command::AddStage { forge } => store.add_stage(producer(forge)).map(|_| ()),
        Command::Stage { batch, stage } => {
            store.move_batch_to_stage(BatchId(batch.into()), StageId(stage.into()))
        }
        Command::Unstage { batch } => store.move_batch_to_inventory(BatchId(batch.into())),
        Command::Offer { stage, offered } => store.set_stage_offer(StageId(stage.into()), offered),
        Command::Transfer { from, to, amount } => {
            store.transfer_material(BatchId(from.into()), BatchId(to.into()), amount)
        }
        Command::TransferStage { stage, forge } => {
            store.transfer_offered_stage(StageId(stage.into()), producer(forge))
        }
        Command::RemoveBatch { batch } => store.remove_batch(BatchId(batch.into())),
        Command::RemoveStage { stage, destroy } => {
            store.remove_stage(StageId(stage.into()), destroy)
        }
        Command::ConvertToBatch { stage, amount } => store
            .convert_stage_to_batch(StageId(stage.into()), ore(), amount, Vec::new())
            .map(|_| ()),
        Command::ConvertToResource { stage, amount } => {
            store.convert_stage_to_resource(StageId(stage.into()), fuel(), amount)
        }
        Command::ToRegion { forge, amount } => {
            store.transfer_resource_to_region(producer(forge), fuel(), north(), amount)
        }
        Command::EndActivation => {
            store.end_activation();
            Ok(())
        }
    };
}

fuzz_target!(|commands: Vec<Command>| {
    let mut store = standard_store();
    for command in &commands {
        run(&mut store, command);
    }
    // Any reachable store exports a valid state that rebuilds identically.
    let state = store.to_state().expect("export");
    let rebuilt =
        MaterialsDataManager::new(&state, Box::new(standard_resources())).expect("rebuild");
    assert_eq!(rebuilt.to_state().expect("re-export"), state);
});
