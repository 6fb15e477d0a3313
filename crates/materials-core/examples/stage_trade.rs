//! Stage trade example: two producers, an offered stage changing hands, and
//! a checkpoint of the result.
//!
//! A mill stages two steel batches, offers the stage, and a forge takes it
//! over on a later plan. The forge converts the stage into fuel and the
//! simulation halts, exporting the final state.
//!
//! Run with: `cargo run -p materials-core --example stage_trade`

use std::cell::RefCell;
use std::rc::Rc;

use materials_core::event::{EventFilter, MaterialsEvent};
use materials_core::id::*;
use materials_core::manager::{BatchConstruction, MaterialsDataManager};
use materials_core::resources::RegionResources;
use materials_core::serialize::{decode_state, encode_state};
use materials_core::sim::Simulation;
use materials_core::state::MaterialsState;

fn main() {
    let steel = MaterialId::new("steel");
    let mill = MaterialsProducerId::new("mill");
    let forge = MaterialsProducerId::new("forge");
    let fuel = ResourceId::new("fuel");

    let mut builder = MaterialsState::builder();
    builder
        .add_material(steel.clone())
        .add_producer(mill.clone())
        .add_producer(forge.clone());
    let state = builder.build().unwrap();
    let resources = RegionResources::new().with_resource(fuel.clone());
    let mut store = MaterialsDataManager::new(&state, Box::new(resources)).unwrap();

    // --- Log every stage that arrives at the forge ---

    let arrivals = Rc::new(RefCell::new(Vec::new()));
    let sink = arrivals.clone();
    store.subscribe(
        EventFilter::stage_producer_updated_to(forge.clone()),
        move |_, event| {
            if let MaterialsEvent::StageProducerUpdated { stage, previous, .. } = event {
                sink.borrow_mut().push((*stage, previous.clone()));
            }
        },
    );

    let mut sim = Simulation::new(store);

    // --- t=1: the mill stages and offers two batches ---

    let seller = mill.clone();
    let material = steel.clone();
    sim.add_plan(1.0, move |sim| {
        let store = sim.materials_mut();
        let stage = store.add_stage(seller.clone()).unwrap();
        for amount in [4.0, 6.0] {
            let batch = store
                .add_batch(BatchConstruction::new(seller.clone(), material.clone(), amount))
                .unwrap();
            store.move_batch_to_stage(batch, stage).unwrap();
        }
        store.set_stage_offer(stage, true).unwrap();
        println!("t=1: {stage} offered by {seller}");
    })
    .unwrap();

    // --- t=2: the forge takes the stage and burns it for fuel ---

    let buyer = forge.clone();
    let resource = fuel.clone();
    sim.add_plan(2.0, move |sim| {
        let store = sim.materials_mut();
        let stage = StageId(0);
        store.transfer_offered_stage(stage, buyer.clone()).unwrap();
        store.set_stage_offer(stage, false).unwrap();
        store.convert_stage_to_resource(stage, resource.clone(), 25).unwrap();
        println!(
            "t=2: {buyer} converted {stage}, fuel = {}",
            store.producer_resource_level(&buyer, &resource).unwrap()
        );
    })
    .unwrap();

    let result = sim.execute();
    println!(
        "ran {} activations, reaped {} entities",
        result.activations, result.reaped
    );
    for (stage, from) in arrivals.borrow().iter() {
        println!("forge received {stage} from {from}");
    }

    // --- Checkpoint ---

    let final_state = sim.halt().unwrap();
    let bytes = encode_state(&final_state, 2.0).unwrap();
    let (header, restored) = decode_state(&bytes).unwrap();
    println!(
        "checkpoint: {} bytes at t={}, {} batches, forge fuel {}",
        bytes.len(),
        header.time,
        restored.batches().len(),
        restored.resource_level(&forge, &fuel)
    );
}
