//! Materials Core -- the materials-management core of a discrete-event
//! simulation.
//!
//! Materials producers own batches of typed material. Batches sit either in
//! their producer's inventory or on a stage; an offered stage is frozen and
//! may be handed to another producer, and any unoffered stage can be
//! converted into a new batch or into a resource credit. Producers carry
//! typed properties and per-resource ledgers that feed region-side ledgers.
//!
//! # Command Contract
//!
//! Every store command validates all of its preconditions, then mutates,
//! then publishes its events, in that order. A failed command has no effect
//! and publishes nothing. Every subscriber has run before the command
//! returns. Handlers may issue further commands, which deliver their own
//! events before returning.
//!
//! ```rust,ignore
//! let mut store = MaterialsDataManager::new(&state, Box::new(resources))?;
//! let batch = store.add_batch(BatchConstruction::new(mill, steel, 10.0))?;
//! let stage = store.add_stage(mill.clone())?;
//! store.move_batch_to_stage(batch, stage)?;
//! store.set_stage_offer(stage, true)?;
//! store.transfer_offered_stage(stage, forge)?;
//! ```
//!
//! # Key Types
//!
//! - [`manager::MaterialsDataManager`] -- The live store: commands, queries,
//!   deferred removal and export.
//! - [`state::MaterialsState`] -- Validated, immutable checkpoint used to
//!   construct a store and produced when it halts.
//! - [`event::MaterialsEvent`] -- Change notifications with
//!   [`event::EventFilter`] subscriptions.
//! - [`sim::Simulation`] -- Time-ordered plan scheduler that owns the store
//!   and reaps removed entities between activations.
//! - [`resources::Resources`] -- Interface to the resources subsystem.
//! - [`serialize`] -- Versioned binary checkpoints via bitcode.

pub mod error;
pub mod event;
pub mod id;
pub mod manager;
pub mod property;
pub mod resources;
pub mod serialize;
pub mod sim;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
