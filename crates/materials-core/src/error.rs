//! Error taxonomy shared by the state builder and the materials store.
//!
//! Every variant is raised while validating a command, before any state is
//! touched, so a failed command never leaves a partial effect behind.

use crate::id::*;
use crate::property::{PropertyError, PropertyType};

/// Errors raised by [`crate::state::MaterialsStateBuilder::build`] and by
/// every [`crate::manager::MaterialsDataManager`] command and query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MaterialsError {
    // -- Identity --
    #[error("unknown batch id {0}")]
    UnknownBatchId(BatchId),
    #[error("unknown stage id {0}")]
    UnknownStageId(StageId),
    #[error("unknown material id '{0}'")]
    UnknownMaterialId(MaterialId),
    #[error("unknown materials producer id '{0}'")]
    UnknownProducerId(MaterialsProducerId),
    #[error("unknown batch property '{property}' for material '{material}'")]
    UnknownBatchPropertyId {
        material: MaterialId,
        property: BatchPropertyId,
    },
    #[error("unknown producer property '{0}'")]
    UnknownProducerPropertyId(ProducerPropertyId),
    #[error("unknown resource id '{0}'")]
    UnknownResourceId(ResourceId),
    #[error("unknown region id '{0}'")]
    UnknownRegionId(RegionId),
    #[error("{0} is scheduled for removal")]
    BatchPendingRemoval(BatchId),
    #[error("{0} is scheduled for removal")]
    StagePendingRemoval(StageId),

    // -- Structural --
    #[error("{0} is already on a stage")]
    BatchAlreadyStaged(BatchId),
    #[error("{0} is not on a stage")]
    BatchNotStaged(BatchId),
    #[error("{batch} and {stage} belong to different producers")]
    BatchStagedToDifferentOwner { batch: BatchId, stage: StageId },
    #[error("{0} is offered and cannot be altered")]
    OfferedStageUnalterable(StageId),
    #[error("{0} is not offered and cannot be transferred")]
    UnofferedStageNotTransferable(StageId),
    #[error("cannot shift material from {0} to itself")]
    ReflexiveBatchShift(BatchId),
    #[error("{0} already belongs to the destination producer")]
    ReflexiveStageTransfer(StageId),
    #[error("material mismatch: expected '{expected}', found '{actual}'")]
    MaterialTypeMismatch {
        expected: MaterialId,
        actual: MaterialId,
    },
    #[error(
        "cannot shift material between {source_batch} and {destination_batch}: different owners"
    )]
    BatchShiftOwnerMismatch {
        source_batch: BatchId,
        destination_batch: BatchId,
    },
    #[error("duplicate material id '{0}'")]
    DuplicateMaterialId(MaterialId),
    #[error("duplicate materials producer id '{0}'")]
    DuplicateProducerId(MaterialsProducerId),
    #[error("duplicate resource id '{0}'")]
    DuplicateResourceId(ResourceId),
    #[error("duplicate batch property '{property}' for material '{material}'")]
    DuplicateBatchPropertyDefinition {
        material: MaterialId,
        property: BatchPropertyId,
    },
    #[error("duplicate producer property '{0}'")]
    DuplicateProducerPropertyDefinition(ProducerPropertyId),
    #[error("{batch} is listed on both {first} and {second}")]
    BatchOnMultipleStages {
        batch: BatchId,
        first: StageId,
        second: StageId,
    },

    // -- Numeric --
    #[error("material amount {0} is not finite")]
    NonFiniteMaterialAmount(f64),
    #[error("material amount {0} is negative")]
    NegativeMaterialAmount(f64),
    #[error("material arithmetic overflow")]
    MaterialArithmeticOverflow,
    #[error("resource amount {0} is negative")]
    NegativeResourceAmount(i64),
    #[error("resource arithmetic overflow")]
    ResourceArithmeticOverflow,
    #[error("insufficient material: requested {requested}, available {available}")]
    InsufficientMaterialAvailable { requested: f64, available: f64 },
    #[error("insufficient resources: requested {requested}, available {available}")]
    InsufficientResourcesAvailable { requested: i64, available: i64 },

    // -- Property --
    #[error("value for property '{property}' is not of type {expected}")]
    IncompatibleValue {
        property: String,
        expected: PropertyType,
    },
    #[error("property '{0}' is immutable")]
    ImmutablePropertyAssignment(String),
    #[error("no value supplied for property '{0}', which has no default")]
    InsufficientPropertyValueAssignment(String),
    #[error(transparent)]
    Property(#[from] PropertyError),

    // -- Counter --
    #[error("negative batch id counter {0}")]
    NegativeBatchIdCounter(i64),
    #[error("negative stage id counter {0}")]
    NegativeStageIdCounter(i64),
    #[error("batch id counter exhausted")]
    BatchIdCounterExhausted,
    #[error("stage id counter exhausted")]
    StageIdCounterExhausted,
}

/// Validate a material amount: finite and non-negative.
pub(crate) fn check_material_amount(amount: f64) -> Result<(), MaterialsError> {
    if !amount.is_finite() {
        return Err(MaterialsError::NonFiniteMaterialAmount(amount));
    }
    if amount < 0.0 {
        return Err(MaterialsError::NegativeMaterialAmount(amount));
    }
    Ok(())
}

/// Validate a resource amount: non-negative.
pub(crate) fn check_resource_amount(amount: i64) -> Result<(), MaterialsError> {
    if amount < 0 {
        return Err(MaterialsError::NegativeResourceAmount(amount));
    }
    Ok(())
}
