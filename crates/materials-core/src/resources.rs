//! Interface to the resources subsystem, which owns the resource-id
//! namespace and the region-side ledgers.
//!
//! The materials store only needs a narrow slice of that subsystem: id
//! lookup and registration, region lookup, and a checked region credit used
//! by resource-to-region transfers. [`RegionResources`] is a plain
//! in-memory implementation suitable for scenarios and tests.

use crate::error::{MaterialsError, check_resource_amount};
use crate::id::{RegionId, ResourceId};
use std::collections::{BTreeMap, BTreeSet};

/// The resources collaborator consumed by the materials store.
pub trait Resources: std::fmt::Debug {
    fn resource_id_exists(&self, resource: &ResourceId) -> bool;

    /// All registered resource ids, in a stable order.
    fn resource_ids(&self) -> Vec<ResourceId>;

    /// Register a new resource id. Registering an existing id is an error.
    fn add_resource_id(&mut self, resource: ResourceId) -> Result<(), MaterialsError>;

    fn region_id_exists(&self, region: &RegionId) -> bool;

    /// Current level of a resource in a region.
    fn region_resource_level(
        &self,
        region: &RegionId,
        resource: &ResourceId,
    ) -> Result<i64, MaterialsError>;

    /// Add `amount` to a region's ledger. Must either apply fully or fail
    /// without effect.
    fn credit_region(
        &mut self,
        region: &RegionId,
        resource: &ResourceId,
        amount: i64,
    ) -> Result<(), MaterialsError>;
}

/// In-memory resources subsystem: resource ids, region ids and region
/// ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionResources {
    resource_ids: BTreeSet<ResourceId>,
    region_ids: BTreeSet<RegionId>,
    levels: BTreeMap<(RegionId, ResourceId), i64>,
}

impl RegionResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resource_ids.insert(resource);
        self
    }

    pub fn with_region(mut self, region: RegionId) -> Self {
        self.region_ids.insert(region);
        self
    }

    pub fn add_region_id(&mut self, region: RegionId) -> bool {
        self.region_ids.insert(region)
    }

    pub fn region_ids(&self) -> impl Iterator<Item = &RegionId> {
        self.region_ids.iter()
    }
}

impl Resources for RegionResources {
    fn resource_id_exists(&self, resource: &ResourceId) -> bool {
        self.resource_ids.contains(resource)
    }

    fn resource_ids(&self) -> Vec<ResourceId> {
        self.resource_ids.iter().cloned().collect()
    }

    fn add_resource_id(&mut self, resource: ResourceId) -> Result<(), MaterialsError> {
        if self.resource_ids.contains(&resource) {
            return Err(MaterialsError::DuplicateResourceId(resource));
        }
        self.resource_ids.insert(resource);
        Ok(())
    }

    fn region_id_exists(&self, region: &RegionId) -> bool {
        self.region_ids.contains(region)
    }

    fn region_resource_level(
        &self,
        region: &RegionId,
        resource: &ResourceId,
    ) -> Result<i64, MaterialsError> {
        if !self.region_ids.contains(region) {
            return Err(MaterialsError::UnknownRegionId(region.clone()));
        }
        if !self.resource_ids.contains(resource) {
            return Err(MaterialsError::UnknownResourceId(resource.clone()));
        }
        Ok(self
            .levels
            .get(&(region.clone(), resource.clone()))
            .copied()
            .unwrap_or(0))
    }

    fn credit_region(
        &mut self,
        region: &RegionId,
        resource: &ResourceId,
        amount: i64,
    ) -> Result<(), MaterialsError> {
        check_resource_amount(amount)?;
        let current = self.region_resource_level(region, resource)?;
        let updated = current
            .checked_add(amount)
            .ok_or(MaterialsError::ResourceArithmeticOverflow)?;
        self.levels
            .insert((region.clone(), resource.clone()), updated);
        Ok(())
    }
}
