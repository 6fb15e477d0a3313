//! Binary checkpoints of [`MaterialsState`].
//!
//! Snapshots are `bitcode`-encoded with a versioned header. Decoding
//! re-validates the payload through [`crate::state::MaterialsStateBuilder`],
//! so a corrupted or hand-edited snapshot can never produce an invalid
//! state.

use crate::error::MaterialsError;
use crate::state::MaterialsState;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a materials snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x4D41_5401;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("snapshot holds an invalid state: {0}")]
    Invalid(#[from] MaterialsError),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Simulation time at which the state was exported.
    pub time: f64,
}

impl SnapshotHeader {
    pub fn new(time: f64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            time,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateSnapshot {
    header: SnapshotHeader,
    state: MaterialsState,
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Encode a state exported at `time`.
pub fn encode_state(state: &MaterialsState, time: f64) -> Result<Vec<u8>, SerializeError> {
    let snapshot = StateSnapshot {
        header: SnapshotHeader::new(time),
        state: state.clone(),
    };
    bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
}

/// Decode a snapshot, returning its header and the re-validated state.
pub fn decode_state(data: &[u8]) -> Result<(SnapshotHeader, MaterialsState), DeserializeError> {
    let snapshot: StateSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    snapshot.header.validate()?;
    let state = snapshot.state.clone_builder().build()?;
    Ok((snapshot.header, state))
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// Deterministic FNV-1a hash for comparing states across runs.
/// Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn finish(self) -> u64 {
        self.0
    }

    /// Hash the canonical encoding of a state.
    pub fn of_state(state: &MaterialsState) -> Result<u64, SerializeError> {
        let bytes = bitcode::serialize(state).map_err(|e| SerializeError::Encode(e.to_string()))?;
        let mut hash = Self::new();
        hash.write(&bytes);
        Ok(hash.finish())
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::*;

    fn sample_state() -> MaterialsState {
        let mut builder = MaterialsState::builder();
        builder
            .add_material(MaterialId::new("ore"))
            .add_producer(MaterialsProducerId::new("mine"))
            .add_batch(
                BatchId(0),
                MaterialId::new("ore"),
                12.5,
                MaterialsProducerId::new("mine"),
            )
            .add_stage(StageId(0), false, MaterialsProducerId::new("mine"))
            .add_batch_to_stage(StageId(0), BatchId(0));
        builder.build().unwrap()
    }

    #[test]
    fn snapshot_round_trip() {
        let state = sample_state();
        let bytes = encode_state(&state, 3.0).unwrap();
        let (header, decoded) = decode_state(&bytes).unwrap();
        assert_eq!(header, SnapshotHeader::new(3.0));
        assert_eq!(decoded, state);
    }

    #[test]
    fn header_validation() {
        let mut header = SnapshotHeader::new(0.0);
        assert!(header.validate().is_ok());
        header.magic = 0xDEAD_BEEF;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));
        let mut header = SnapshotHeader::new(0.0);
        header.version = FORMAT_VERSION + 1;
        assert!(matches!(header.validate(), Err(DeserializeError::FutureVersion(_))));
        header.version = 0;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_state(&[1, 2, 3]),
            Err(DeserializeError::Decode(_))
        ));
    }

    #[test]
    fn hash_is_stable_and_discriminating() {
        let state = sample_state();
        assert_eq!(StateHash::of_state(&state).unwrap(), StateHash::of_state(&state).unwrap());
        let mut builder = state.clone_builder();
        builder.add_material(MaterialId::new("slag"));
        let other = builder.build().unwrap();
        assert_ne!(StateHash::of_state(&state).unwrap(), StateHash::of_state(&other).unwrap());
    }
}
