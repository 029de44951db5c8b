//! Errors reported by the virtual memory model

use thiserror::Error;

use crate::mm::{PhysPageNum, RecordId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmemError {
    #[error("page table page size {size} must be larger than 1024 bytes")]
    PtePageTooSmall { size: u64 },

    #[error("page table page size {size} is not a power of two")]
    PtePageNotPowerOfTwo { size: u64 },

    #[error("at least one page table level is required")]
    NoPageTableLevels,

    #[error("page table level {level} out of range 1..={levels}")]
    LevelOutOfRange { level: usize, levels: usize },

    #[error("{bits} bits of virtual addressing do not reach past the reserved region")]
    AddressSpaceTooSmall { bits: u64 },

    #[error("backing store of {capacity} bytes leaves no frames after the reserved region")]
    CapacityTooSmall { capacity: u64 },

    #[error("no free physical frames left")]
    OutOfFrames,

    #[error("no allocation ends right before {frame:?}")]
    NoMergeTarget { frame: PhysPageNum },

    #[error("no allocation record with id {id:?}")]
    UnknownRecord { id: RecordId },
}
