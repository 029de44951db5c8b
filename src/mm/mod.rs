//! Memory management model
//!
//! [`VirtualMemory`] translates per-CPU virtual addresses, backed by a
//! [`FrameAllocator`] that owns every physical frame above the reserved region.

mod address;
mod frame_allocator;
mod free_list;
mod page_table;
mod vmem;

pub use address::{bitmask, lg2, splice_bits, PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
pub use frame_allocator::{AllocRecord, FrameAllocator, RecordId};
pub use free_list::{shuffle_frames, FreeFrames};
pub use page_table::{PageTable, PteKey};
pub use vmem::VirtualMemory;

/// identifies the simulated core issuing a memory reference
pub type CpuId = u32;
