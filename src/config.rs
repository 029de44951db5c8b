//! Constants and construction parameters of the virtual memory model

use crate::error::VmemError;
use crate::mm::lg2;

pub const PAGE_SIZE: u64 = 0x1000;
pub const PAGE_SIZE_BITS: u32 = 0xc;

/// size of one page table entry in bytes
pub const PTE_BYTES: u64 = 8;

/// reserve 1MB or one page of space at the bottom of physical memory
pub const VMEM_RESERVE_CAPACITY: u64 = if PAGE_SIZE > (1 << 20) {
    PAGE_SIZE
} else {
    1 << 20
};

/// page table pages must be strictly larger than this
pub const MIN_PTE_PAGE_SIZE: u64 = 1024;

/// allocation records are only reclaimed once the clock is past this cycle
pub const RECLAIM_CYCLE_THRESHOLD: u64 = 10_000_000;

pub const DEFAULT_MINOR_FAULT_PENALTY: u64 = 200;
pub const DEFAULT_PT_LEVELS: usize = 4;

/// Parameters of a [`VirtualMemory`](crate::mm::VirtualMemory) instance.
///
/// `virtual_seed` of zero keeps the free frames in address order, any other
/// value shuffles them deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmemConfig {
    /// size of a page table page in bytes
    pub pte_page_size: u64,
    /// number of page table levels
    pub pt_levels: usize,
    /// cycles charged for the first touch of a page
    pub minor_fault_penalty: u64,
    pub virtual_seed: u64,
    pub reclaim_threshold: u64,
    /// refill the free frames (aliasing old mappings) when nothing else is left
    pub repopulate_on_exhaustion: bool,
}

impl Default for VmemConfig {
    fn default() -> Self {
        Self {
            pte_page_size: PAGE_SIZE,
            pt_levels: DEFAULT_PT_LEVELS,
            minor_fault_penalty: DEFAULT_MINOR_FAULT_PENALTY,
            virtual_seed: 0,
            reclaim_threshold: RECLAIM_CYCLE_THRESHOLD,
            repopulate_on_exhaustion: true,
        }
    }
}

impl VmemConfig {
    pub fn with_pte_page_size(mut self, pte_page_size: u64) -> Self {
        self.pte_page_size = pte_page_size;
        self
    }

    pub fn with_pt_levels(mut self, pt_levels: usize) -> Self {
        self.pt_levels = pt_levels;
        self
    }

    pub fn with_minor_fault_penalty(mut self, penalty: u64) -> Self {
        self.minor_fault_penalty = penalty;
        self
    }

    pub fn with_virtual_seed(mut self, seed: u64) -> Self {
        self.virtual_seed = seed;
        self
    }

    pub fn with_reclaim_threshold(mut self, threshold: u64) -> Self {
        self.reclaim_threshold = threshold;
        self
    }

    pub fn with_repopulate_on_exhaustion(mut self, enabled: bool) -> Self {
        self.repopulate_on_exhaustion = enabled;
        self
    }

    /// number of index bits a single page table page resolves
    pub fn fanout_bits(&self) -> u32 {
        lg2(self.pte_page_size / PTE_BYTES)
    }

    /// Bits needed to address the whole virtual space the table can map.
    pub fn required_bits(&self) -> u64 {
        let levels = u64::try_from(self.pt_levels).unwrap_or(u64::MAX);
        u64::from(self.fanout_bits())
            .saturating_mul(levels)
            .saturating_add(u64::from(PAGE_SIZE_BITS))
    }

    /// Check the fatal configuration errors. Non-fatal findings are logged
    /// by the engine at construction time.
    pub fn validate(&self) -> Result<(), VmemError> {
        if self.pte_page_size <= MIN_PTE_PAGE_SIZE {
            return Err(VmemError::PtePageTooSmall {
                size: self.pte_page_size,
            });
        }
        if !self.pte_page_size.is_power_of_two() {
            return Err(VmemError::PtePageNotPowerOfTwo {
                size: self.pte_page_size,
            });
        }
        if self.pt_levels == 0 {
            return Err(VmemError::NoPageTableLevels);
        }
        // anything at or beyond the word width wraps, which only warrants a warning
        let bits = self.required_bits();
        if bits < u64::from(u64::BITS) && (1u64 << bits) <= VMEM_RESERVE_CAPACITY {
            return Err(VmemError::AddressSpaceTooSmall { bits });
        }
        Ok(())
    }
}
