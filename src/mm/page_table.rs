use std::collections::HashMap;

use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS, PTE_BYTES};

use super::frame_allocator::AllocRecord;
use super::{bitmask, lg2, splice_bits, CpuId, PhysAddr, VirtAddr};

/// `(cpu, vaddr >> shamt(level), level)`
pub type PteKey = (CpuId, u64, usize);

/// Page table model
///
/// Only tracks where each page table entry lives in physical memory. Entries
/// are packed into table pages of `pte_page_size` bytes, handed out from a
/// cursor that moves one table page at a time through frames granted by the
/// frame allocator.
#[derive(Debug)]
pub struct PageTable {
    pte_page_size: u64,
    levels: usize,
    /// physical table page holding the entry for a key
    entries: HashMap<PteKey, PhysAddr>,
    /// where the next table page goes, `None` until a frame is granted
    next_pte_page: Option<PhysAddr>,
}

impl PageTable {
    pub fn new(pte_page_size: u64, levels: usize) -> Self {
        Self {
            pte_page_size,
            levels,
            entries: HashMap::new(),
            next_pte_page: None,
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    fn fanout_bits(&self) -> u32 {
        lg2(self.pte_page_size / PTE_BYTES)
    }

    /// number of frames backing one table page
    pub fn frames_per_page(&self) -> u64 {
        (self.pte_page_size / PAGE_SIZE).max(1)
    }

    /// Shift selecting the index bits of `level`, counting from 1 at the leaf.
    /// `None` outside `1..=levels`; shifts past the word width saturate.
    pub fn shamt(&self, level: usize) -> Option<u32> {
        if level == 0 || level > self.levels {
            return None;
        }
        let shift = u32::try_from(level - 1)
            .ok()
            .and_then(|above_leaf| self.fanout_bits().checked_mul(above_leaf))
            .and_then(|bits| bits.checked_add(PAGE_SIZE_BITS))
            .unwrap_or(u32::MAX);
        Some(shift)
    }

    /// index of `vaddr`'s entry within its table page at `level`
    pub fn get_offset(&self, vaddr: VirtAddr, level: usize) -> Option<u64> {
        let shift = self.shamt(level)?;
        Some(vaddr.0.checked_shr(shift).unwrap_or(0) & bitmask(self.fanout_bits()))
    }

    pub fn key(&self, cpu: CpuId, vaddr: VirtAddr, level: usize) -> Option<PteKey> {
        let shift = self.shamt(level)?;
        Some((cpu, vaddr.0.checked_shr(shift).unwrap_or(0), level))
    }

    pub fn find_pte(&self, key: &PteKey) -> Option<PhysAddr> {
        self.entries.get(key).copied()
    }

    pub fn cursor(&self) -> Option<PhysAddr> {
        self.next_pte_page
    }

    pub fn set_cursor(&mut self, page: PhysAddr) {
        self.next_pte_page = Some(page);
    }

    pub fn reset_cursor(&mut self) {
        self.next_pte_page = None;
    }

    /// Place `key` at the cursor and advance it by one table page.
    ///
    /// Returns the hosting table page and whether the cursor ran off the end
    /// of its frames, in which case it is cleared and fresh frames are needed.
    /// The cursor must be set.
    pub fn insert_at_cursor(&mut self, key: PteKey) -> Option<(PhysAddr, bool)> {
        let host = self.next_pte_page?;
        self.entries.insert(key, host);
        let next = host.0 + self.pte_page_size;
        let crossed = next % PAGE_SIZE == 0;
        self.next_pte_page = if crossed { None } else { Some(PhysAddr(next)) };
        Some((host, crossed))
    }

    /// Physical address of the entry for `vaddr` inside table page `host`.
    /// `host` must be aligned to the table page size.
    pub fn pte_pa(&self, host: PhysAddr, vaddr: VirtAddr, level: usize) -> Option<PhysAddr> {
        let offset = self.get_offset(vaddr, level)?;
        Some(PhysAddr(splice_bits(
            host.0,
            offset * PTE_BYTES,
            lg2(self.pte_page_size),
        )))
    }

    /// Forget every entry stored in the frames of `record`.
    pub fn purge(&mut self, record: &AllocRecord) {
        self.entries.retain(|_, host| !record.contains(host.floor()));
        if let Some(cursor) = self.next_pte_page {
            if record.contains(cursor.floor()) {
                self.next_pte_page = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
