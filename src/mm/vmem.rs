use std::collections::HashMap;

use log::{debug, info, trace, warn};

use crate::config::{VmemConfig, PAGE_SIZE, PAGE_SIZE_BITS, VMEM_RESERVE_CAPACITY};
use crate::device::MemoryDevice;
use crate::error::VmemError;

use super::frame_allocator::{AllocRecord, FrameAllocator};
use super::page_table::PageTable;
use super::{lg2, splice_bits, CpuId, PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};

/// Translation engine
///
/// Owns the virtual to physical map of every CPU, the page table model and
/// the frame allocator behind both. A page is mapped on its first touch and
/// stays mapped; only that first touch is charged the minor fault penalty.
pub struct VirtualMemory<D: MemoryDevice> {
    config: VmemConfig,
    device: D,
    pmem_size: u64,
    allocator: FrameAllocator,
    vpage_to_ppage: HashMap<(CpuId, VirtPageNum), PhysPageNum>,
    page_table: PageTable,
}

impl<D: MemoryDevice> VirtualMemory<D> {
    pub fn new(config: VmemConfig, device: D) -> Result<Self, VmemError> {
        config.validate()?;

        let pmem_size = device.size();
        let first_frame = PhysPageNum(VMEM_RESERVE_CAPACITY / PAGE_SIZE);
        let last_frame = PhysPageNum(pmem_size / PAGE_SIZE);
        if last_frame <= first_frame {
            return Err(VmemError::CapacityTooSmall {
                capacity: pmem_size,
            });
        }

        let required_bits = config.required_bits();
        if required_bits > u64::from(u64::BITS) {
            warn!(
                "virtual memory configuration would require {} bits of addressing",
                required_bits
            );
        }
        if required_bits > u64::from(lg2(pmem_size)) {
            warn!("physical memory size is smaller than virtual memory size; virtual address space will be aliased");
        }

        let mut allocator = FrameAllocator::new(first_frame, last_frame, config.virtual_seed);
        allocator.set_reclaim_threshold(config.reclaim_threshold);
        info!(
            "virtual memory: {} levels of {}-byte table pages, {} frames {:?}..{:?}, penalty {}",
            config.pt_levels,
            config.pte_page_size,
            allocator.total_frames(),
            first_frame,
            last_frame,
            config.minor_fault_penalty
        );

        Ok(Self {
            page_table: PageTable::new(config.pte_page_size, config.pt_levels),
            config,
            device,
            pmem_size,
            allocator,
            vpage_to_ppage: HashMap::new(),
        })
    }

    pub fn config(&self) -> &VmemConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn pmem_size(&self) -> u64 {
        self.pmem_size
    }

    pub fn frame_allocator(&self) -> &FrameAllocator {
        &self.allocator
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn shamt(&self, level: usize) -> Result<u32, VmemError> {
        self.page_table
            .shamt(level)
            .ok_or_else(|| self.level_out_of_range(level))
    }

    pub fn get_offset(&self, vaddr: VirtAddr, level: usize) -> Result<u64, VmemError> {
        self.page_table
            .get_offset(vaddr, level)
            .ok_or_else(|| self.level_out_of_range(level))
    }

    /// number of free frames left
    pub fn available_ppages(&self) -> usize {
        self.allocator.available()
    }

    /// number of `(cpu, page)` pairs currently mapped
    pub fn mapped_pages(&self) -> usize {
        self.vpage_to_ppage.len()
    }

    /// Translate `vaddr` for `cpu`, mapping its page on first touch.
    ///
    /// Returns the physical address and the fault penalty in cycles, which is
    /// zero unless this call created the mapping.
    pub fn translate(
        &mut self,
        cpu: CpuId,
        vaddr: VirtAddr,
    ) -> Result<(PhysAddr, u64), VmemError> {
        let key = (cpu, vaddr.floor());
        let (ppage, fault) = match self.vpage_to_ppage.get(&key) {
            Some(ppage) => (*ppage, false),
            None => {
                let ppage = self
                    .grant(|allocator, cycle| allocator.allocate(cycle, vaddr))?
                    .floor();
                self.vpage_to_ppage.insert(key, ppage);
                debug!(
                    "cpu {} {:?} -> {:?} at cycle {}",
                    cpu,
                    key.1,
                    ppage,
                    self.device.current_cycle()
                );
                (ppage, true)
            }
        };

        let paddr = PhysAddr(splice_bits(PhysAddr::from(ppage).0, vaddr.0, PAGE_SIZE_BITS));
        trace!(
            "[VMEM] translate paddr: {:?} vaddr: {:?} fault: {}",
            paddr,
            vaddr,
            fault
        );
        Ok((paddr, self.penalty(fault)))
    }

    /// Physical address of the level `level` page table entry for `vaddr`,
    /// placing the entry in table storage on first touch.
    pub fn walk_level(
        &mut self,
        cpu: CpuId,
        vaddr: VirtAddr,
        level: usize,
    ) -> Result<(PhysAddr, u64), VmemError> {
        let key = self
            .page_table
            .key(cpu, vaddr, level)
            .ok_or_else(|| self.level_out_of_range(level))?;
        let (host, fault) = match self.page_table.find_pte(&key) {
            Some(host) => (host, false),
            None => {
                if self.page_table.cursor().is_none() {
                    let frames = self.page_table.frames_per_page();
                    let page = self.grant(|allocator, cycle| {
                        allocator.allocate_table_page(cycle, frames)
                    })?;
                    self.page_table.set_cursor(page);
                }
                let (host, crossed) = self
                    .page_table
                    .insert_at_cursor(key)
                    .ok_or(VmemError::OutOfFrames)?;
                if crossed {
                    self.refill_table_cursor(host);
                }
                (host, true)
            }
        };

        let paddr = self
            .page_table
            .pte_pa(host, vaddr, level)
            .ok_or_else(|| self.level_out_of_range(level))?;
        trace!(
            "[VMEM] walk_level paddr: {:?} vaddr: {:?} pt_page_offset: {} translation_level: {} fault: {}",
            paddr,
            vaddr,
            self.page_table.get_offset(vaddr, level).unwrap_or(0),
            level,
            fault
        );
        Ok((paddr, self.penalty(fault)))
    }

    /// Refill the frame allocator with every frame above the reserved region.
    ///
    /// Existing mappings are kept, so pages mapped before the refill alias
    /// the frames granted after it.
    pub fn repopulate_free_pages(&mut self) {
        warn!(
            "physical memory exhausted, recycling {} frames; earlier mappings will alias",
            self.allocator.total_frames()
        );
        self.allocator.repopulate();
        self.page_table.reset_cursor();
    }

    fn level_out_of_range(&self, level: usize) -> VmemError {
        VmemError::LevelOutOfRange {
            level,
            levels: self.page_table.levels(),
        }
    }

    fn penalty(&self, fault: bool) -> u64 {
        if fault {
            self.config.minor_fault_penalty
        } else {
            0
        }
    }

    /// Grab the next table page right away so the cursor is ready. The run
    /// holding `host`, which just took an entry, is never evicted for it and
    /// the frame range is not recycled. On exhaustion the cursor stays empty
    /// and the next miss retries.
    fn refill_table_cursor(&mut self, host: PhysAddr) {
        let frames = self.page_table.frames_per_page();
        let granted = self.grant_sparing(Some(host.floor()), false, |allocator, cycle| {
            allocator.allocate_table_page(cycle, frames)
        });
        match granted {
            Ok(page) => {
                debug!("PTE page {:?} at cycle {}", page, self.device.current_cycle());
                self.page_table.set_cursor(page);
            }
            Err(err) => warn!("no frame for the next page table page: {}", err),
        }
    }

    /// Run an allocation request, evicting the least recently used record or
    /// recycling the whole frame range when the allocator runs dry.
    fn grant<F>(&mut self, request: F) -> Result<PhysAddr, VmemError>
    where
        F: Fn(&mut FrameAllocator, u64) -> Result<PhysAddr, VmemError>,
    {
        let recycle = self.config.repopulate_on_exhaustion;
        self.grant_sparing(None, recycle, request)
    }

    /// [`grant`](Self::grant) that never evicts the run holding `spare` and
    /// only recycles the frame range if `recycle` is set.
    fn grant_sparing<F>(
        &mut self,
        spare: Option<PhysPageNum>,
        recycle: bool,
        request: F,
    ) -> Result<PhysAddr, VmemError>
    where
        F: Fn(&mut FrameAllocator, u64) -> Result<PhysAddr, VmemError>,
    {
        let cycle = self.device.current_cycle();
        let mut repopulated = false;
        loop {
            match request(&mut self.allocator, cycle) {
                Err(VmemError::OutOfFrames) => {}
                granted => return granted,
            }
            if let Some(record) = self.allocator.reclaim_lru_sparing(cycle, spare) {
                self.unmap_run(&record);
                continue;
            }
            if recycle && !repopulated {
                self.repopulate_free_pages();
                repopulated = true;
                continue;
            }
            return Err(VmemError::OutOfFrames);
        }
    }

    /// Drop every mapping that points into an evicted run.
    fn unmap_run(&mut self, record: &AllocRecord) {
        let before = self.vpage_to_ppage.len();
        self.vpage_to_ppage.retain(|_, ppage| !record.contains(*ppage));
        self.page_table.purge(record);
        debug!(
            "evicted {} frames at {:?}, {} mappings dropped",
            record.size,
            record.start_frame,
            before - self.vpage_to_ppage.len()
        );
    }
}
