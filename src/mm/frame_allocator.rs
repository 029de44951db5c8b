//! Physical frame allocator with coalescing of virtually contiguous requests
//!
//! Every frame of the configured range is either in the free inventory or in
//! exactly one allocation record's run. A request for the virtual page right
//! after an existing record's run tries to take the frame right after that
//! record's physical run, growing the record instead of creating a new one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use core::fmt::{self, Debug, Formatter};

use log::{debug, info};

use crate::config::RECLAIM_CYCLE_THRESHOLD;
use crate::error::VmemError;

use super::free_list::FreeFrames;
use super::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};

/// Identifies an allocation record. Ids grow with creation order.
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash)]
pub struct RecordId(u64);

impl Debug for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("REC:{}", self.0))
    }
}

/// A contiguous run of allocated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRecord {
    /// first frame of the run
    pub start_frame: PhysPageNum,
    /// number of frames in the run
    pub size: u64,
    /// virtual page the run was first requested for; `None` for page table storage
    pub start_page: Option<VirtPageNum>,
    /// cycle of the last grant or merge
    pub last_access: u64,
}

impl AllocRecord {
    /// the frame right after the run
    pub fn end_frame(&self) -> PhysPageNum {
        PhysPageNum(self.start_frame.0 + self.size)
    }

    /// the virtual page that would continue the run
    pub fn next_page(&self) -> Option<VirtPageNum> {
        self.start_page.map(|page| VirtPageNum(page.0 + self.size))
    }

    pub fn frames(&self) -> impl Iterator<Item = PhysPageNum> {
        (self.start_frame.0..self.end_frame().0).map(PhysPageNum)
    }

    pub fn contains(&self, frame: PhysPageNum) -> bool {
        self.start_frame <= frame && frame < self.end_frame()
    }
}

pub struct FrameAllocator {
    /// first frame handed out by this allocator
    start: PhysPageNum,
    /// one past the last frame
    end: PhysPageNum,
    seed: u64,
    reclaim_threshold: u64,
    free: FreeFrames,
    records: BTreeMap<RecordId, AllocRecord>,
    /// records keyed by the virtual page that would extend them
    by_next_page: HashMap<VirtPageNum, BTreeSet<RecordId>>,
    /// records keyed by the frame right after their run
    by_end_frame: HashMap<PhysPageNum, RecordId>,
    next_id: u64,
}

impl FrameAllocator {
    /// Manage the frames `[start, end)`, all initially free. A non-zero
    /// `seed` shuffles the order in which free frames are handed out.
    pub fn new(start: PhysPageNum, end: PhysPageNum, seed: u64) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            seed,
            reclaim_threshold: RECLAIM_CYCLE_THRESHOLD,
            free: FreeFrames::with_range(start, end, seed),
            records: BTreeMap::new(),
            by_next_page: HashMap::new(),
            by_end_frame: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn set_reclaim_threshold(&mut self, threshold: u64) {
        self.reclaim_threshold = threshold;
    }

    /// Take `pref_frame` if `try_match` is set and it is free, otherwise the
    /// oldest free frame.
    pub fn get_free_frame(
        &mut self,
        pref_frame: PhysPageNum,
        try_match: bool,
    ) -> Result<PhysPageNum, VmemError> {
        if try_match && self.free.take(pref_frame) {
            return Ok(pref_frame);
        }
        self.free.pop_front().ok_or(VmemError::OutOfFrames)
    }

    /// The frame that would keep a run contiguous if `page` were allocated
    /// next, taken from the earliest record that `page` continues.
    pub fn can_merge(&self, page: VirtPageNum) -> Option<PhysPageNum> {
        let id = self.by_next_page.get(&page)?.first()?;
        self.records.get(id).map(AllocRecord::end_frame)
    }

    /// Grow the record whose run ends right before `pref_frame` by one frame.
    /// The frame itself must already have been taken from the free inventory.
    pub fn merge(
        &mut self,
        pref_frame: PhysPageNum,
        cycle: u64,
    ) -> Result<RecordId, VmemError> {
        let id = *self
            .by_end_frame
            .get(&pref_frame)
            .ok_or(VmemError::NoMergeTarget { frame: pref_frame })?;
        let mut record = self
            .unindex(id)
            .ok_or(VmemError::NoMergeTarget { frame: pref_frame })?;
        record.size += 1;
        record.last_access = cycle;
        self.index(id, record);
        Ok(id)
    }

    /// Grant a frame for `vaddr`'s page and return its base address.
    pub fn allocate(&mut self, cycle: u64, vaddr: VirtAddr) -> Result<PhysAddr, VmemError> {
        let page = vaddr.floor();
        let frame = match self.can_merge(page) {
            Some(pref_frame) => {
                let frame = self.get_free_frame(pref_frame, true)?;
                if frame == pref_frame {
                    self.merge(pref_frame, cycle)?;
                } else {
                    self.push_record(frame, 1, Some(page), cycle);
                }
                frame
            }
            None => {
                let frame = self.get_free_frame(PhysPageNum::default(), false)?;
                self.push_record(frame, 1, Some(page), cycle);
                frame
            }
        };
        debug!("allocate {:?} -> {:?} at cycle {}", page, frame, cycle);
        Ok(frame.into())
    }

    /// Grant `frames` contiguous frames, aligned to their total size, that
    /// back one page table page. They never take part in merging.
    pub fn allocate_table_page(
        &mut self,
        cycle: u64,
        frames: u64,
    ) -> Result<PhysAddr, VmemError> {
        let start = if frames <= 1 {
            self.get_free_frame(PhysPageNum::default(), false)?
        } else {
            self.take_aligned_run(frames)?
        };
        self.push_record(start, frames.max(1), None, cycle);
        debug!(
            "allocate table page {:?} ({} frames) at cycle {}",
            start, frames, cycle
        );
        Ok(start.into())
    }

    /// First free run of `frames` frames whose start is a multiple of `frames`,
    /// in hand-out order of its first frame.
    fn take_aligned_run(&mut self, frames: u64) -> Result<PhysPageNum, VmemError> {
        let start = self
            .free
            .iter()
            .filter(|frame| frame.0 % frames == 0)
            .find(|frame| (1..frames).all(|i| self.free.contains(PhysPageNum(frame.0 + i))))
            .ok_or(VmemError::OutOfFrames)?;
        for i in 0..frames {
            self.free.take(PhysPageNum(start.0 + i));
        }
        Ok(start)
    }

    /// Return the record's frames to the free inventory once the clock is
    /// past the reclaim threshold. `Ok(None)` means it is too early.
    pub fn reclaim(
        &mut self,
        cycle: u64,
        id: RecordId,
    ) -> Result<Option<AllocRecord>, VmemError> {
        if !self.records.contains_key(&id) {
            return Err(VmemError::UnknownRecord { id });
        }
        if cycle <= self.reclaim_threshold {
            return Ok(None);
        }
        let record = self.unindex(id).ok_or(VmemError::UnknownRecord { id })?;
        for frame in record.frames() {
            self.free.push(frame);
        }
        info!(
            "reclaimed {} frames from {:?} (last access {}) at cycle {}",
            record.size, record.start_frame, record.last_access, cycle
        );
        Ok(Some(record))
    }

    /// Reclaim the record accessed longest ago, ties going to the oldest record.
    pub fn reclaim_lru(&mut self, cycle: u64) -> Option<AllocRecord> {
        self.reclaim_lru_sparing(cycle, None)
    }

    /// Like [`reclaim_lru`](Self::reclaim_lru), but never picks the record
    /// holding `spare`.
    pub fn reclaim_lru_sparing(
        &mut self,
        cycle: u64,
        spare: Option<PhysPageNum>,
    ) -> Option<AllocRecord> {
        if cycle <= self.reclaim_threshold {
            return None;
        }
        let id = self
            .records
            .iter()
            .filter(|(_, record)| spare.map_or(true, |frame| !record.contains(frame)))
            .min_by_key(|(id, record)| (record.last_access, **id))
            .map(|(id, _)| *id)?;
        self.reclaim(cycle, id).ok().flatten()
    }

    /// Drop every record and make the whole range free again.
    pub fn repopulate(&mut self) {
        self.records.clear();
        self.by_next_page.clear();
        self.by_end_frame.clear();
        self.free.populate(self.start, self.end, self.seed);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.end.0 - self.start.0
    }

    pub fn contains_free(&self, frame: PhysPageNum) -> bool {
        self.free.contains(frame)
    }

    /// free frames in hand-out order
    pub fn free_frames(&self) -> impl Iterator<Item = PhysPageNum> + '_ {
        self.free.iter()
    }

    /// records in creation order
    pub fn records(&self) -> impl Iterator<Item = (RecordId, &AllocRecord)> + '_ {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn record(&self, id: RecordId) -> Option<&AllocRecord> {
        self.records.get(&id)
    }

    fn push_record(
        &mut self,
        frame: PhysPageNum,
        size: u64,
        page: Option<VirtPageNum>,
        cycle: u64,
    ) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.index(
            id,
            AllocRecord {
                start_frame: frame,
                size,
                start_page: page,
                last_access: cycle,
            },
        );
        id
    }

    fn index(&mut self, id: RecordId, record: AllocRecord) {
        if let Some(next) = record.next_page() {
            self.by_next_page.entry(next).or_default().insert(id);
        }
        self.by_end_frame.insert(record.end_frame(), id);
        self.records.insert(id, record);
    }

    /// Remove a record from every index.
    fn unindex(&mut self, id: RecordId) -> Option<AllocRecord> {
        let record = self.records.remove(&id)?;
        if let Some(next) = record.next_page() {
            if let Some(ids) = self.by_next_page.get_mut(&next) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_next_page.remove(&next);
                }
            }
        }
        self.by_end_frame.remove(&record.end_frame());
        Some(record)
    }
}

impl Debug for FrameAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "FrameAllocator:[{:?}, {:?}) free={} records={}",
            self.start,
            self.end,
            self.free.len(),
            self.records.len()
        ))
    }
}
