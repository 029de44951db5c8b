//! Inventory of free physical frames
//!
//! Frames are handed out in insertion order. Removing a particular frame
//! leaves a stale slot behind in the queue; every slot carries the stamp it
//! was pushed with, and only the slot whose stamp matches `live` counts.

use std::collections::{HashMap, VecDeque};

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::PhysPageNum;

/// free frames, first in first out
#[derive(Debug, Default)]
pub struct FreeFrames {
    queue: VecDeque<(PhysPageNum, u64)>,
    live: HashMap<PhysPageNum, u64>,
    next_stamp: u64,
}

impl FreeFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// every frame of `[start, end)`, shuffled when `seed` is non-zero
    pub fn with_range(start: PhysPageNum, end: PhysPageNum, seed: u64) -> Self {
        let mut free = Self::new();
        free.populate(start, end, seed);
        free
    }

    /// Forget everything and refill with `[start, end)`.
    pub fn populate(&mut self, start: PhysPageNum, end: PhysPageNum, seed: u64) {
        let mut frames: Vec<PhysPageNum> = (start.0..end.0).map(PhysPageNum).collect();
        shuffle_frames(&mut frames, seed);
        self.queue.clear();
        self.live.clear();
        self.queue.reserve(frames.len());
        self.live.reserve(frames.len());
        for frame in frames {
            self.push(frame);
        }
        info!("Created {} new physical pages", self.len());
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, frame: PhysPageNum) -> bool {
        self.live.contains_key(&frame)
    }

    /// Append a frame. Returns `false` if it was already free.
    pub fn push(&mut self, frame: PhysPageNum) -> bool {
        if self.live.contains_key(&frame) {
            return false;
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.live.insert(frame, stamp);
        self.queue.push_back((frame, stamp));
        true
    }

    /// Remove and return the oldest free frame.
    pub fn pop_front(&mut self) -> Option<PhysPageNum> {
        while let Some((frame, stamp)) = self.queue.pop_front() {
            if self.live.get(&frame) == Some(&stamp) {
                self.live.remove(&frame);
                return Some(frame);
            }
        }
        None
    }

    /// Remove `frame` wherever it sits in the order. Returns `false` if it
    /// was not free.
    pub fn take(&mut self, frame: PhysPageNum) -> bool {
        if self.live.remove(&frame).is_none() {
            return false;
        }
        if self.queue.len() > 2 * self.live.len() + 64 {
            self.compact();
        }
        true
    }

    /// free frames in the order they will be handed out
    pub fn iter(&self) -> impl Iterator<Item = PhysPageNum> + '_ {
        self.queue
            .iter()
            .filter(|(frame, stamp)| self.live.get(frame) == Some(stamp))
            .map(|(frame, _)| *frame)
    }

    fn compact(&mut self) {
        let live = &self.live;
        self.queue.retain(|(frame, stamp)| live.get(frame) == Some(stamp));
    }
}

/// Shuffle `frames` with a generator seeded by `seed`. Zero keeps the order.
pub fn shuffle_frames(frames: &mut [PhysPageNum], seed: u64) {
    if seed != 0 {
        let mut rng = StdRng::seed_from_u64(seed);
        frames.shuffle(&mut rng);
        info!("Shuffled {} physical pages with seed {}", frames.len(), seed);
    }
}
