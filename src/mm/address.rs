use core::fmt::{self, Debug, Formatter};

use crate::config;

/// physical address
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash, Default)]
pub struct PhysAddr(pub u64);

/// virtual address
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash, Default)]
pub struct VirtAddr(pub u64);

/// physical page number, i.e. a frame index
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash, Default)]
pub struct PhysPageNum(pub u64);

/// virtual page number
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash, Default)]
pub struct VirtPageNum(pub u64);

/// Integer log2, rounding down. `lg2(0)` is 0.
pub const fn lg2(n: u64) -> u32 {
    if n == 0 {
        0
    } else {
        u64::BITS - 1 - n.leading_zeros()
    }
}

/// Mask with the low `bits` bits set.
pub const fn bitmask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Keep the bits of `upper` above `bits` and take the low `bits` bits from `lower`.
pub const fn splice_bits(upper: u64, lower: u64, bits: u32) -> u64 {
    let mask = bitmask(bits);
    (upper & !mask) | (lower & mask)
}

impl PhysAddr {
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 >> config::PAGE_SIZE_BITS)
    }

    pub fn page_offset(&self) -> u64 {
        self.0 & (config::PAGE_SIZE - 1)
    }

    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

impl VirtAddr {
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> config::PAGE_SIZE_BITS)
    }

    pub fn page_offset(&self) -> u64 {
        self.0 & (config::PAGE_SIZE - 1)
    }

    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

impl PhysPageNum {
    /// the frame right after this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for PhysAddr {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << config::PAGE_SIZE_BITS)
    }
}

impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PA:{:#x}", self.0))
    }
}

impl From<u64> for PhysPageNum {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{:#x}", self.0))
    }
}

impl From<u64> for VirtAddr {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#x}", self.0))
    }
}

impl From<u64> for VirtPageNum {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}

impl From<PhysAddr> for u64 {
    fn from(v: PhysAddr) -> Self {
        v.0
    }
}

impl From<PhysPageNum> for u64 {
    fn from(v: PhysPageNum) -> Self {
        v.0
    }
}

impl From<VirtAddr> for u64 {
    fn from(v: VirtAddr) -> Self {
        v.0
    }
}

impl From<VirtPageNum> for u64 {
    fn from(v: VirtPageNum) -> Self {
        v.0
    }
}
