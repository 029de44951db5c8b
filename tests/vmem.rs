use std::collections::BTreeSet;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use sim_vmem::mm::{FrameAllocator, PhysPageNum};
use sim_vmem::{MemoryDevice, PhysAddr, SimDram, VirtAddr, VirtualMemory, VmemConfig, VmemError};

const MB: u64 = 1 << 20;
const PAGE: u64 = 4096;

fn new_vmem(size: u64, config: VmemConfig) -> (Rc<SimDram>, VirtualMemory<Rc<SimDram>>) {
    let dram = Rc::new(SimDram::new(size));
    let vmem = VirtualMemory::new(config, Rc::clone(&dram)).unwrap();
    (dram, vmem)
}

/// every frame is either free or in exactly one run, and none goes missing
fn assert_frames_conserved(allocator: &FrameAllocator) {
    let mut seen = BTreeSet::new();
    for frame in allocator.free_frames() {
        assert!(seen.insert(frame), "{:?} free twice", frame);
    }
    for (id, record) in allocator.records() {
        for frame in record.frames() {
            assert!(
                seen.insert(frame),
                "{:?} of {:?} is also held elsewhere",
                frame,
                id
            );
        }
    }
    assert_eq!(seen.len() as u64, allocator.total_frames());
}

/// cheap deterministic address stream
fn addresses(count: usize) -> Vec<u64> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state % (1 << 36)
        })
        .collect()
}

#[test]
fn repeated_translation_is_stable() {
    let (dram, mut vmem) = new_vmem(256 * MB, VmemConfig::default());
    let stream = addresses(500);
    let mut first = Vec::new();
    for (i, &vaddr) in stream.iter().enumerate() {
        let cpu = (i % 4) as u32;
        first.push(vmem.translate(cpu, VirtAddr(vaddr)).unwrap().0);
        dram.tick();
    }
    for (i, &vaddr) in stream.iter().enumerate() {
        let cpu = (i % 4) as u32;
        assert_eq!(
            vmem.translate(cpu, VirtAddr(vaddr)).unwrap(),
            (first[i], 0),
            "cpu {} vaddr {:#x}",
            cpu,
            vaddr
        );
    }
}

#[test]
fn first_touch_is_charged_once() {
    let config = VmemConfig::default().with_minor_fault_penalty(37);
    let (_, mut vmem) = new_vmem(64 * MB, config);
    assert_eq!(vmem.translate(2, VirtAddr(0xdead_b000)).unwrap().1, 37);
    assert_eq!(vmem.translate(2, VirtAddr(0xdead_b008)).unwrap().1, 0);
    assert_eq!(vmem.translate(3, VirtAddr(0xdead_b000)).unwrap().1, 37);
    assert_eq!(vmem.translate(2, VirtAddr(0xdead_c000)).unwrap().1, 37);
}

#[test]
fn frames_stay_disjoint_and_conserved() {
    let (dram, mut vmem) = new_vmem(64 * MB, VmemConfig::default().with_virtual_seed(99));
    assert_frames_conserved(vmem.frame_allocator());
    for (i, vaddr) in addresses(2000).into_iter().enumerate() {
        let cpu = (i % 3) as u32;
        vmem.translate(cpu, VirtAddr(vaddr)).unwrap();
        vmem.translate(cpu, VirtAddr(vaddr + PAGE)).unwrap();
        for level in 1..=4 {
            vmem.walk_level(cpu, VirtAddr(vaddr), level).unwrap();
        }
        dram.advance(3);
        if i % 250 == 0 {
            assert_frames_conserved(vmem.frame_allocator());
        }
    }
    assert_frames_conserved(vmem.frame_allocator());
}

#[test]
fn sequential_pages_get_contiguous_frames() {
    let (_, mut vmem) = new_vmem(64 * MB, VmemConfig::default());
    let (a, _) = vmem.translate(0, VirtAddr(0x7000_0000)).unwrap();
    let (b, _) = vmem.translate(0, VirtAddr(0x7000_1000)).unwrap();
    assert_eq!(b.floor(), a.floor().next());

    let records: Vec<_> = vmem.frame_allocator().records().map(|(_, r)| *r).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].size, 2);
    assert_eq!(records[0].start_frame, a.floor());
}

#[test]
fn interleaved_cpu_breaks_contiguity() {
    let (_, mut vmem) = new_vmem(64 * MB, VmemConfig::default());
    let (a, _) = vmem.translate(0, VirtAddr(0x7000_0000)).unwrap();
    // takes the frame right after `a`
    vmem.translate(1, VirtAddr(0x1234_5000)).unwrap();
    let (b, _) = vmem.translate(0, VirtAddr(0x7000_1000)).unwrap();
    assert_ne!(b.floor(), a.floor().next());
    assert_eq!(vmem.frame_allocator().records().count(), 3);
}

#[test]
fn level_indices_follow_shift_and_mask() {
    let (_, mut vmem) = new_vmem(64 * MB, VmemConfig::default());
    assert_eq!(vmem.shamt(1), Ok(12));
    assert_eq!(vmem.shamt(2), Ok(21));

    let vaddr = VirtAddr(0x0000_7f3a_5c2d_e123);
    assert_eq!(vmem.get_offset(vaddr, 1), Ok((vaddr.0 >> 12) & 0x1ff));
    assert_eq!(vmem.get_offset(vaddr, 2), Ok((vaddr.0 >> 21) & 0x1ff));
    assert_eq!(
        vmem.get_offset(vaddr, 0),
        Err(VmemError::LevelOutOfRange { level: 0, levels: 4 })
    );

    let (l1, _) = vmem.walk_level(0, vaddr, 1).unwrap();
    let (l2, _) = vmem.walk_level(0, vaddr, 2).unwrap();
    assert_eq!(l1.page_offset(), ((vaddr.0 >> 12) & 0x1ff) * 8);
    assert_eq!(l2.page_offset(), ((vaddr.0 >> 21) & 0x1ff) * 8);
}

#[test]
fn small_table_pages_pack_into_one_frame() {
    let config = VmemConfig::default().with_pte_page_size(2048);
    let (_, mut vmem) = new_vmem(64 * MB, config);
    let (a, _) = vmem.walk_level(0, VirtAddr(0), 3).unwrap();
    let (b, _) = vmem.walk_level(0, VirtAddr(1 << 40), 3).unwrap();
    // two 2 KiB table pages share the first frame
    assert_eq!(a.floor(), b.floor());
    assert_eq!(b.0 - a.0, 2048);
}

#[test]
fn wide_table_pages_get_their_own_frames() {
    let config = VmemConfig::default().with_pte_page_size(8192);
    let (_, mut vmem) = new_vmem(64 * MB, config);
    let (a, _) = vmem.walk_level(0, VirtAddr(0x3ff000), 1).unwrap();
    let (b, _) = vmem.walk_level(0, VirtAddr((1 << 40) | 0x3ff000), 1).unwrap();
    assert_ne!(a, b);

    let tables: Vec<_> = vmem
        .frame_allocator()
        .records()
        .map(|(_, r)| *r)
        .filter(|r| r.start_page.is_none())
        .collect();
    for entry in [a, b] {
        let host = tables.iter().find(|r| r.contains(entry.floor()));
        assert!(host.is_some(), "{:?} outside table storage", entry);
    }
    assert!(tables.iter().all(|r| r.size == 2 && r.start_frame.0 % 2 == 0));
    assert_frames_conserved(vmem.frame_allocator());
}

#[test]
fn seeded_runs_are_reproducible() {
    let config = VmemConfig::default().with_virtual_seed(0x5eed);
    let (_, mut one) = new_vmem(32 * MB, config);
    let (_, mut two) = new_vmem(32 * MB, config);
    let order: Vec<PhysPageNum> = one.frame_allocator().free_frames().collect();
    assert_eq!(order, two.frame_allocator().free_frames().collect::<Vec<_>>());
    assert!(order.windows(2).any(|w| w[1].0 != w[0].0 + 1));

    one.repopulate_free_pages();
    two.repopulate_free_pages();
    assert_eq!(
        one.frame_allocator().free_frames().collect::<Vec<_>>(),
        two.frame_allocator().free_frames().collect::<Vec<_>>()
    );
    for vaddr in addresses(100) {
        assert_eq!(
            one.translate(0, VirtAddr(vaddr)).unwrap(),
            two.translate(0, VirtAddr(vaddr)).unwrap()
        );
    }
}

#[test]
fn unseeded_runs_keep_address_order() {
    let (_, vmem) = new_vmem(8 * MB, VmemConfig::default());
    let order: Vec<u64> = vmem.frame_allocator().free_frames().map(|f| f.0).collect();
    assert_eq!(order, (256..2048).collect::<Vec<_>>());
    assert_eq!(vmem.available_ppages(), 2048 - 256);
}

#[test]
fn rejects_bad_table_page_sizes() {
    let dram = SimDram::new(64 * MB);
    let config = VmemConfig::default().with_pte_page_size(512);
    assert_eq!(
        VirtualMemory::new(config, &dram).err(),
        Some(VmemError::PtePageTooSmall { size: 512 })
    );
    let config = VmemConfig::default().with_pte_page_size(6144);
    assert_eq!(
        VirtualMemory::new(config, &dram).err(),
        Some(VmemError::PtePageNotPowerOfTwo { size: 6144 })
    );
}

#[test]
fn oversized_virtual_space_still_translates() {
    let config = VmemConfig::default().with_pt_levels(6);
    let (_, mut vmem) = new_vmem(64 * MB, config);
    let (pa, penalty) = vmem.translate(0, VirtAddr(u64::MAX)).unwrap();
    assert_eq!(penalty, 200);
    assert_eq!(pa.page_offset(), 0xfff);
    let (_, penalty) = vmem.walk_level(0, VirtAddr(u64::MAX), 6).unwrap();
    assert_eq!(penalty, 200);
}

#[test]
fn engine_reads_the_device_clock() {
    let config = VmemConfig::default().with_reclaim_threshold(1_000);
    let (dram, mut vmem) = new_vmem(MB + 4 * PAGE, config);
    for page in 0..4 {
        vmem.translate(0, VirtAddr(page * 16 * PAGE)).unwrap();
        dram.advance(10);
    }
    assert_eq!(vmem.available_ppages(), 0);
    dram.set_cycle(5_000);
    assert_eq!(vmem.device().current_cycle(), 5_000);

    // oldest mapping is evicted to make room
    let (pa, _) = vmem.translate(1, VirtAddr(0x9000_0000)).unwrap();
    assert_eq!(pa, PhysAddr(MB));
    assert_eq!(vmem.mapped_pages(), 4);
    assert_frames_conserved(vmem.frame_allocator());
}
