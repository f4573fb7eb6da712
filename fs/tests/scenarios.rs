//! End-to-end scenarios against a `Vec<u8>`-backed region — no FUSE, no
//! mmap needed to exercise the core (spec.md §9.4). Named after the
//! literal S1–S7 scenarios and the quantified invariants of spec.md §8.

use tinyfat::dirent::ENTRY_SIZE;
use tinyfat::ops;
use tinyfat::region::{Region, BLOCK_SIZE};
use tinyfat_err::Error;

const NOW: (i64, u32) = (1_700_000_000, 0);

fn region_bytes(fssize: usize) -> Vec<u8> {
    vec![0u8; fssize]
}

/// Every block reachable from the root: the root's own chain, plus every
/// directory entry's head-block chain, recursed into subdirectories.
/// Exists purely to check the block-conservation invariant independently
/// of the allocator's own bookkeeping.
fn reachable_blocks(region: &Region, head: u32, seen: &mut std::collections::HashSet<u32>) {
    for block in tinyfat::alloc::chain_blocks(region, head).unwrap() {
        seen.insert(block);
    }
    for entry in tinyfat::dirent::list_entries(region, head).unwrap() {
        for block in tinyfat::alloc::chain_blocks(region, entry.head_block).unwrap() {
            seen.insert(block);
        }
        if entry.kind == tinyfat::dirent::EntryKind::Directory {
            reachable_blocks(region, entry.head_block, seen);
        }
    }
}

fn assert_block_conservation(region: &Region) {
    let mut seen = std::collections::HashSet::new();
    reachable_blocks(region, 0, &mut seen);
    assert_eq!(
        tinyfat::alloc::free_count(region) + seen.len(),
        region.fat_count()
    );
}

#[test]
fn s1_create_write_read() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/a", NOW).unwrap();
    assert_eq!(ops::write(&mut region, "/a", 0, b"Hello world").unwrap(), 11);
    let mut out = [0u8; 11];
    assert_eq!(ops::read(&mut region, "/a", 0, &mut out).unwrap(), 11);
    assert_eq!(&out, b"Hello world");
    assert_eq!(ops::getattr(&mut region, "/a").unwrap().size, 11);
    assert_block_conservation(&region);
}

#[test]
fn s2_append() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/a", NOW).unwrap();
    ops::write(&mut region, "/a", 0, b"Hello world").unwrap();
    assert_eq!(ops::write(&mut region, "/a", 11, b" again").unwrap(), 6);
    let mut out = [0u8; 17];
    ops::read(&mut region, "/a", 0, &mut out).unwrap();
    assert_eq!(&out, b"Hello world again");
    assert_eq!(ops::getattr(&mut region, "/a").unwrap().size, 17);
}

#[test]
fn s3_hole() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/b", NOW).unwrap();
    assert_eq!(
        ops::write(&mut region, "/b", BLOCK_SIZE as u64, b"X").unwrap(),
        1
    );
    assert_eq!(
        ops::getattr(&mut region, "/b").unwrap().size,
        BLOCK_SIZE as u64 + 1
    );
    let mut out = vec![0u8; BLOCK_SIZE + 1];
    ops::read(&mut region, "/b", 0, &mut out).unwrap();
    assert!(out[..BLOCK_SIZE].iter().all(|&b| b == 0));
    assert_eq!(out[BLOCK_SIZE], b'X');
}

#[test]
fn s4_truncate_down_then_up() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/b", NOW).unwrap();
    ops::write(&mut region, "/b", BLOCK_SIZE as u64, b"X").unwrap();

    ops::truncate(&mut region, "/b", 2).unwrap();
    assert_eq!(ops::getattr(&mut region, "/b").unwrap().size, 2);
    let mut out = [0u8; 2];
    ops::read(&mut region, "/b", 0, &mut out).unwrap();
    assert_eq!(out, [0u8, 0u8]);

    ops::truncate(&mut region, "/b", 10).unwrap();
    assert_eq!(ops::getattr(&mut region, "/b").unwrap().size, 10);
    let mut out = [0u8; 10];
    ops::read(&mut region, "/b", 0, &mut out).unwrap();
    assert!(out[2..].iter().all(|&b| b == 0));
}

#[test]
fn s5_mkdir_readdir_rmdir() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mkdir(&mut region, "/d", NOW).unwrap();
    ops::mknod(&mut region, "/d/f", NOW).unwrap();
    assert_eq!(ops::readdir(&mut region, "/d").unwrap(), vec!["f".to_string()]);
    assert_eq!(ops::rmdir(&mut region, "/d").unwrap_err(), Error::NotEmpty);
    ops::unlink(&mut region, "/d/f").unwrap();
    ops::rmdir(&mut region, "/d").unwrap();
    assert!(!ops::readdir(&mut region, "/").unwrap().contains(&"d".to_string()));
}

#[test]
fn s6_rename_across_directories() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mkdir(&mut region, "/x", NOW).unwrap();
    ops::mkdir(&mut region, "/y", NOW).unwrap();
    ops::mknod(&mut region, "/x/f", NOW).unwrap();
    ops::write(&mut region, "/x/f", 0, b"data").unwrap();
    ops::rename(&mut region, "/x/f", "/y/g").unwrap();
    assert!(ops::readdir(&mut region, "/x").unwrap().is_empty());
    let mut out = [0u8; 4];
    ops::read(&mut region, "/y/g", 0, &mut out).unwrap();
    assert_eq!(&out, b"data");
}

#[test]
fn s7_remount_reproduces_identical_views() {
    let mut bytes = region_bytes(1 << 20);
    {
        let mut region = Region::new(&mut bytes);
        ops::mkdir(&mut region, "/x", NOW).unwrap();
        ops::mknod(&mut region, "/x/f", NOW).unwrap();
        ops::write(&mut region, "/x/f", 0, b"persisted").unwrap();
    }

    // Simulate unmap/remap at a different address: the bytes are copied
    // into a fresh allocation and wrapped in a brand new `Region`.
    let mut remounted = bytes.clone();
    let mut region = Region::new(&mut remounted);
    assert_eq!(ops::readdir(&mut region, "/x").unwrap(), vec!["f".to_string()]);
    let mut out = [0u8; 9];
    ops::read(&mut region, "/x/f", 0, &mut out).unwrap();
    assert_eq!(&out, b"persisted");
    assert_eq!(ops::getattr(&mut region, "/x/f").unwrap().size, 9);
}

#[test]
fn idempotent_bootstrap() {
    let mut bytes = region_bytes(1 << 16);
    let mut region = Region::new(&mut bytes);
    region.bootstrap();
    let once = bytes.clone();
    let mut region = Region::new(&mut bytes);
    region.bootstrap();
    assert_eq!(bytes, once);
}

#[test]
fn block_conservation_across_a_sequence_of_ops() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mkdir(&mut region, "/d", NOW).unwrap();
    ops::mknod(&mut region, "/d/a", NOW).unwrap();
    ops::write(&mut region, "/d/a", 0, &vec![1u8; BLOCK_SIZE * 2 + 5]).unwrap();
    ops::mknod(&mut region, "/d/b", NOW).unwrap();
    ops::unlink(&mut region, "/d/a").unwrap();
    assert_block_conservation(&region);
    ops::rename(&mut region, "/d/b", "/c").unwrap();
    assert_block_conservation(&region);
    ops::rmdir(&mut region, "/d").unwrap();
    assert_block_conservation(&region);
}

#[test]
fn directory_payload_is_always_entry_aligned() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mkdir(&mut region, "/d", NOW).unwrap();
    for i in 0..5 {
        ops::mknod(&mut region, &format!("/d/f{i}"), NOW).unwrap();
    }
    let entry = tinyfat::path::resolve(&region, "/d").unwrap();
    let size = tinyfat::stream::stream_size(&region, entry.head_block).unwrap();
    assert_eq!(size as usize % ENTRY_SIZE, 0);
}

#[test]
fn round_trip_write_read_at_varied_offsets() {
    let mut bytes = region_bytes(1 << 20);
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/a", NOW).unwrap();
    for (offset, data) in [
        (0u64, &b"abc"[..]),
        (100, &b"defgh"[..]),
        (BLOCK_SIZE as u64 - 2, &b"crossing"[..]),
        (BLOCK_SIZE as u64 * 3, &b"far"[..]),
    ] {
        ops::write(&mut region, "/a", offset, data).unwrap();
        let mut out = vec![0u8; data.len()];
        ops::read(&mut region, "/a", offset, &mut out).unwrap();
        assert_eq!(out, data);
    }
}

#[test]
fn no_space_leaves_region_untouched() {
    // A region just big enough for the root plus one more block.
    let mut bytes = region_bytes(8 + 2 * (8 + BLOCK_SIZE));
    let mut region = Region::new(&mut bytes);
    ops::mknod(&mut region, "/a", NOW).unwrap();
    let err = ops::write(&mut region, "/a", 0, &vec![1u8; BLOCK_SIZE * 4]).unwrap_err();
    assert_eq!(err, Error::NoSpace);
    // The failed write must not have landed partially (spec.md §7: errors
    // roll back rather than leaving a partial mutation).
    assert_eq!(ops::getattr(&mut region, "/a").unwrap().size, 0);
}
