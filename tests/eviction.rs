//! # Size-Cap Eviction Tests
//!
//! The heap enforces its size cap by deallocating records from the file
//! tail, the only spot where a deallocation is guaranteed to shrink the
//! file. These tests cover:
//! 1. `set_max_size` shrinks the file to fit, clearing it entirely when the
//!    cap cannot hold a single object
//! 2. A put that would exceed the cap fails without leaving any allocation
//!    behind
//! 3. The exact boundary where a second object does or does not fit

use heapstore::HeapFile;
use tempfile::tempdir;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(41).wrapping_add(seed))
        .collect()
}

#[test]
fn set_max_size_halving_then_starving_empties_the_heap() {
    let dir = tempdir().unwrap();
    let mut heap = HeapFile::open(dir.path().join("heap.dat"), b"").unwrap();

    for i in 0u8..5 {
        let id = [20 + i * 10];
        let data = pattern(200 + usize::from(i) * 100, i);
        assert!(heap.put(&id, &data).unwrap());
    }

    let old_size = heap.size();
    heap.set_max_size(old_size / 2).unwrap();
    assert!(heap.size() <= old_size / 2);
    assert!(heap.size() > 0);

    heap.set_max_size(200).unwrap();
    assert_eq!(heap.size(), 0);

    heap.set_max_size(11).unwrap();
    assert_eq!(heap.size(), 0);
}

#[test]
fn eviction_removes_objects_from_the_tail_first() {
    let dir = tempdir().unwrap();
    let mut heap = HeapFile::open(dir.path().join("heap.dat"), b"").unwrap();

    for i in 0u8..5 {
        assert!(heap.put(&[i], &pattern(300, i)).unwrap());
    }

    // evict exactly the last two blocks: keep three 310-byte blocks
    // starting at offset 8, plus the four-byte count and three records
    let keep = 8 + 3 * 310 + 4 + 3 * 16;
    heap.set_max_size(keep).unwrap();

    assert!(heap.has(&[0]));
    assert!(heap.has(&[1]));
    assert!(heap.has(&[2]));
    assert!(!heap.has(&[3]));
    assert!(!heap.has(&[4]));
    assert_eq!(heap.size(), keep);
}

#[test]
fn put_beyond_the_cap_fails_and_leaves_no_allocation() {
    let dir = tempdir().unwrap();
    let mut heap = HeapFile::open(dir.path().join("heap.dat"), b"").unwrap();
    heap.set_max_size(512).unwrap();

    assert!(heap.put(&[20], &pattern(200, 0)).unwrap());
    assert!(heap.size() <= 512);
    let size = heap.size();

    assert!(!heap.put(&[21], &pattern(200, 1)).unwrap());

    assert_eq!(heap.size(), size);
    assert_eq!(heap.index().num_allocated_records(), 1);
    assert!(heap.has(&[20]));
    assert!(!heap.has(&[21]));
}

#[test]
fn second_object_fits_exactly_at_the_projected_boundary() {
    let dir = tempdir().unwrap();
    let mut heap = HeapFile::open(dir.path().join("heap.dat"), b"").unwrap();

    // one-byte id plus 200 payload bytes pads up to a 256-byte block;
    // two blocks plus the record table project to exactly 556 bytes
    heap.set_max_size(512).unwrap();
    assert!(heap.put(&[20], &pattern(200, 0)).unwrap());
    assert!(!heap.put(&[21], &pattern(200, 1)).unwrap());

    heap.set_max_size(556).unwrap();
    assert!(heap.put(&[21], &pattern(200, 1)).unwrap());
    assert!(heap.has(&[20]));
    assert!(heap.has(&[21]));
    assert_eq!(heap.size(), 556);

    // one byte short evicts the newcomer from the tail
    heap.set_max_size(555).unwrap();
    assert!(heap.has(&[20]));
    assert!(!heap.has(&[21]));
}

#[test]
fn cap_applies_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.dat");

    {
        let mut heap = HeapFile::open(&path, b"").unwrap();
        for i in 0u8..4 {
            heap.put(&[i], &pattern(400, i)).unwrap();
        }
        heap.close().unwrap();
    }

    let mut heap = HeapFile::open(&path, b"").unwrap();
    let old_size = heap.size();
    heap.set_max_size(old_size / 2).unwrap();

    assert!(heap.size() <= old_size / 2);
    assert!(heap.has(&[0]));
}

#[test]
fn unbounded_by_default() {
    let dir = tempdir().unwrap();
    let mut heap = HeapFile::open(dir.path().join("heap.dat"), b"").unwrap();

    assert!(heap.put(b"large", &pattern(100_000, 0)).unwrap());
    assert!(heap.size() > 100_000);
}
