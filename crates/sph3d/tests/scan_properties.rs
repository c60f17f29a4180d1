//! Property tests for the multi-level block scan.
//!
//! The scan is inclusive in place; subtracting each input recovers the
//! exclusive prefix, which is compared against a plain running sum.
//!
//! Run with: cargo test -p sph3d --test scan_properties

use proptest::prelude::*;
use sph3d::params::ScanDispatch;
use sph3d::scan::{cell_start, exclusive_scan, BlockScan};

fn check_exclusive(counts: &[u32]) -> Result<(), TestCaseError> {
    let mut scan = BlockScan::with_capacity(counts.len() as u32);
    let inclusive = scan.scan(counts).to_vec();
    let expected = exclusive_scan(counts);
    prop_assert_eq!(inclusive.len(), counts.len());
    for i in 0..counts.len() {
        prop_assert_eq!(
            inclusive[i] - counts[i],
            expected[i],
            "mismatch at {} of {}",
            i,
            counts.len()
        );
        prop_assert_eq!(cell_start(&inclusive, i as u32), expected[i]);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn single_element(value in 0u32..1_000_000) {
        check_exclusive(&[value])?;
    }

    #[test]
    fn one_block(counts in prop::collection::vec(0u32..64, 128)) {
        check_exclusive(&counts)?;
    }

    #[test]
    fn block_boundaries(len in 120usize..400, seed in 0u32..1000) {
        let counts: Vec<u32> = (0..len as u32).map(|i| (i * 31 + seed) % 17).collect();
        check_exclusive(&counts)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn multi_level(counts in prop::collection::vec(0u32..8, 200_000)) {
        check_exclusive(&counts)?;
    }
}

#[test]
fn test_sparse_live_region_leaves_tail_untouched() {
    // Capacity for 32^3 cells, only the first 1000 live.
    let mut scan = BlockScan::with_capacity(32_768);
    for (i, count) in scan.data_mut().iter_mut().enumerate() {
        *count = if i < 1000 { (i % 5) as u32 } else { 0 };
    }
    scan.run(&ScanDispatch::for_count(1000));

    let expected_total: u32 = (0..1000).map(|i| (i % 5) as u32).sum();
    assert_eq!(scan.data()[999], expected_total);
    assert!(scan.data()[1000..].iter().all(|&v| v == 0));
}

#[test]
fn test_all_particles_in_one_cell() {
    let mut counts = vec![0u32; 5000];
    counts[4321] = 32_768;
    let mut scan = BlockScan::with_capacity(5000);
    let prefix = scan.scan(&counts).to_vec();
    assert_eq!(cell_start(&prefix, 4321), 0);
    assert_eq!(prefix[4321], 32_768);
    assert_eq!(prefix[4999], 32_768);
}
