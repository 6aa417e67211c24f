#![allow(missing_docs)]

use core::str::FromStr as _;

use fwbuilder_part::{Alignment, SizeUnit};
use log as _;
use num_traits as _;
use test_log::test;

#[test]
fn unit_parse_case_insensitive() {
    assert_eq!(SizeUnit::from_str("MB").unwrap(), SizeUnit::MegaByte);
    assert_eq!(SizeUnit::from_str("mib").unwrap(), SizeUnit::MegaByte);
    assert_eq!(SizeUnit::from_str("S").unwrap(), SizeUnit::Sector);
    assert_eq!(SizeUnit::from_str("TiB").unwrap(), SizeUnit::TeraByte);
}

#[test]
fn unit_parse_unknown() {
    SizeUnit::from_str("pb").unwrap_err();
    SizeUnit::from_str("").unwrap_err();
}

#[test]
fn unit_block_sizes() {
    assert_eq!(SizeUnit::Sector.block_size(), 512);
    assert_eq!(SizeUnit::Byte.block_size(), 1);
    assert_eq!(SizeUnit::from_str("kb").unwrap().block_size(), 1024);
    assert_eq!(SizeUnit::from_str("gb").unwrap().block_size(), 1 << 30);
}

#[test]
fn unit_bytes_match_block_size() {
    for name in ["s", "b", "kb", "kib", "mb", "mib", "gb", "gib", "tb", "tib"] {
        let unit = SizeUnit::from_str(name).unwrap();

        for count in [1_u64, 7, 100, 4096] {
            assert_eq!(
                unit.to_bytes(count).unwrap(),
                unit.block_size() * count,
                "{name} x {count}"
            );
        }
    }
}

#[test]
fn unit_hundred_megabytes() {
    assert_eq!(
        SizeUnit::from_str("mb").unwrap().to_bytes(100).unwrap(),
        100 * 1024 * 1024
    );
}

#[test]
fn unit_to_lba() {
    assert_eq!(SizeUnit::MegaByte.to_lba(60).unwrap(), 122_880);
    assert_eq!(SizeUnit::Sector.to_lba(63).unwrap(), 63);
    assert_eq!(SizeUnit::Byte.to_lba(513).unwrap(), 2);
}

#[test]
fn unit_overflow() {
    assert_eq!(SizeUnit::TeraByte.to_bytes(u64::MAX), None);
}

#[test]
fn alignment_grains() {
    assert_eq!(Alignment::None.grain_lba(), 1);
    assert_eq!(Alignment::Minimal.grain_lba(), 1);
    assert_eq!(Alignment::Cylinder.grain_lba(), 1008);
    assert_eq!(Alignment::Optimal.grain_lba(), 2048);
    assert_eq!(Alignment::default(), Alignment::Optimal);
}

#[test]
fn alignment_parse() {
    assert_eq!(Alignment::from_str("Optimal").unwrap(), Alignment::Optimal);
    Alignment::from_str("best").unwrap_err();
}
