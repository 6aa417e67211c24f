#![allow(missing_docs)]

use log as _;
use num_traits as _;
use test_log::test;

#[test]
fn num_cast_fits() {
    assert_eq!(fwbuilder_part::num_cast!(u32, 2048_u64), 2048_u32);
}

#[test]
#[should_panic]
fn num_cast_overflow() {
    let _ = fwbuilder_part::num_cast!(u8, 256_u32);
}
