#![doc = include_str!("../README.md")]

use core::{
    fmt,
    ops::{Add, Div, Mul, Rem, Sub},
    str::FromStr,
};
use std::io;

use log::debug;
use num_traits::{ConstOne, ConstZero};
#[cfg(test)]
use test_log as _;

mod unit;

pub use unit::{Alignment, SizeUnit, HEADS_PER_CYLINDER, SECTORS_PER_TRACK};

/// Size of a logical block, in bytes. Loop devices always expose 512 bytes sectors.
pub const LBA_SIZE: usize = 512;

/// First number handed out to a primary or extended partition
const FIRST_PRIMARY_NUMBER: usize = 1;

/// First number handed out to a logical partition
const FIRST_LOGICAL_NUMBER: usize = 5;

/// Returns a rounded up number to the nearest multiple
///
/// # Panics
///
/// If the multiple is zero.
pub fn round_up<T>(number: T, multiple: T) -> T
where
    T: ConstOne + ConstZero + Copy + Div<Output = T> + Eq + Mul<Output = T> + Rem<Output = T>,
{
    let rem = number % multiple;

    if rem == T::ZERO {
        return number;
    }

    let div = (number / multiple) + T::ONE;

    div * multiple
}

/// Returns the result of the rounded up division of numerator by denominator
///
/// # Panics
///
/// If the multiple is zero.
pub fn div_round_up<T>(numerator: T, denominator: T) -> T
where
    T: ConstOne + ConstZero + Copy + Div<Output = T> + Eq + Mul<Output = T> + Rem<Output = T>,
{
    let rounded = round_up(numerator, denominator);

    rounded / denominator
}

#[must_use]
#[doc(hidden)]
pub fn type_name_of_expr<T>(_: T) -> &'static str {
    core::any::type_name::<T>()
}

/// Converts an integer to another integer type
///
/// # Panics
///
/// If the conversion fails.
#[macro_export]
macro_rules! num_cast {
    ($t: ty, $v: expr) => {
        <$t>::try_from($v).expect(&format!(
            "Integer Overflow ({} to {})",
            core::any::type_name::<$t>(),
            $crate::type_name_of_expr($v),
        ))
    };
}

/// Computes the size between a start and end indexes
///
/// # Panics
///
/// If start or end are negative, or if end is lower than start.
pub fn start_end_to_size<T>(start: T, end: T) -> T
where
    T: Add<Output = T> + Ord + ConstOne + ConstZero + Sub<Output = T>,
{
    assert!(start >= T::ZERO, "Negative start offset");
    assert!(end >= T::ZERO, "Negative end offset");
    assert!(end >= start, "End offset is lower than start offset");

    (end - start) + T::ONE
}

/// Computes the end index from a start index and a size
///
/// # Panics
///
/// If start is negative, or if the size is lower than or equal to zero.
pub fn start_size_to_end<T>(start: T, size: T) -> T
where
    T: Add<Output = T> + ConstOne + ConstZero + Ord + Sub<Output = T>,
{
    assert!(start >= T::ZERO, "Negative start offset");
    assert!(size >= T::ONE, "Size too small");

    (start + size) - T::ONE
}

/// The role of a partition in an msdos partition table
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionKind {
    /// A regular partition, described in the MBR itself
    Primary,

    /// The container for logical partitions, described in the MBR itself
    Extended,

    /// A partition living inside the extended partition, described by an EBR
    Logical,
}

impl FromStr for PartitionKind {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "primary" => Self::Primary,
            "extended" => Self::Extended,
            "logical" => Self::Logical,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Unknown partition type {s}"),
                ))
            }
        })
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
        })
    }
}

/// Returns the number the kernel gives to every partition of a table, in order.
///
/// Primary and extended partitions share one counter starting at 1, logical
/// partitions have their own starting at 5, regardless of how both kinds are
/// interleaved.
#[must_use]
pub fn partition_numbers(kinds: &[PartitionKind]) -> Vec<usize> {
    let mut primary = FIRST_PRIMARY_NUMBER - 1;
    let mut logical = FIRST_LOGICAL_NUMBER - 1;

    kinds
        .iter()
        .map(|kind| match kind {
            PartitionKind::Primary | PartitionKind::Extended => {
                primary += 1;
                primary
            }
            PartitionKind::Logical => {
                logical += 1;
                logical
            }
        })
        .collect()
}

/// Returns the number of the partition at `index`, or `None` if `index` is out of bounds.
#[must_use]
pub fn partition_device_number(kinds: &[PartitionKind], index: usize) -> Option<usize> {
    partition_numbers(kinds).get(index).copied()
}

/// Size and Offset Partition Requirements for our layout
#[derive(Clone, Copy, Debug)]
pub struct PartitionLayoutHint {
    /// Offset Requirement, in LBAs. If missing, the partition starts at the
    /// first aligned LBA after the previous partition.
    pub offset_lba: Option<usize>,

    /// Size, in LBAs
    pub size_lba: usize,
}

/// Partition Layout
#[derive(Clone, Copy, Eq, Debug, PartialEq)]
pub struct PartitionLayout {
    /// Partition Start LBA
    pub start_lba: usize,

    /// Partition End LBA
    pub end_lba: usize,
}

impl PartitionLayout {
    /// Size of the partition, in LBAs
    #[must_use]
    pub fn size_lba(&self) -> usize {
        start_end_to_size(self.start_lba, self.end_lba)
    }

    /// Returns whether `other` lies entirely within this partition
    #[must_use]
    pub fn contains(&self, other: &PartitionLayout) -> bool {
        other.start_lba >= self.start_lba && other.end_lba <= self.end_lba
    }
}

/// Builds the partition layout out of a set of constraints.
///
/// Partitions without an offset start on the first LBA aligned on `grain_lba`
/// that follows the previous partition. Partitions with an offset are placed
/// exactly where requested.
///
/// # Errors
///
/// Returns an [`std::io::Error`] if a partition is empty, overlaps another one, or doesn't fit
/// between the first and last usable LBAs.
pub fn build_layout(
    first_usable_lba: usize,
    last_usable_lba: usize,
    grain_lba: usize,
    parts: &[PartitionLayoutHint],
) -> Result<Vec<PartitionLayout>, io::Error> {
    if grain_lba == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Alignment grain can't be zero",
        ));
    }

    let mut layout = Vec::with_capacity(parts.len());
    let mut next_available_lba = first_usable_lba;

    for (idx, part) in parts.iter().enumerate() {
        if part.size_lba == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Partition {idx}: Empty partition"),
            ));
        }

        let start_lba = if let Some(offset_lba) = part.offset_lba {
            debug!("Partition {idx}: Fixed offset at LBA {offset_lba}");
            offset_lba
        } else {
            let offset_lba = round_up(next_available_lba, grain_lba);
            debug!("Partition {idx}: Offset derived at LBA {offset_lba}");
            offset_lba
        };

        let end_lba = start_size_to_end(start_lba, part.size_lba);
        debug!("Partition {idx}: LBAs {start_lba} to {end_lba}");

        next_available_lba = next_available_lba.max(end_lba + 1);
        layout.push(PartitionLayout { start_lba, end_lba });
    }

    check_layout(first_usable_lba, last_usable_lba, &layout)?;

    Ok(layout)
}

/// Checks that a set of partitions fits the usable area without overlapping.
///
/// # Errors
///
/// Returns an [`std::io::Error`] if the constraints aren't met
pub fn check_layout(
    first_usable_lba: usize,
    last_usable_lba: usize,
    layout: &[PartitionLayout],
) -> Result<(), io::Error> {
    let mut sorted = layout.to_vec();
    sorted.sort_by_key(|p| p.start_lba);

    let mut next_available_lba = first_usable_lba;
    for part in sorted {
        if part.start_lba < first_usable_lba {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Partition starts before first usable LBA.",
            ));
        }

        if part.start_lba < next_available_lba {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Partition overlaps with previous partition.",
            ));
        }

        if part.end_lba > last_usable_lba {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Partition overflows the device",
            ));
        }

        next_available_lba = part.end_lba + 1;
    }

    Ok(())
}
