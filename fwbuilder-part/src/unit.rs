use core::{fmt, str::FromStr};
use std::io;

use crate::{div_round_up, num_cast, LBA_SIZE};

const KIB: u64 = 1024;

/// Heads per cylinder used for the legacy CHS geometry
pub const HEADS_PER_CYLINDER: usize = 16;

/// Sectors per track used for the legacy CHS geometry
pub const SECTORS_PER_TRACK: usize = 63;

/// One MiB worth of LBAs
const OPTIMAL_GRAIN_LBA: usize = (1 << 20) / LBA_SIZE;

/// Unit a size is expressed in.
///
/// Every multiple-of-bytes unit is a power of 1024, whether its name carries
/// the binary `i` or not.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeUnit {
    /// 512 bytes sectors
    Sector,

    /// Bytes
    Byte,

    /// 1024 bytes
    KiloByte,

    /// 1024² bytes
    MegaByte,

    /// 1024³ bytes
    GigaByte,

    /// 1024⁴ bytes
    TeraByte,
}

impl SizeUnit {
    /// Size of one unit, in bytes
    #[must_use]
    pub fn block_size(self) -> u64 {
        match self {
            Self::Sector => num_cast!(u64, LBA_SIZE),
            Self::Byte => 1,
            Self::KiloByte => KIB,
            Self::MegaByte => KIB.pow(2),
            Self::GigaByte => KIB.pow(3),
            Self::TeraByte => KIB.pow(4),
        }
    }

    /// Converts a count of units to bytes, or `None` on overflow
    #[must_use]
    pub fn to_bytes(self, count: u64) -> Option<u64> {
        count.checked_mul(self.block_size())
    }

    /// Converts a count of units to LBAs, rounding up, or `None` on overflow
    #[must_use]
    pub fn to_lba(self, count: u64) -> Option<u64> {
        self.to_bytes(count)
            .map(|bytes| div_round_up(bytes, num_cast!(u64, LBA_SIZE)))
    }
}

impl FromStr for SizeUnit {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "s" => Self::Sector,
            "b" => Self::Byte,
            "kb" | "kib" => Self::KiloByte,
            "mb" | "mib" => Self::MegaByte,
            "gb" | "gib" => Self::GigaByte,
            "tb" | "tib" => Self::TeraByte,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Unknown size unit {s}"),
                ))
            }
        })
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sector => "s",
            Self::Byte => "b",
            Self::KiloByte => "kib",
            Self::MegaByte => "mib",
            Self::GigaByte => "gib",
            Self::TeraByte => "tib",
        })
    }
}

/// Alignment policy for partitions placed without an explicit start sector
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Alignment {
    /// No alignment at all
    None,

    /// Aligned on the device's logical block
    Minimal,

    /// Aligned on a legacy CHS cylinder boundary
    Cylinder,

    /// Aligned on a MiB boundary
    #[default]
    Optimal,
}

impl Alignment {
    /// Alignment granularity, in LBAs
    #[must_use]
    pub fn grain_lba(self) -> usize {
        match self {
            Self::None | Self::Minimal => 1,
            Self::Cylinder => HEADS_PER_CYLINDER * SECTORS_PER_TRACK,
            Self::Optimal => OPTIMAL_GRAIN_LBA,
        }
    }
}

impl FromStr for Alignment {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "minimal" => Self::Minimal,
            "cylinder" => Self::Cylinder,
            "optimal" => Self::Optimal,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Unknown alignment policy {s}"),
                ))
            }
        })
    }
}
