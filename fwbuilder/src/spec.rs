use core::{fmt, str::FromStr};
use std::path::PathBuf;

use layout::{Bank, Devices, InstallAction, Partition, Resilience, Target};
use log::warn;
use part::{partition_numbers, Alignment, PartitionKind, SizeUnit};
use types::FwBuilderError;

fn config_err(msg: String) -> FwBuilderError {
    FwBuilderError::Config(msg)
}

fn parse_unit(unit: &str) -> Result<SizeUnit, FwBuilderError> {
    unit.parse()
        .map_err(|_err| config_err(format!("Invalid unit {unit}")))
}

fn parse_size(size: &str) -> Result<u64, FwBuilderError> {
    match size.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) | Err(_) => Err(config_err(format!(
            "Invalid size {size}, expected a positive integer"
        ))),
    }
}

/// Where the bytes of a fresh backing file come from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FillMethod {
    Zero,
    Random,
}

impl FillMethod {
    pub(crate) fn source(self) -> PathBuf {
        PathBuf::from(match self {
            Self::Zero => "/dev/zero",
            Self::Random => "/dev/random",
        })
    }
}

impl FromStr for FillMethod {
    type Err = FwBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "zero" => Self::Zero,
            "random" => Self::Random,
            _ => return Err(config_err(format!("Invalid fill method {s}"))),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TableLabel {
    Msdos,
    Gpt,
}

impl FromStr for TableLabel {
    type Err = FwBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "msdos" => Self::Msdos,
            "gpt" => Self::Gpt,
            _ => return Err(config_err(format!("Unsupported partition table label {s}"))),
        })
    }
}

/// Filesystems the partition table backend knows about
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Filesystem {
    Ext2,
    Ext3,
    Ext4,
    Fat12,
    Fat16,
    Fat32,
    LinuxSwap,
    LinuxSwapV0,
    LinuxSwapV1,
    Btrfs,
    Xfs,
    Ntfs,
}

impl Filesystem {
    /// The type to hand over to mount(2)
    pub(crate) fn mount_type(self) -> &'static str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Fat12 | Self::Fat16 | Self::Fat32 => "vfat",
            Self::LinuxSwap | Self::LinuxSwapV0 | Self::LinuxSwapV1 => "swap",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
            Self::Ntfs => "ntfs",
        }
    }
}

impl FromStr for Filesystem {
    type Err = FwBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "fat12" => Self::Fat12,
            "fat16" => Self::Fat16,
            "fat32" => Self::Fat32,
            "linux-swap" => Self::LinuxSwap,
            "linux-swap(v0)" => Self::LinuxSwapV0,
            "linux-swap(v1)" => Self::LinuxSwapV1,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "ntfs" => Self::Ntfs,
            _ => return Err(config_err(format!("Unknown filesystem type {s}"))),
        })
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Fat12 => "fat12",
            Self::Fat16 => "fat16",
            Self::Fat32 => "fat32",
            Self::LinuxSwap => "linux-swap",
            Self::LinuxSwapV0 => "linux-swap(v0)",
            Self::LinuxSwapV1 => "linux-swap(v1)",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
            Self::Ntfs => "ntfs",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct PartitionFlags {
    pub(crate) boot: bool,
    pub(crate) esp: bool,
    pub(crate) lba: bool,
    pub(crate) required: bool,
}

impl PartitionFlags {
    fn parse(flags: &[String]) -> Result<Self, FwBuilderError> {
        let mut res = Self::default();

        for flag in flags {
            match flag.to_ascii_lowercase().as_str() {
                "boot" => res.boot = true,
                "esp" => res.esp = true,
                "lba" => res.lba = true,
                "required" => res.required = true,
                _ => return Err(config_err(format!("Unknown partition flag {flag}"))),
            }
        }

        Ok(res)
    }
}

/// The whole image to build
#[derive(Clone, Debug)]
pub(crate) struct ImageSpec {
    pub(crate) filename: String,
    pub(crate) size: u64,
    pub(crate) unit: SizeUnit,
    pub(crate) label: TableLabel,
    pub(crate) alignment: Alignment,
    pub(crate) fill_method: FillMethod,
    pub(crate) compression: Option<String>,
    pub(crate) compression_options: Vec<String>,
    pub(crate) timestamp: bool,
    pub(crate) suffix: Option<String>,
}

impl ImageSpec {
    pub(crate) fn size_bytes(&self) -> Result<u64, FwBuilderError> {
        self.unit
            .to_bytes(self.size)
            .ok_or_else(|| config_err(format!("Image size {}{} is too large", self.size, self.unit)))
    }
}

impl TryFrom<&Devices> for ImageSpec {
    type Error = FwBuilderError;

    fn try_from(devices: &Devices) -> Result<Self, Self::Error> {
        if devices.filename.is_empty() || devices.filename.contains('/') {
            return Err(config_err(format!(
                "Invalid image filename {:?}",
                devices.filename
            )));
        }

        let compression = devices
            .compression
            .as_ref()
            .map(|c| c.to_ascii_lowercase())
            .filter(|c| c != "none");

        Ok(Self {
            filename: devices.filename.clone(),
            size: parse_size(&devices.size)?,
            unit: parse_unit(&devices.unit)?,
            label: devices.label.parse()?,
            alignment: devices
                .alignment
                .parse()
                .map_err(|_err| config_err(format!("Invalid alignment {}", devices.alignment)))?,
            fill_method: devices.fill_method.parse()?,
            compression,
            compression_options: devices
                .compression_options
                .as_deref()
                .map(|o| o.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            timestamp: devices.timestamp,
            suffix: devices.suffix.clone(),
        })
    }
}

/// One partition of the image, in on-disk order
#[derive(Clone, Debug)]
pub(crate) struct PartitionSpec {
    pub(crate) name: Option<String>,
    pub(crate) kind: PartitionKind,
    pub(crate) size: u64,
    pub(crate) unit: SizeUnit,
    pub(crate) start_sector: Option<u64>,
    pub(crate) flags: PartitionFlags,
    pub(crate) filesystem: Option<String>,
    pub(crate) format: bool,
    pub(crate) ext_fs_tune: Vec<String>,
    pub(crate) mapping: Option<String>,
}

impl PartitionSpec {
    pub(crate) fn size_lba(&self) -> Result<usize, FwBuilderError> {
        let lba = self.unit.to_lba(self.size).ok_or_else(|| {
            config_err(format!("Partition size {}{} is too large", self.size, self.unit))
        })?;

        usize::try_from(lba)
            .map_err(|_err| config_err(format!("Partition size {lba} sectors is too large")))
    }

    /// Filesystem of the partition, if it's one the backend knows about
    pub(crate) fn known_filesystem(&self) -> Option<Filesystem> {
        self.filesystem.as_deref().and_then(|fs| fs.parse().ok())
    }
}

impl TryFrom<&Partition> for PartitionSpec {
    type Error = FwBuilderError;

    fn try_from(part: &Partition) -> Result<Self, Self::Error> {
        let kind = part
            .kind
            .parse()
            .map_err(|_err| config_err(format!("Invalid partition type {}", part.kind)))?;

        let start_sector = match part.start_sector.as_deref().map(str::trim) {
            None | Some("auto" | "-1") => None,
            Some(s) => Some(
                s.parse::<u64>()
                    .map_err(|_err| config_err(format!("Invalid start sector {s}")))?,
            ),
        };

        Ok(Self {
            name: part.name.clone().filter(|n| !n.is_empty()),
            kind,
            size: parse_size(&part.size)?,
            unit: parse_unit(&part.unit)?,
            start_sector,
            flags: PartitionFlags::parse(&part.flags)?,
            filesystem: part.filesystem.clone(),
            format: part.format,
            ext_fs_tune: part
                .ext_fs_tune
                .as_deref()
                .map(|o| o.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            mapping: part.content_partition_mapping.clone(),
        })
    }
}

/// Parses the partitions of the image
pub(crate) fn parse_partitions(devices: &Devices) -> Result<Vec<PartitionSpec>, FwBuilderError> {
    devices
        .partitions
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            PartitionSpec::try_from(p).map_err(|e| match e {
                FwBuilderError::Config(msg) => config_err(format!("Partition {idx}: {msg}")),
                FwBuilderError::ToolFailure { .. }
                | FwBuilderError::FilesystemState(_)
                | FwBuilderError::InvalidState(_)
                | FwBuilderError::Io(_)
                | FwBuilderError::Yaml(_) => e,
            })
        })
        .collect()
}

/// The banks of a firmware image
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BankName {
    Bank0,
    Bank1,
    Rescue,
    Update,
    Failover,
}

impl BankName {
    pub(crate) fn key(self) -> &'static str {
        match self {
            Self::Bank0 => "bank_0",
            Self::Bank1 => "bank_1",
            Self::Rescue => "rescue",
            Self::Update => "update",
            Self::Failover => "failover",
        }
    }

    pub(crate) fn placeholder(self) -> &'static str {
        match self {
            Self::Bank0 => "BANK_0",
            Self::Bank1 => "BANK_1",
            Self::Rescue => "RESCUE",
            Self::Update => "UPDATE",
            Self::Failover => "FAILOVER",
        }
    }
}

impl fmt::Display for BankName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BankSpec {
    pub(crate) device_type: String,
    pub(crate) device_number_uboot: String,
    pub(crate) device_number_linux: String,
    pub(crate) partition: usize,

    /// Index of the matching [`PartitionSpec`]
    pub(crate) index: usize,
}

impl BankSpec {
    fn parse(
        name: BankName,
        bank: Option<&Bank>,
        numbers: &[usize],
    ) -> Result<Self, FwBuilderError> {
        let bank = bank.ok_or_else(|| {
            config_err(format!("Missing resilience.partitions.{name} definition"))
        })?;

        let missing = |key: &str| config_err(format!("Missing resilience.partitions.{name}.{key}"));

        let partition = bank.partition.as_deref().ok_or_else(|| missing("partition"))?;
        let partition = partition.trim().parse::<usize>().map_err(|_err| {
            config_err(format!(
                "Invalid resilience.partitions.{name}.partition {partition}"
            ))
        })?;

        let index = numbers.iter().position(|n| *n == partition).ok_or_else(|| {
            config_err(format!(
                "resilience.partitions.{name} refers to partition {partition}, which doesn't exist"
            ))
        })?;

        Ok(Self {
            device_type: bank.device_type.clone().ok_or_else(|| missing("device_type"))?,
            device_number_uboot: bank
                .device_number_uboot
                .clone()
                .ok_or_else(|| missing("device_number_uboot"))?,
            device_number_linux: bank
                .device_number_linux
                .clone()
                .ok_or_else(|| missing("device_number_linux"))?,
            partition,
            index,
        })
    }
}

/// Firmware banks layout, only bank 0 being mandatory
#[derive(Clone, Debug)]
pub(crate) struct FirmwareBankLayout {
    pub(crate) dual_banks: bool,
    pub(crate) rescue_image: bool,
    pub(crate) update_partition: bool,

    pub(crate) bank_0: BankSpec,
    pub(crate) bank_1: Option<BankSpec>,
    pub(crate) rescue: Option<BankSpec>,
    pub(crate) update: Option<BankSpec>,
    pub(crate) failover: Option<BankSpec>,
}

impl FirmwareBankLayout {
    /// Validates the resilience tree against the partitions of the image.
    ///
    /// Only the banks enabled by their flag are looked at.
    pub(crate) fn parse(
        resilience: &Resilience,
        partitions: &[PartitionSpec],
    ) -> Result<Self, FwBuilderError> {
        let kinds = partitions.iter().map(|p| p.kind).collect::<Vec<_>>();
        let numbers = partition_numbers(&kinds);
        let banks = &resilience.partitions;

        let gated = |enabled: bool, name: BankName, bank: Option<&Bank>| {
            enabled
                .then(|| BankSpec::parse(name, bank, &numbers))
                .transpose()
        };

        Ok(Self {
            dual_banks: resilience.dual_banks,
            rescue_image: resilience.rescue_image,
            update_partition: resilience.update_partition,
            bank_0: BankSpec::parse(BankName::Bank0, banks.bank_0.as_ref(), &numbers)?,
            bank_1: gated(resilience.dual_banks, BankName::Bank1, banks.bank_1.as_ref())?,
            rescue: gated(resilience.rescue_image, BankName::Rescue, banks.rescue.as_ref())?,
            update: gated(
                resilience.update_partition,
                BankName::Update,
                banks.update.as_ref(),
            )?,
            failover: gated(
                resilience.dual_banks && banks.failover.is_some(),
                BankName::Failover,
                banks.failover.as_ref(),
            )?,
        })
    }

    /// Banks that receive content, in installation order
    pub(crate) fn content_banks(&self) -> Vec<(BankName, &BankSpec)> {
        let mut banks = vec![(BankName::Bank0, &self.bank_0)];

        for (name, bank) in [
            (BankName::Bank1, &self.bank_1),
            (BankName::Rescue, &self.rescue),
            (BankName::Update, &self.update),
        ] {
            if let Some(bank) = bank {
                banks.push((name, bank));
            }
        }

        banks
    }

    /// Every enabled bank, failover included
    pub(crate) fn all_banks(&self) -> Vec<(BankName, &BankSpec)> {
        let mut banks = self.content_banks();

        if let Some(failover) = &self.failover {
            banks.push((BankName::Failover, failover));
        }

        banks
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BootloaderAction {
    pub(crate) source: PathBuf,
    pub(crate) options: Vec<String>,
}

/// Raw writes needed to make the image bootable
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct BootloaderPlan {
    pub(crate) actions: Vec<BootloaderAction>,
}

impl BootloaderPlan {
    /// Returns `None`, with a warning, if the target has no bootloader section
    pub(crate) fn parse(target: &Target) -> Result<Option<Self>, FwBuilderError> {
        let Some(uboot) = target.bsp.as_ref().and_then(|bsp| bsp.uboot.as_ref()) else {
            warn!(
                "No bootloader installation defined for board {}, the image may not boot",
                target.board
            );
            return Ok(None);
        };

        let actions = uboot
            .installation
            .iter()
            .enumerate()
            .map(|(idx, action): (usize, &InstallAction)| {
                let source = action.source.as_ref().ok_or_else(|| {
                    config_err(format!("Bootloader installation step {idx}: Missing source"))
                })?;

                Ok(BootloaderAction {
                    source: PathBuf::from(source),
                    options: action.options.split_whitespace().map(str::to_owned).collect(),
                })
            })
            .collect::<Result<Vec<_>, FwBuilderError>>()?;

        Ok(Some(Self { actions }))
    }
}

/// Returns the kernel number of each partition
pub(crate) fn device_numbers(partitions: &[PartitionSpec]) -> Vec<usize> {
    let kinds = partitions.iter().map(|p| p.kind).collect::<Vec<_>>();

    partition_numbers(&kinds)
}

#[cfg(test)]
mod tests {
    use layout::{Bank, BankPartitions, Devices, Partition, Resilience};
    use part::{PartitionKind, SizeUnit};
    use test_log::test;
    use types::FwBuilderError;

    use super::{
        parse_partitions, BankName, FillMethod, Filesystem, FirmwareBankLayout, ImageSpec,
        PartitionSpec, TableLabel,
    };

    fn partition(kind: &str, size: &str) -> Partition {
        Partition {
            name: None,
            kind: kind.to_owned(),
            size: size.to_owned(),
            unit: String::from("mb"),
            start_sector: None,
            flags: Vec::new(),
            filesystem: None,
            format: true,
            ext_fs_tune: None,
            content_partition_mapping: None,
        }
    }

    fn devices(size: &str, unit: &str) -> Devices {
        Devices {
            filename: String::from("disk.img"),
            size: size.to_owned(),
            unit: unit.to_owned(),
            label: String::from("msdos"),
            alignment: String::from("optimal"),
            fill_method: String::from("zero"),
            compression: None,
            compression_options: None,
            timestamp: false,
            suffix: None,
            partitions: Vec::new(),
        }
    }

    fn bank(partition: &str) -> Bank {
        Bank {
            device_type: Some(String::from("mmc")),
            device_number_uboot: Some(String::from("0")),
            device_number_linux: Some(String::from("1")),
            partition: Some(partition.to_owned()),
        }
    }

    fn primaries(count: usize) -> Vec<PartitionSpec> {
        (0..count)
            .map(|_| PartitionSpec::try_from(&partition("primary", "10")).unwrap())
            .collect()
    }

    #[test]
    fn test_image_spec() {
        let spec = ImageSpec::try_from(&devices("64", "MB")).unwrap();

        assert_eq!(spec.unit, SizeUnit::MegaByte);
        assert_eq!(spec.label, TableLabel::Msdos);
        assert_eq!(spec.fill_method, FillMethod::Zero);
        assert_eq!(spec.size_bytes().unwrap(), 67_108_864);
        assert!(spec.compression.is_none());
    }

    #[test]
    fn test_image_spec_compression_none() {
        let mut devices = devices("64", "mb");
        devices.compression = Some(String::from("None"));

        assert!(ImageSpec::try_from(&devices).unwrap().compression.is_none());
    }

    #[test]
    fn test_image_spec_invalid() {
        for (size, unit) in [("0", "mb"), ("-3", "mb"), ("abc", "mb"), ("64", "pb")] {
            assert!(matches!(
                ImageSpec::try_from(&devices(size, unit)),
                Err(FwBuilderError::Config(_))
            ));
        }

        let mut bad_fill = devices("64", "mb");
        bad_fill.fill_method = String::from("ones");
        ImageSpec::try_from(&bad_fill).unwrap_err();

        let mut bad_label = devices("64", "mb");
        bad_label.label = String::from("sun");
        ImageSpec::try_from(&bad_label).unwrap_err();

        let mut bad_name = devices("64", "mb");
        bad_name.filename = String::from("../disk.img");
        ImageSpec::try_from(&bad_name).unwrap_err();
    }

    #[test]
    fn test_partition_spec_defaults() {
        let spec = PartitionSpec::try_from(&partition("primary", "60")).unwrap();

        assert_eq!(spec.kind, PartitionKind::Primary);
        assert_eq!(spec.size_lba().unwrap(), 122_880);
        assert!(spec.start_sector.is_none());
        assert!(spec.format);
    }

    #[test]
    fn test_partition_spec_start_sector() {
        let mut part = partition("logical", "1");

        for auto in ["auto", "-1"] {
            part.start_sector = Some(auto.to_owned());
            assert!(PartitionSpec::try_from(&part).unwrap().start_sector.is_none());
        }

        part.start_sector = Some(String::from("4096"));
        assert_eq!(PartitionSpec::try_from(&part).unwrap().start_sector, Some(4096));

        part.start_sector = Some(String::from("soon"));
        PartitionSpec::try_from(&part).unwrap_err();
    }

    #[test]
    fn test_partition_spec_invalid() {
        PartitionSpec::try_from(&partition("secondary", "1")).unwrap_err();
        PartitionSpec::try_from(&partition("primary", "1.5")).unwrap_err();

        let mut flags = partition("primary", "1");
        flags.flags = vec![String::from("hidden")];
        PartitionSpec::try_from(&flags).unwrap_err();
    }

    #[test]
    fn test_partition_errors_carry_index() {
        let mut devices = devices("64", "mb");
        devices.partitions = vec![partition("primary", "1"), partition("primary", "x")];

        let err = parse_partitions(&devices).unwrap_err();
        assert!(err.to_string().contains("Partition 1"));
    }

    #[test]
    fn test_filesystem_names() {
        assert_eq!("EXT4".parse::<Filesystem>().unwrap(), Filesystem::Ext4);
        assert_eq!(
            "linux-swap(v1)".parse::<Filesystem>().unwrap(),
            Filesystem::LinuxSwapV1
        );
        assert_eq!(Filesystem::Fat16.mount_type(), "vfat");
        "zfs".parse::<Filesystem>().unwrap_err();
    }

    #[test]
    fn test_firmware_single_bank() {
        let resilience = Resilience {
            partitions: BankPartitions {
                bank_0: Some(bank("1")),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        let layout = FirmwareBankLayout::parse(&resilience, &primaries(2)).unwrap();
        assert_eq!(layout.bank_0.index, 0);
        assert!(layout.bank_1.is_none());

        let banks = layout.content_banks();
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].0, BankName::Bank0);
    }

    #[test]
    fn test_firmware_disabled_banks_not_required() {
        let resilience = Resilience {
            dual_banks: false,
            rescue_image: false,
            partitions: BankPartitions {
                bank_0: Some(bank("1")),
                bank_1: Some(Bank::default()),
                rescue: Some(Bank::default()),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        let layout = FirmwareBankLayout::parse(&resilience, &primaries(1)).unwrap();
        assert!(layout.bank_1.is_none());
        assert!(layout.rescue.is_none());
    }

    #[test]
    fn test_firmware_missing_bank_0() {
        let resilience = Resilience::default();

        FirmwareBankLayout::parse(&resilience, &primaries(1)).unwrap_err();
    }

    #[test]
    fn test_firmware_dual_banks_requires_bank_1() {
        let resilience = Resilience {
            dual_banks: true,
            partitions: BankPartitions {
                bank_0: Some(bank("1")),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        let err = FirmwareBankLayout::parse(&resilience, &primaries(2)).unwrap_err();
        assert!(err.to_string().contains("bank_1"));
    }

    #[test]
    fn test_firmware_missing_key() {
        let mut incomplete = bank("1");
        incomplete.device_number_linux = None;

        let resilience = Resilience {
            partitions: BankPartitions {
                bank_0: Some(incomplete),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        let err = FirmwareBankLayout::parse(&resilience, &primaries(1)).unwrap_err();
        assert!(err.to_string().contains("device_number_linux"));
    }

    #[test]
    fn test_firmware_bank_on_logical() {
        let parts = [
            partition("primary", "1"),
            partition("extended", "10"),
            partition("logical", "4"),
        ]
        .iter()
        .map(|p| PartitionSpec::try_from(p).unwrap())
        .collect::<Vec<_>>();

        let resilience = Resilience {
            dual_banks: true,
            partitions: BankPartitions {
                bank_0: Some(bank("1")),
                bank_1: Some(bank("5")),
                failover: Some(bank("1")),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        let layout = FirmwareBankLayout::parse(&resilience, &parts).unwrap();
        assert_eq!(layout.bank_1.as_ref().unwrap().index, 2);
        assert!(layout.failover.is_some());
        assert_eq!(layout.content_banks().len(), 2);
        assert_eq!(layout.all_banks().len(), 3);
    }

    #[test]
    fn test_firmware_bank_unknown_partition() {
        let resilience = Resilience {
            partitions: BankPartitions {
                bank_0: Some(bank("3")),
                ..BankPartitions::default()
            },
            ..Resilience::default()
        };

        FirmwareBankLayout::parse(&resilience, &primaries(2)).unwrap_err();
    }
}
