use std::{
    fs::File,
    io::{Seek as _, SeekFrom},
    path::Path,
};

use gpt::{
    GuidPartitionBuilder, GuidPartitionTableBuilder, EFI_SYSTEM_PART_GUID,
    LINUX_FILESYSTEM_DATA_GUID, LINUX_SWAP_GUID, MICROSOFT_BASIC_DATA_GUID,
};
use log::{debug, info};
use mbr::{
    MasterBootRecordPartitionBuilder, MasterBootRecordPartitionTableBuilder,
    EXTENDED_LBA_PARTITION_TYPE, EXTENDED_PARTITION_TYPE,
};
use part::{
    build_layout, check_layout, num_cast, round_up, PartitionKind, PartitionLayout, PartitionLayoutHint,
    LBA_SIZE,
};
use types::FwBuilderError;
use uuid::Uuid;

use crate::{
    host::{Host, ToolCommand},
    spec::{Filesystem, ImageSpec, PartitionSpec, TableLabel},
};

const MBR_FIRST_USABLE_LBA: usize = 1;

/// Where a partition lands on the device
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PlannedPartition {
    pub(crate) layout: PartitionLayout,

    /// LBA of the EBR describing a logical partition
    pub(crate) ebr_lba: Option<usize>,
}

fn layout_err(err: &std::io::Error) -> FwBuilderError {
    FwBuilderError::Config(format!("Invalid partition layout: {err}"))
}

fn to_lba(part: &PartitionSpec, idx: usize) -> Result<Option<usize>, FwBuilderError> {
    part.start_sector
        .map(|s| {
            usize::try_from(s).map_err(|_err| {
                FwBuilderError::Config(format!("Partition {idx}: Start sector {s} is too large"))
            })
        })
        .transpose()
}

/// Resolves the filesystem of every partition, before anything is queued.
fn resolve_filesystems(parts: &[PartitionSpec]) -> Result<Vec<Option<Filesystem>>, FwBuilderError> {
    parts
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            p.filesystem
                .as_deref()
                .map(|fs| {
                    fs.parse::<Filesystem>().map_err(|_err| {
                        FwBuilderError::Config(format!(
                            "Partition {idx}: Filesystem {fs} isn't supported by the partition table backend"
                        ))
                    })
                })
                .transpose()
        })
        .collect()
}

fn plan_gpt(
    grain: usize,
    parts: &[PartitionSpec],
    blocks: usize,
) -> Result<Vec<PlannedPartition>, FwBuilderError> {
    let last_usable_lba = gpt::last_usable_lba(blocks)
        .filter(|last| *last >= gpt::FIRST_USABLE_LBA)
        .ok_or_else(|| FwBuilderError::Config(String::from("Device is too small for a GPT")))?;

    let hints = parts
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            if p.kind != PartitionKind::Primary {
                return Err(FwBuilderError::Config(format!(
                    "Partition {idx}: GPT only supports primary partitions"
                )));
            }

            Ok(PartitionLayoutHint {
                offset_lba: to_lba(p, idx)?,
                size_lba: p.size_lba()?,
            })
        })
        .collect::<Result<Vec<_>, FwBuilderError>>()?;

    Ok(
        build_layout(gpt::FIRST_USABLE_LBA, last_usable_lba, grain, &hints)
            .map_err(|e| layout_err(&e))?
            .into_iter()
            .map(|layout| PlannedPartition {
                layout,
                ebr_lba: None,
            })
            .collect(),
    )
}

fn plan_msdos(
    grain: usize,
    parts: &[PartitionSpec],
    blocks: usize,
) -> Result<Vec<PlannedPartition>, FwBuilderError> {
    if blocks <= MBR_FIRST_USABLE_LBA {
        return Err(FwBuilderError::Config(String::from(
            "Device is too small for a partition table",
        )));
    }

    let mut planned = Vec::with_capacity(parts.len());
    let mut cursor = MBR_FIRST_USABLE_LBA;
    let mut extended: Option<PartitionLayout> = None;

    for (idx, part) in parts.iter().enumerate() {
        let offset = to_lba(part, idx)?;
        let size = part.size_lba()?;

        let (start_lba, ebr_lba) = match part.kind {
            PartitionKind::Primary | PartitionKind::Extended => {
                if let Some(ext) = extended {
                    if ext.contains(&PartitionLayout {
                        start_lba: cursor,
                        end_lba: cursor,
                    }) {
                        cursor = ext.end_lba + 1;
                    }
                }

                (offset.unwrap_or_else(|| round_up(cursor, grain)), None)
            }
            PartitionKind::Logical => {
                if extended.is_none() {
                    return Err(FwBuilderError::Config(format!(
                        "Partition {idx}: Logical partition without an extended partition"
                    )));
                }

                let ebr = cursor;
                let start = offset.unwrap_or_else(|| round_up(ebr + 1, grain));
                if start <= ebr {
                    return Err(FwBuilderError::Config(format!(
                        "Partition {idx}: Logical partition must start after its EBR at sector {ebr}"
                    )));
                }

                (start, Some(ebr))
            }
        };

        let layout = PartitionLayout {
            start_lba,
            end_lba: start_lba + size - 1,
        };
        debug!(
            "Partition {idx} ({}): LBAs {} to {}",
            part.kind, layout.start_lba, layout.end_lba
        );

        if part.kind == PartitionKind::Extended {
            if extended.is_some() {
                return Err(FwBuilderError::Config(format!(
                    "Partition {idx}: Only one extended partition is allowed"
                )));
            }

            extended = Some(layout);
            cursor = layout.start_lba;
        } else {
            cursor = layout.end_lba + 1;
        }

        planned.push(PlannedPartition { layout, ebr_lba });
    }

    let entries = Iterator::zip(parts.iter(), planned.iter())
        .filter(|(p, _)| p.kind != PartitionKind::Logical)
        .map(|(_, planned)| planned.layout)
        .collect::<Vec<_>>();

    check_layout(MBR_FIRST_USABLE_LBA, blocks - 1, &entries).map_err(|e| layout_err(&e))?;

    Ok(planned)
}

/// Computes the geometry of every partition, in order
pub(crate) fn plan(
    spec: &ImageSpec,
    parts: &[PartitionSpec],
    blocks: usize,
) -> Result<Vec<PlannedPartition>, FwBuilderError> {
    let grain = spec.alignment.grain_lba();

    match spec.label {
        TableLabel::Msdos => plan_msdos(grain, parts, blocks),
        TableLabel::Gpt => plan_gpt(grain, parts, blocks),
    }
}

fn mbr_type(part: &PartitionSpec, fs: Option<Filesystem>) -> u8 {
    let lba = part.flags.lba;

    if part.kind == PartitionKind::Extended {
        return if lba {
            EXTENDED_LBA_PARTITION_TYPE
        } else {
            EXTENDED_PARTITION_TYPE
        };
    }

    match fs {
        Some(Filesystem::Fat12) => 0x01,
        Some(Filesystem::Fat16) => {
            if lba {
                0x0e
            } else {
                0x06
            }
        }
        Some(Filesystem::Fat32) => {
            if lba {
                0x0c
            } else {
                0x0b
            }
        }
        Some(Filesystem::LinuxSwap | Filesystem::LinuxSwapV0 | Filesystem::LinuxSwapV1) => 0x82,
        Some(Filesystem::Ntfs) => 0x07,
        Some(Filesystem::Ext2 | Filesystem::Ext3 | Filesystem::Ext4 | Filesystem::Btrfs | Filesystem::Xfs)
        | None => 0x83,
    }
}

fn gpt_type(part: &PartitionSpec, fs: Option<Filesystem>) -> Uuid {
    if part.flags.esp {
        return EFI_SYSTEM_PART_GUID;
    }

    match fs {
        Some(Filesystem::Fat12 | Filesystem::Fat16 | Filesystem::Fat32 | Filesystem::Ntfs) => {
            MICROSOFT_BASIC_DATA_GUID
        }
        Some(Filesystem::LinuxSwap | Filesystem::LinuxSwapV0 | Filesystem::LinuxSwapV1) => {
            LINUX_SWAP_GUID
        }
        Some(Filesystem::Ext2 | Filesystem::Ext3 | Filesystem::Ext4 | Filesystem::Btrfs | Filesystem::Xfs)
        | None => LINUX_FILESYSTEM_DATA_GUID,
    }
}

fn write_msdos(
    file: &File,
    parts: &[PartitionSpec],
    filesystems: &[Option<Filesystem>],
    planned: &[PlannedPartition],
) -> Result<(), FwBuilderError> {
    let mut builder = MasterBootRecordPartitionTableBuilder::new();

    for ((part, fs), planned) in parts.iter().zip(filesystems).zip(planned) {
        let entry = MasterBootRecordPartitionBuilder::new(mbr_type(part, *fs))
            .offset(planned.layout.start_lba)
            .size_lba(planned.layout.size_lba())
            .bootable(part.flags.boot)
            .build();

        builder = match planned.ebr_lba {
            Some(ebr) => builder.add_logical_partition(ebr, entry),
            None => builder.add_partition(entry),
        };
    }

    builder.build().write(file)?;
    Ok(())
}

fn write_gpt(
    file: &File,
    parts: &[PartitionSpec],
    filesystems: &[Option<Filesystem>],
    planned: &[PlannedPartition],
) -> Result<(), FwBuilderError> {
    let mut builder = GuidPartitionTableBuilder::new();

    for ((part, fs), planned) in parts.iter().zip(filesystems).zip(planned) {
        let mut entry = GuidPartitionBuilder::new(gpt_type(part, *fs))
            .offset(planned.layout.start_lba)
            .size_lba(planned.layout.size_lba())
            .bootable(part.flags.boot)
            .platform_required(part.flags.required);

        if let Some(name) = &part.name {
            entry = entry.name(name);
        }

        builder = builder.add_partition(entry.build());
    }

    builder.build().write(file)?;
    Ok(())
}

/// Writes a fresh partition table on `device`, in a single commit, and has
/// the kernel re-read it.
pub(crate) fn apply(
    host: &mut dyn Host,
    device: &Path,
    spec: &ImageSpec,
    parts: &[PartitionSpec],
) -> Result<(), FwBuilderError> {
    let filesystems = resolve_filesystems(parts)?;

    let mut file = File::options().read(true).write(true).open(device)?;
    let len = file.seek(SeekFrom::End(0))?;
    let blocks = num_cast!(usize, len) / LBA_SIZE;
    debug!("Device {} has {blocks} sectors", device.display());

    let planned = plan(spec, parts, blocks)?;

    match spec.label {
        TableLabel::Msdos => write_msdos(&file, parts, &filesystems, &planned)?,
        TableLabel::Gpt => write_gpt(&file, parts, &filesystems, &planned)?,
    }
    drop(file);

    info!(
        "Wrote {:?} partition table with {} partitions to {}",
        spec.label,
        parts.len(),
        device.display()
    );

    host.run_checked(&ToolCommand::new("partprobe").arg(device))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{self, File},
        io::{Read as _, Seek as _, SeekFrom},
        path::Path,
    };

    use part::{Alignment, PartitionKind, SizeUnit};
    use tempfile::NamedTempFile;
    use test_log::test;
    use types::FwBuilderError;

    use super::{apply, plan, PlannedPartition};
    use crate::{
        host::fake::FakeHost,
        spec::{FillMethod, ImageSpec, PartitionFlags, PartitionSpec, TableLabel},
    };

    const BLOCKS: usize = 131_072;

    fn image(label: TableLabel, alignment: Alignment) -> ImageSpec {
        ImageSpec {
            filename: String::from("disk.img"),
            size: 64,
            unit: SizeUnit::MegaByte,
            label,
            alignment,
            fill_method: FillMethod::Zero,
            compression: None,
            compression_options: Vec::new(),
            timestamp: false,
            suffix: None,
        }
    }

    fn partition(kind: PartitionKind, size_mb: u64, fs: Option<&str>) -> PartitionSpec {
        PartitionSpec {
            name: None,
            kind,
            size: size_mb,
            unit: SizeUnit::MegaByte,
            start_sector: None,
            flags: PartitionFlags::default(),
            filesystem: fs.map(str::to_owned),
            format: true,
            ext_fs_tune: Vec::new(),
            mapping: None,
        }
    }

    fn starts(planned: &[PlannedPartition]) -> Vec<(usize, Option<usize>)> {
        planned
            .iter()
            .map(|p| (p.layout.start_lba, p.ebr_lba))
            .collect()
    }

    fn read_sector(path: &Path, lba: usize) -> Vec<u8> {
        let mut file = File::open(path).unwrap();
        let mut buf = vec![0; 512];

        file.seek(SeekFrom::Start((lba * 512) as u64)).unwrap();
        file.read_exact(&mut buf).unwrap();
        buf
    }

    fn disk() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len((BLOCKS * 512) as u64).unwrap();
        file
    }

    #[test]
    fn test_plan_single_partition() {
        let planned = plan(
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[partition(PartitionKind::Primary, 60, Some("ext4"))],
            BLOCKS,
        )
        .unwrap();

        assert_eq!(planned[0].layout.start_lba, 2048);
        assert_eq!(planned[0].layout.size_lba(), 122_880);
    }

    #[test]
    fn test_plan_alignment() {
        let parts = [
            partition(PartitionKind::Primary, 1, None),
            partition(PartitionKind::Primary, 1, None),
        ];

        let optimal = plan(&image(TableLabel::Msdos, Alignment::Optimal), &parts, BLOCKS).unwrap();
        assert_eq!(starts(&optimal), [(2048, None), (4096, None)]);

        let minimal = plan(&image(TableLabel::Msdos, Alignment::Minimal), &parts, BLOCKS).unwrap();
        assert_eq!(starts(&minimal), [(1, None), (2049, None)]);

        let cylinder =
            plan(&image(TableLabel::Msdos, Alignment::Cylinder), &parts, BLOCKS).unwrap();
        assert_eq!(starts(&cylinder), [(1008, None), (3024, None)]);
    }

    #[test]
    fn test_plan_explicit_start() {
        let mut first = partition(PartitionKind::Primary, 1, None);
        first.start_sector = Some(63);

        let planned = plan(
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[first, partition(PartitionKind::Primary, 1, None)],
            BLOCKS,
        )
        .unwrap();

        assert_eq!(starts(&planned), [(63, None), (4096, None)]);
    }

    #[test]
    fn test_plan_logicals() {
        let parts = [
            partition(PartitionKind::Primary, 8, None),
            partition(PartitionKind::Extended, 32, None),
            partition(PartitionKind::Logical, 8, None),
            partition(PartitionKind::Logical, 8, None),
            partition(PartitionKind::Primary, 8, None),
        ];

        let planned = plan(&image(TableLabel::Msdos, Alignment::Optimal), &parts, BLOCKS).unwrap();
        assert_eq!(
            starts(&planned),
            [
                (2048, None),
                (18_432, None),
                (20_480, Some(18_432)),
                (38_912, Some(36_864)),
                (83_968, None),
            ]
        );
    }

    #[test]
    fn test_plan_logical_without_extended() {
        plan(
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[partition(PartitionKind::Logical, 8, None)],
            BLOCKS,
        )
        .unwrap_err();
    }

    #[test]
    fn test_plan_overflow() {
        plan(
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[partition(PartitionKind::Primary, 64, None)],
            BLOCKS,
        )
        .unwrap_err();
    }

    #[test]
    fn test_plan_gpt() {
        let planned = plan(
            &image(TableLabel::Gpt, Alignment::Optimal),
            &[
                partition(PartitionKind::Primary, 8, None),
                partition(PartitionKind::Primary, 8, None),
            ],
            BLOCKS,
        )
        .unwrap();
        assert_eq!(starts(&planned), [(2048, None), (18_432, None)]);

        plan(
            &image(TableLabel::Gpt, Alignment::Optimal),
            &[partition(PartitionKind::Extended, 8, None)],
            BLOCKS,
        )
        .unwrap_err();
    }

    #[test]
    fn test_apply_msdos() {
        let disk = disk();
        let mut host = FakeHost::new(disk.path());

        let mut boot = partition(PartitionKind::Primary, 8, Some("fat32"));
        boot.flags.boot = true;
        boot.flags.lba = true;

        apply(
            &mut host,
            disk.path(),
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[boot, partition(PartitionKind::Primary, 32, Some("ext4"))],
        )
        .unwrap();

        let mbr = read_sector(disk.path(), 0);
        assert_eq!(&mbr[510..], &[0x55, 0xaa]);
        assert_eq!(mbr[446], 0x80);
        assert_eq!(mbr[446 + 4], 0x0c);
        assert_eq!(mbr[462 + 4], 0x83);
        assert_eq!(u32::from_le_bytes(mbr[470..474].try_into().unwrap()), 18_432);

        assert_eq!(
            host.commands(),
            [format!("partprobe {}", disk.path().display())]
        );
    }

    #[test]
    fn test_apply_gpt() {
        let disk = disk();
        let mut host = FakeHost::new(disk.path());

        let mut esp = partition(PartitionKind::Primary, 8, Some("fat32"));
        esp.flags.esp = true;
        esp.name = Some(String::from("efi"));

        apply(
            &mut host,
            disk.path(),
            &image(TableLabel::Gpt, Alignment::Optimal),
            &[esp],
        )
        .unwrap();

        assert_eq!(&read_sector(disk.path(), 1)[0..8], b"EFI PART");
        assert_eq!(host.count("run partprobe"), 1);
    }

    #[test]
    fn test_apply_unknown_filesystem() {
        let disk = disk();
        let mut host = FakeHost::new(disk.path());

        let res = apply(
            &mut host,
            disk.path(),
            &image(TableLabel::Msdos, Alignment::Optimal),
            &[
                partition(PartitionKind::Primary, 8, Some("ext4")),
                partition(PartitionKind::Primary, 8, Some("zfs")),
            ],
        );

        assert!(matches!(res, Err(FwBuilderError::Config(_))));
        assert!(fs::read(disk.path()).unwrap().iter().all(|b| *b == 0));
        assert!(host.events.is_empty());
    }
}
