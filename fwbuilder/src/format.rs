use std::path::Path;

use log::{debug, error, info};
use types::FwBuilderError;

use crate::{
    host::{Host, ToolCommand},
    spec::{device_numbers, Filesystem, PartitionSpec},
    utils::partition_device,
};

fn mkfs_command(fs: Filesystem, node: &Path) -> Option<ToolCommand> {
    Some(match fs {
        Filesystem::Ext2 => ToolCommand::new("mkfs.ext2").arg("-F").arg(node),
        Filesystem::Ext3 => ToolCommand::new("mkfs.ext3").arg("-F").arg(node),
        Filesystem::Ext4 => ToolCommand::new("mkfs.ext4").arg("-F").arg(node),
        Filesystem::Fat12 => ToolCommand::new("mkfs.vfat").args(["-F", "12"]).arg(node),
        Filesystem::Fat16 => ToolCommand::new("mkfs.vfat").args(["-F", "16"]).arg(node),
        Filesystem::Fat32 => ToolCommand::new("mkfs.vfat").args(["-F", "32"]).arg(node),
        Filesystem::LinuxSwap | Filesystem::LinuxSwapV0 | Filesystem::LinuxSwapV1 => {
            ToolCommand::new("mkswap").arg(node)
        }
        Filesystem::Btrfs | Filesystem::Xfs | Filesystem::Ntfs => return None,
    })
}

fn is_ext(fs: Filesystem) -> bool {
    matches!(fs, Filesystem::Ext2 | Filesystem::Ext3 | Filesystem::Ext4)
}

/// Creates the filesystems of every partition of `device`
pub(crate) fn format_all(
    host: &mut dyn Host,
    device: &Path,
    parts: &[PartitionSpec],
) -> Result<(), FwBuilderError> {
    for (part, number) in parts.iter().zip(device_numbers(parts)) {
        let node = partition_device(device, number);

        let Some(fs) = part.known_filesystem() else {
            debug!("{}: No filesystem to create", node.display());
            continue;
        };

        if !part.format {
            debug!("{}: Formatting disabled, skipping", node.display());
            continue;
        }

        let Some(cmd) = mkfs_command(fs, &node) else {
            info!("{}: Don't know how to create {fs}, skipping", node.display());
            continue;
        };

        info!("Creating {fs} filesystem on {}", node.display());
        host.run_checked(&cmd)?;

        if is_ext(fs) && !part.ext_fs_tune.is_empty() {
            debug!("Tuning {} with {:?}", node.display(), part.ext_fs_tune);

            host.run_checked(
                &ToolCommand::new("tune2fs")
                    .args(&part.ext_fs_tune)
                    .arg(&node),
            )?;
        }
    }

    Ok(())
}

/// Sets the filesystem label of every named partition of `device`
pub(crate) fn label_all(
    host: &mut dyn Host,
    device: &Path,
    parts: &[PartitionSpec],
) -> Result<(), FwBuilderError> {
    for (part, number) in parts.iter().zip(device_numbers(parts)) {
        let Some(name) = &part.name else {
            continue;
        };

        let node = partition_device(device, number);

        if !part.format {
            error!(
                "{}: Can't label {name}, the partition isn't formatted",
                node.display()
            );
            continue;
        }

        let cmd = match part.known_filesystem() {
            Some(fs) if is_ext(fs) => ToolCommand::new("e2label").arg(&node).arg(name),
            Some(Filesystem::Fat32) => ToolCommand::new("fatlabel").arg(&node).arg(name),
            Some(_) | None => {
                error!(
                    "{}: Labels aren't supported on {}",
                    node.display(),
                    part.filesystem.as_deref().unwrap_or("unformatted partitions")
                );
                continue;
            }
        };

        info!("Labelling {} as {name}", node.display());
        host.run_checked(&cmd)?;
    }

    Ok(())
}
