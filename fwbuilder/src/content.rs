use core::mem;
use std::{
    fs,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use layout::ContentKind;
use log::{debug, error, info};
use types::FwBuilderError;

use crate::{
    bootscript::BootScript,
    config::BuildConfig,
    host::{Host, ToolCommand},
    spec::{device_numbers, BankName, PartitionSpec},
    utils::{join_path, partition_device},
};

/// One partition to mount, `target` being relative to the assembled root
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MountEntry {
    pub(crate) target: PathBuf,
    pub(crate) device: PathBuf,
    pub(crate) fstype: &'static str,
}

/// Partitions to mount, in mount order. Parents always come before their
/// children, and unmounting goes the other way around.
#[derive(Clone, Debug, Default)]
pub(crate) struct MountPlan {
    entries: Vec<MountEntry>,
}

impl MountPlan {
    pub(crate) fn from_entries(mut entries: Vec<MountEntry>) -> Self {
        entries.sort_by(|a, b| Ord::cmp(&b.target, &a.target));

        let mut ordered = Vec::with_capacity(entries.len());
        while let Some(entry) = entries.pop() {
            ordered.push(entry);
        }

        Self { entries: ordered }
    }

    /// Builds the plan of the formatted partitions that have a mapping
    pub(crate) fn new(device: &Path, parts: &[PartitionSpec]) -> Result<Self, FwBuilderError> {
        let mut entries = Vec::new();

        for (part, number) in parts.iter().zip(device_numbers(parts)) {
            let Some(mapping) = &part.mapping else {
                continue;
            };

            if !part.format {
                debug!("Partition {number} isn't formatted, ignoring mapping {mapping}");
                continue;
            }

            let fs = part.known_filesystem().ok_or_else(|| {
                FwBuilderError::Config(format!(
                    "Partition {number} is mapped to {mapping} but has no filesystem to mount"
                ))
            })?;

            entries.push(MountEntry {
                target: PathBuf::from(mapping),
                device: partition_device(device, number),
                fstype: fs.mount_type(),
            });
        }

        Ok(Self::from_entries(entries))
    }

    pub(crate) fn mount_order(&self) -> impl Iterator<Item = &MountEntry> {
        self.entries.iter()
    }

    pub(crate) fn unmount_order(&self) -> impl Iterator<Item = &MountEntry> {
        self.entries.iter().rev()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mount points we currently hold, most recent last
#[derive(Debug, Default)]
pub(crate) struct MountTable {
    mounted: Vec<PathBuf>,
}

impl MountTable {
    pub(crate) fn mount(
        &mut self,
        host: &mut dyn Host,
        entry: &MountEntry,
        target: &Path,
    ) -> Result<(), FwBuilderError> {
        fs::create_dir_all(target)?;
        host.mount(&entry.device, target, entry.fstype)?;

        self.mounted.push(target.to_path_buf());
        Ok(())
    }

    /// Unmounts the most recent mount point, and forgets about it once it's gone
    pub(crate) fn unmount_last(&mut self, host: &mut dyn Host) -> Result<(), FwBuilderError> {
        let Some(target) = self.mounted.last() else {
            return Ok(());
        };

        host.unmount(target)?;
        self.mounted.pop();

        Ok(())
    }

    /// Forgets every mount point, without unmounting, most recent first
    pub(crate) fn drain(&mut self) -> Vec<PathBuf> {
        let mut mounted = mem::take(&mut self.mounted);
        mounted.reverse();
        mounted
    }

    pub(crate) fn len(&self) -> usize {
        self.mounted.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }
}

/// Copies every top-level entry of `source` into `dest`, preserving
/// everything `cp -a` preserves.
fn copy_tree(host: &mut dyn Host, source: &Path, dest: &Path) -> Result<(), FwBuilderError> {
    if !source.is_dir() {
        return Err(FwBuilderError::FilesystemState(format!(
            "Content source {} isn't a directory",
            source.display()
        )));
    }

    let mut entries = fs::read_dir(source)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    info!("Copying {} to {}", source.display(), dest.display());

    let mut dest_dir = dest.as_os_str().to_os_string();
    dest_dir.push("/");

    for entry in entries {
        host.run_checked(&ToolCommand::new("cp").arg("-a").arg(&entry).arg(&dest_dir))?;
    }

    Ok(())
}

fn run_fsck(host: &mut dyn Host, device: &Path) -> Result<(), FwBuilderError> {
    let cmd = ToolCommand::new("fsck").args(["-f", "-y"]).arg(device);
    let output = host.run(&cmd)?;

    match output.code {
        Some(0) => Ok(()),
        Some(1) => {
            info!("fsck fixed errors on {}", device.display());
            Ok(())
        }
        Some(_) | None => Err(output.into_failure(&cmd)),
    }
}

/// What a single mount, copy, unmount cycle puts in the image
#[derive(Debug)]
struct Pass<'a> {
    plan: MountPlan,
    source: Option<&'a Path>,
    boot_script: Option<BootScript<'a>>,
}

/// Fills the partitions of the image, then checks them
#[derive(Debug)]
pub(crate) struct ContentInstaller<'a> {
    config: &'a BuildConfig,
    device: &'a Path,
    now: Timestamp,
}

impl<'a> ContentInstaller<'a> {
    pub(crate) fn new(config: &'a BuildConfig, device: &'a Path, now: Timestamp) -> Self {
        Self {
            config,
            device,
            now,
        }
    }

    /// Filesystem the boot script reports for the rootfs
    fn root_filesystem(&self) -> &'a str {
        let config = self.config;
        let parts = &config.partitions;

        parts
            .iter()
            .find(|p| p.mapping.as_deref() == Some("/"))
            .and_then(|p| p.filesystem.as_deref())
            .or_else(|| parts.iter().find_map(|p| p.filesystem.as_deref()))
            .unwrap_or_default()
    }

    fn rootfs_passes(&self) -> Result<Vec<Pass<'a>>, FwBuilderError> {
        let config = self.config;

        Ok(vec![Pass {
            plan: MountPlan::new(self.device, &config.partitions)?,
            source: Some(config.paths.rootfs_mountpoint.as_path()),
            boot_script: BootScript::new(config, self.root_filesystem(), self.now),
        }])
    }

    fn firmware_passes(&self) -> Result<Vec<Pass<'a>>, FwBuilderError> {
        let config = self.config;
        let Some(firmware) = &config.firmware else {
            return Err(FwBuilderError::Config(String::from(
                "Firmware content without a resilience layout",
            )));
        };

        let firmware_dir = config.paths.firmware_dir.as_deref().ok_or_else(|| {
            FwBuilderError::Config(String::from("Firmware content requires paths.firmware_dir"))
        })?;

        firmware
            .content_banks()
            .into_iter()
            .map(|(name, bank)| -> Result<Pass<'a>, FwBuilderError> {
                let part = config.partitions.get(bank.index).ok_or_else(|| {
                    FwBuilderError::Config(format!("{name}: Unknown partition {}", bank.partition))
                })?;

                let fs = part.known_filesystem().ok_or_else(|| {
                    FwBuilderError::Config(format!(
                        "{name}: Partition {} has no filesystem to mount",
                        bank.partition
                    ))
                })?;

                let plan = MountPlan::from_entries(vec![MountEntry {
                    target: PathBuf::from("/"),
                    device: partition_device(self.device, bank.partition),
                    fstype: fs.mount_type(),
                }]);

                Ok(match name {
                    BankName::Bank0 | BankName::Bank1 => Pass {
                        plan,
                        source: Some(firmware_dir),
                        boot_script: BootScript::new(
                            config,
                            part.filesystem.as_deref().unwrap_or_default(),
                            self.now,
                        ),
                    },
                    BankName::Rescue | BankName::Update | BankName::Failover => {
                        info!("{name}: Content installation not yet implemented");

                        Pass {
                            plan,
                            source: None,
                            boot_script: None,
                        }
                    }
                })
            })
            .collect()
    }

    fn fill(&self, host: &mut dyn Host, pass: &Pass<'a>, root: &Path) -> Result<(), FwBuilderError> {
        if let Some(source) = pass.source {
            copy_tree(host, source, root)?;
        }

        if let Some(script) = &pass.boot_script {
            script.generate(host, root)?;
        }

        Ok(())
    }

    fn mount_and_fill(
        &self,
        host: &mut dyn Host,
        mounts: &mut MountTable,
        pass: &Pass<'a>,
        root: &Path,
    ) -> Result<(), FwBuilderError> {
        for entry in pass.plan.mount_order() {
            let target = join_path(root, &entry.target)?;
            mounts.mount(host, entry, &target)?;
        }

        self.fill(host, pass, root)
    }

    /// Our own mounts are always gone once this returns, unless unmounting
    /// itself fails.
    fn run_pass(
        &self,
        host: &mut dyn Host,
        mounts: &mut MountTable,
        pass: &Pass<'a>,
        root: &Path,
    ) -> Result<(), FwBuilderError> {
        let depth = mounts.len();

        if let Err(e) = self.mount_and_fill(host, mounts, pass, root) {
            error!("Content installation failed, unmounting: {e}");

            while mounts.len() > depth {
                if let Err(unmount_err) = mounts.unmount_last(host) {
                    error!("Couldn't unmount: {unmount_err}");
                    break;
                }
            }

            return Err(e);
        }

        while mounts.len() > depth {
            mounts.unmount_last(host)?;
        }

        Ok(())
    }

    /// Mounts, fills and unmounts every partition that receives content,
    /// then checks their filesystems once nothing is mounted anymore.
    pub(crate) fn install(
        &self,
        host: &mut dyn Host,
        mounts: &mut MountTable,
    ) -> Result<(), FwBuilderError> {
        let passes = match self.config.content {
            ContentKind::Rootfs => self.rootfs_passes()?,
            ContentKind::Firmware => self.firmware_passes()?,
        };

        if passes.iter().all(|p| p.plan.is_empty()) {
            info!("No partition to fill");
            return Ok(());
        }

        let work_dir = &self.config.paths.work_dir;
        fs::create_dir_all(work_dir)?;

        let root = tempfile::Builder::new()
            .prefix("fwbuilder-mnt-")
            .tempdir_in(work_dir)?
            .keep()
            .canonicalize()?;
        debug!("Mounting partitions under {}", root.display());

        for pass in &passes {
            self.run_pass(host, mounts, pass, &root)?;
        }

        for pass in &passes {
            for entry in pass.plan.unmount_order() {
                run_fsck(host, &entry.device)?;
            }
        }

        fs::remove_dir_all(&root)?;

        Ok(())
    }
}
