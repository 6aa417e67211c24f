use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use log::{info, warn};
use types::FwBuilderError;

use crate::{
    config::BuildPaths,
    host::{Host, ToolCommand},
    spec::{BootloaderAction, BootloaderPlan},
    utils::join_path,
};

/// Finds the file an installation step writes. Absolute paths live in the
/// rootfs, relative ones in the BSP directory.
fn resolve_source(paths: &BuildPaths, source: &Path) -> Result<PathBuf, FwBuilderError> {
    let resolved = if source.is_absolute() {
        join_path(&paths.rootfs_mountpoint, source)?
    } else {
        let bsp_dir = paths.bsp_dir.as_ref().ok_or_else(|| {
            FwBuilderError::Config(format!(
                "Bootloader source {} is relative, but paths.bsp_dir isn't set",
                source.display()
            ))
        })?;

        bsp_dir.join(source)
    };

    if !resolved.is_absolute() {
        return Err(FwBuilderError::Config(format!(
            "Bootloader source {} doesn't resolve to an absolute path",
            source.display()
        )));
    }

    if !resolved.is_file() {
        return Err(FwBuilderError::FilesystemState(format!(
            "Bootloader source {} doesn't exist",
            resolved.display()
        )));
    }

    Ok(resolved)
}

fn write_action(
    host: &mut dyn Host,
    paths: &BuildPaths,
    device: &Path,
    action: &BootloaderAction,
) -> Result<(), FwBuilderError> {
    let source = resolve_source(paths, &action.source)?;
    info!(
        "Writing {} to {} ({})",
        source.display(),
        device.display(),
        action.options.join(" ")
    );

    let mut input = OsString::from("if=");
    input.push(&source);

    let mut output = OsString::from("of=");
    output.push(device);

    host.run_checked(
        &ToolCommand::new("dd")
            .arg(input)
            .arg(output)
            .args(&action.options),
    )?;

    Ok(())
}

/// Writes the bootloader binaries to the raw device, in order
pub(crate) fn install(
    host: &mut dyn Host,
    paths: &BuildPaths,
    device: &Path,
    plan: Option<&BootloaderPlan>,
) -> Result<(), FwBuilderError> {
    let Some(plan) = plan else {
        warn!("No bootloader to install, the image may not boot");
        return Ok(());
    };

    for action in &plan.actions {
        write_action(host, paths, device, action)?;
    }

    Ok(())
}
