use std::{
    fs::{self, File},
    io::{self, BufWriter, Read as _, Write as _},
    path::{Path, PathBuf},
};

use log::{debug, info};
use types::FwBuilderError;

use crate::{host::Host, spec::ImageSpec};

/// Creates the image backing file, filled from the configured source.
pub(crate) fn create_backing_file(path: &Path, spec: &ImageSpec) -> Result<(), FwBuilderError> {
    if path.is_dir() {
        return Err(FwBuilderError::FilesystemState(format!(
            "Image path {} is a directory",
            path.display()
        )));
    }

    if path.exists() {
        debug!("Removing previous image {}", path.display());
        fs::remove_file(path)?;
    }

    let size = spec.size_bytes()?;
    info!(
        "Creating {} ({} x {} bytes blocks)",
        path.display(),
        spec.size,
        spec.unit.block_size()
    );

    let source = File::open(spec.fill_method.source())?;
    let mut output = BufWriter::new(File::create(path)?);

    let written = io::copy(&mut source.take(size), &mut output)?;
    output.flush()?;

    if written != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Only wrote {written} bytes out of {size}"),
        )
        .into());
    }

    debug!("Wrote {written} bytes to {}", path.display());
    Ok(())
}

/// Owns the loop device our image is bound to
#[derive(Debug, Default)]
pub(crate) struct LoopbackManager {
    backing_file: Option<PathBuf>,
    device: Option<PathBuf>,
}

impl LoopbackManager {
    pub(crate) fn new(backing_file: &Path) -> Self {
        Self {
            backing_file: Some(backing_file.to_path_buf()),
            device: None,
        }
    }

    pub(crate) fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.device.is_some()
    }

    /// Binds the backing file to the next free loop device
    pub(crate) fn bind(&mut self, host: &mut dyn Host) -> Result<PathBuf, FwBuilderError> {
        if let Some(device) = &self.device {
            return Err(FwBuilderError::InvalidState(format!(
                "Image already bound to {}",
                device.display()
            )));
        }

        let file = self.backing_file.as_ref().ok_or_else(|| {
            FwBuilderError::InvalidState(String::from("No backing file to bind"))
        })?;

        if !file.is_file() {
            return Err(FwBuilderError::FilesystemState(format!(
                "Backing file {} doesn't exist",
                file.display()
            )));
        }

        let device = host.loop_next_free()?;
        debug!("Using loop device {}", device.display());

        host.loop_attach(&device, file)?;
        info!("Bound {} to {}", file.display(), device.display());

        self.device = Some(device.clone());
        Ok(device)
    }

    /// Releases the loop device. Nothing bound is fine.
    pub(crate) fn release(&mut self, host: &mut dyn Host) -> Result<(), FwBuilderError> {
        let Some(device) = self.device.take() else {
            debug!("No loop device bound, nothing to release");
            return Ok(());
        };

        host.loop_detach(&device)?;
        info!("Released loop device {}", device.display());

        Ok(())
    }
}
