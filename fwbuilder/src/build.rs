use core::fmt;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use log::{error, info};
use types::FwBuilderError;

use crate::{
    bootloader,
    cleanup::FailureHandler,
    compress::compress,
    config::BuildConfig,
    content::{ContentInstaller, MountTable},
    format::{format_all, label_all},
    host::Host,
    loopback::{create_backing_file, LoopbackManager},
    parted,
};

/// How far an image build went
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BuildState {
    Created,
    Bound,
    Partitioned,
    Formatted,
    ContentInstalled,
    BootloaderInstalled,
    Released,
    Compressed,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Bound => "bound",
            Self::Partitioned => "partitioned",
            Self::Formatted => "formatted",
            Self::ContentInstalled => "content installed",
            Self::BootloaderInstalled => "bootloader installed",
            Self::Released => "released",
            Self::Compressed => "compressed",
            Self::Failed => "failed",
        })
    }
}

/// Drives a single image build, one stage at a time.
///
/// Any stage failing runs the [`FailureHandler`] before the error is handed
/// back, and leaves the builder in [`BuildState::Failed`].
#[derive(Debug)]
pub(crate) struct ImageBuilder<'a, H: Host> {
    host: H,
    config: &'a BuildConfig,
    now: Timestamp,
    image_path: PathBuf,
    state: BuildState,
    loopback: LoopbackManager,
    mounts: MountTable,
    cleanup: FailureHandler,
}

impl<'a, H: Host> ImageBuilder<'a, H> {
    pub(crate) fn new(
        host: H,
        config: &'a BuildConfig,
        now: Timestamp,
    ) -> Result<Self, FwBuilderError> {
        let image_path = config.prepare_image_path(now)?;

        Ok(Self {
            host,
            config,
            now,
            loopback: LoopbackManager::new(&image_path),
            image_path,
            state: BuildState::Created,
            mounts: MountTable::default(),
            cleanup: FailureHandler::default(),
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> BuildState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn image_path(&self) -> &Path {
        &self.image_path
    }

    #[cfg(test)]
    pub(crate) fn host(&self) -> &H {
        &self.host
    }

    fn device(&self) -> Result<PathBuf, FwBuilderError> {
        self.loopback
            .device()
            .map(Path::to_path_buf)
            .ok_or_else(|| FwBuilderError::InvalidState(String::from("No loop device bound")))
    }

    fn fail(&mut self) {
        self.state = BuildState::Failed;
        self.cleanup
            .handle(&mut self.host, &mut self.loopback, &mut self.mounts);
    }

    fn stage<T>(
        &mut self,
        expected: BuildState,
        next: BuildState,
        f: impl FnOnce(&mut Self) -> Result<T, FwBuilderError>,
    ) -> Result<T, FwBuilderError> {
        if self.state != expected {
            return Err(FwBuilderError::InvalidState(format!(
                "Can't move to {next} from {}, expected {expected}",
                self.state
            )));
        }

        match f(self) {
            Ok(v) => {
                info!("Image {next}");
                self.state = next;
                Ok(v)
            }
            Err(e) => {
                error!("Build failed while {expected}: {e}");
                self.fail();
                Err(e)
            }
        }
    }

    /// Creates the backing file and binds it to a loop device
    pub(crate) fn bind(&mut self) -> Result<PathBuf, FwBuilderError> {
        self.stage(BuildState::Created, BuildState::Bound, |b| {
            create_backing_file(&b.image_path, &b.config.image)?;
            b.loopback.bind(&mut b.host)
        })
    }

    pub(crate) fn partition(&mut self) -> Result<(), FwBuilderError> {
        self.stage(BuildState::Bound, BuildState::Partitioned, |b| {
            let device = b.device()?;

            parted::apply(
                &mut b.host,
                &device,
                &b.config.image,
                &b.config.partitions,
            )
        })
    }

    pub(crate) fn format(&mut self) -> Result<(), FwBuilderError> {
        self.stage(BuildState::Partitioned, BuildState::Formatted, |b| {
            let device = b.device()?;

            format_all(&mut b.host, &device, &b.config.partitions)?;
            label_all(&mut b.host, &device, &b.config.partitions)
        })
    }

    pub(crate) fn install_content(&mut self) -> Result<(), FwBuilderError> {
        self.stage(BuildState::Formatted, BuildState::ContentInstalled, |b| {
            let device = b.device()?;

            ContentInstaller::new(b.config, &device, b.now).install(&mut b.host, &mut b.mounts)
        })
    }

    pub(crate) fn install_bootloader(&mut self) -> Result<(), FwBuilderError> {
        self.stage(
            BuildState::ContentInstalled,
            BuildState::BootloaderInstalled,
            |b| {
                let device = b.device()?;

                bootloader::install(
                    &mut b.host,
                    &b.config.paths,
                    &device,
                    b.config.bootloader.as_ref(),
                )
            },
        )
    }

    pub(crate) fn release(&mut self) -> Result<(), FwBuilderError> {
        self.stage(BuildState::BootloaderInstalled, BuildState::Released, |b| {
            b.loopback.release(&mut b.host)
        })
    }

    /// Returns the path of the final image
    pub(crate) fn compress(&mut self) -> Result<PathBuf, FwBuilderError> {
        self.stage(BuildState::Released, BuildState::Compressed, |b| {
            let image = &b.config.image;

            b.image_path = compress(
                &mut b.host,
                &b.image_path,
                image.compression.as_deref(),
                &image.compression_options,
            )?;

            Ok(b.image_path.clone())
        })
    }

    /// Goes through every stage, and returns the path of the final image
    pub(crate) fn run(&mut self) -> Result<PathBuf, FwBuilderError> {
        info!("Building {}", self.image_path.display());

        self.bind()?;
        self.partition()?;
        self.format()?;
        self.install_content()?;
        self.install_bootloader()?;
        self.release()?;
        self.compress()
    }
}

impl<H: Host> Drop for ImageBuilder<'_, H> {
    fn drop(&mut self) {
        if self.loopback.is_bound() {
            error!("Image builder dropped with a loop device still bound");
            self.cleanup
                .handle(&mut self.host, &mut self.loopback, &mut self.mounts);
        }
    }
}
