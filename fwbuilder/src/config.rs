use std::{
    fs,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use layout::{ContentKind, Paths, Project, ToolConfig};
use log::debug;
use types::{Architecture, FwBuilderError};

use crate::spec::{
    parse_partitions, BootloaderPlan, FirmwareBankLayout, ImageSpec, PartitionSpec,
};

/// Directories the build reads from and writes to
#[derive(Clone, Debug)]
pub(crate) struct BuildPaths {
    pub(crate) image_dir: PathBuf,
    pub(crate) work_dir: PathBuf,
    pub(crate) rootfs_mountpoint: PathBuf,
    pub(crate) firmware_dir: Option<PathBuf>,
    pub(crate) bsp_dir: Option<PathBuf>,
    pub(crate) templates_dir: Option<PathBuf>,
}

impl BuildPaths {
    fn from_paths(paths: Paths) -> Result<Self, FwBuilderError> {
        let required = |path: Option<PathBuf>, key: &str| {
            path.ok_or_else(|| FwBuilderError::Config(format!("Missing paths.{key}")))
        };

        Ok(Self {
            image_dir: required(paths.image_dir, "image_dir")?,
            work_dir: required(paths.work_dir, "work_dir")?,
            rootfs_mountpoint: required(paths.rootfs_mountpoint, "rootfs_mountpoint")?,
            firmware_dir: paths.firmware_dir,
            bsp_dir: paths.bsp_dir,
            templates_dir: paths.templates_dir,
        })
    }
}

/// Everything a build needs to know, checked once before it starts
#[derive(Clone, Debug)]
pub(crate) struct BuildConfig {
    pub(crate) version: String,
    pub(crate) content: ContentKind,
    pub(crate) generate_boot_script: bool,
    pub(crate) board: String,
    pub(crate) arch: Architecture,
    pub(crate) paths: BuildPaths,
    pub(crate) image: ImageSpec,
    pub(crate) partitions: Vec<PartitionSpec>,
    pub(crate) firmware: Option<FirmwareBankLayout>,
    pub(crate) bootloader: Option<BootloaderPlan>,
}

impl BuildConfig {
    /// Loads and validates a project, with the tool configuration providing
    /// default paths.
    pub(crate) fn load(project: &Path, config_file: Option<&Path>) -> Result<Self, FwBuilderError> {
        debug!("Loading project {}", project.display());
        let project = Project::from_file(project)?;

        let tool_config = if let Some(path) = config_file {
            debug!("Loading tool configuration {}", path.display());
            ToolConfig::from_file(path)?
        } else {
            ToolConfig::default()
        };

        Self::from_project(project, tool_config)
    }

    pub(crate) fn from_project(
        project: Project,
        tool_config: ToolConfig,
    ) -> Result<Self, FwBuilderError> {
        let paths = BuildPaths::from_paths(project.paths.or(tool_config.paths))?;

        let target = project
            .targets
            .first()
            .ok_or_else(|| FwBuilderError::Config(String::from("No target defined")))?;

        let image = ImageSpec::try_from(&project.devices)?;
        let partitions = parse_partitions(&project.devices)?;

        let firmware = match project.content {
            ContentKind::Rootfs => None,
            ContentKind::Firmware => {
                if paths.firmware_dir.is_none() {
                    return Err(FwBuilderError::Config(String::from(
                        "Firmware content requires paths.firmware_dir",
                    )));
                }

                let resilience = project.resilience.as_ref().ok_or_else(|| {
                    FwBuilderError::Config(String::from(
                        "Firmware content requires a resilience section",
                    ))
                })?;

                Some(FirmwareBankLayout::parse(resilience, &partitions)?)
            }
        };

        if project.generate_boot_script && paths.templates_dir.is_none() {
            return Err(FwBuilderError::Config(String::from(
                "Boot script generation requires paths.templates_dir",
            )));
        }

        Ok(Self {
            bootloader: BootloaderPlan::parse(target)?,
            version: project.version,
            content: project.content,
            generate_boot_script: project.generate_boot_script,
            board: target.board.clone(),
            arch: target.arch,
            paths,
            image,
            partitions,
            firmware,
        })
    }

    /// Directory the image of this build goes to
    pub(crate) fn image_dir(&self) -> PathBuf {
        self.paths
            .image_dir
            .join(format!("{}-{}-{}", self.board, self.arch, self.version))
    }

    /// Path of the image file, before compression
    pub(crate) fn image_path(&self, now: Timestamp) -> PathBuf {
        let mut filename = self.image.filename.clone();

        if self.image.timestamp {
            filename.push('.');
            filename.push_str(&now.strftime("%Y%m%d%H%M%S").to_string());
        }

        if let Some(suffix) = &self.image.suffix {
            filename.push('.');
            filename.push_str(suffix);
        }

        self.image_dir().join(filename)
    }

    /// Creates the image directory, and returns the image path
    pub(crate) fn prepare_image_path(&self, now: Timestamp) -> Result<PathBuf, FwBuilderError> {
        let dir = self.image_dir();

        if dir.exists() && !dir.is_dir() {
            return Err(FwBuilderError::FilesystemState(format!(
                "{} exists and isn't a directory",
                dir.display()
            )));
        }

        fs::create_dir_all(&dir)?;

        Ok(self.image_path(now))
    }
}
