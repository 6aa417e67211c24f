use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use log::{debug, info};
use tempfile::NamedTempFile;
use types::{Architecture, FwBuilderError};

use crate::{
    config::BuildConfig,
    host::{Host, ToolCommand},
    spec::FirmwareBankLayout,
};

const BOOT_SCRIPTS_DIR: &str = "boot-scripts";
const GENERIC_TEMPLATE: &str = "generic.cmd";
const BOOT_SCRIPT_NAME: &str = "boot.scr";
const AUXILIARY_FILES: [&str; 2] = ["kernel_cmdline_extra_parameters.txt", "uEnv.txt"];

fn flag(val: bool) -> String {
    String::from(if val { "1" } else { "0" })
}

/// A U-Boot script, rendered from the board template
#[derive(Debug)]
pub(crate) struct BootScript<'a> {
    templates_dir: &'a Path,
    board: &'a str,
    arch: Architecture,
    version: &'a str,
    filesystem: &'a str,
    generated: Timestamp,
    firmware: Option<&'a FirmwareBankLayout>,
}

impl<'a> BootScript<'a> {
    /// Returns `None` if the project doesn't want a boot script
    pub(crate) fn new(
        config: &'a BuildConfig,
        filesystem: &'a str,
        generated: Timestamp,
    ) -> Option<Self> {
        if !config.generate_boot_script {
            return None;
        }

        Some(Self {
            templates_dir: config.paths.templates_dir.as_deref()?,
            board: &config.board,
            arch: config.arch,
            version: &config.version,
            filesystem,
            generated,
            firmware: config.firmware.as_ref(),
        })
    }

    fn substitutions(&self) -> Vec<(String, String)> {
        let mut subs = vec![
            (
                String::from("__FILESYSTEM_TYPE__"),
                self.filesystem.to_owned(),
            ),
            (String::from("__BUILD_VERSION__"), self.version.to_owned()),
            (
                String::from("__GENERATION_DATE__"),
                self.generated.strftime("%Y-%m-%d %H:%M:%S").to_string(),
            ),
        ];

        let Some(firmware) = self.firmware else {
            return subs;
        };

        subs.push((String::from("__DUAL_BANKS__"), flag(firmware.dual_banks)));
        subs.push((String::from("__RESCUE_IMAGE__"), flag(firmware.rescue_image)));
        subs.push((
            String::from("__UPDATE_PARTITION__"),
            flag(firmware.update_partition),
        ));

        for (name, bank) in firmware.all_banks() {
            let key = name.placeholder();

            subs.push((format!("__{key}_DEVICE_TYPE__"), bank.device_type.clone()));
            subs.push((
                format!("__{key}_DEVICE_NUMBER_UBOOT__"),
                bank.device_number_uboot.clone(),
            ));
            subs.push((
                format!("__{key}_DEVICE_NUMBER_LINUX__"),
                bank.device_number_linux.clone(),
            ));
            subs.push((format!("__{key}_PARTITION__"), bank.partition.to_string()));
        }

        subs
    }

    /// Replaces every known placeholder of `template`
    pub(crate) fn render(&self, template: &str) -> String {
        self.substitutions()
            .into_iter()
            .fold(template.to_owned(), |text, (from, to)| text.replace(&from, &to))
    }

    fn template_path(&self) -> Result<PathBuf, FwBuilderError> {
        let dir = self.templates_dir.join(BOOT_SCRIPTS_DIR);

        let board = dir.join(format!("{}.cmd", self.board));
        if board.is_file() {
            return Ok(board);
        }

        debug!(
            "No boot script template for {}, using the generic one",
            self.board
        );

        let generic = dir.join(GENERIC_TEMPLATE);
        if generic.is_file() {
            return Ok(generic);
        }

        Err(FwBuilderError::Config(format!(
            "No boot script template found in {}",
            dir.display()
        )))
    }

    /// Renders the template, wraps it for U-Boot into `<root>/boot/boot.scr`
    /// and installs the auxiliary files next to it.
    pub(crate) fn generate(&self, host: &mut dyn Host, root: &Path) -> Result<(), FwBuilderError> {
        let template = self.template_path()?;
        debug!("Using boot script template {}", template.display());

        let mut scratch = NamedTempFile::new()?;
        scratch.write_all(self.render(&fs::read_to_string(&template)?).as_bytes())?;
        scratch.flush()?;

        let boot_dir = root.join("boot");
        fs::create_dir_all(&boot_dir)?;

        host.run_checked(
            &ToolCommand::new("mkimage")
                .args(["-A", self.arch.as_mkimage_str()])
                .args(["-O", "linux", "-T", "script", "-C", "none"])
                .args(["-n", BOOT_SCRIPT_NAME, "-d"])
                .arg(scratch.path())
                .arg(boot_dir.join(BOOT_SCRIPT_NAME)),
        )?;

        for name in AUXILIARY_FILES {
            let src = self.templates_dir.join(BOOT_SCRIPTS_DIR).join(name);
            debug!("Copying {} to {}", src.display(), boot_dir.display());

            fs::copy(&src, boot_dir.join(name))?;
        }

        info!("Boot script installed in {}", boot_dir.display());
        Ok(())
    }
}
