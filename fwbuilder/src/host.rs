use core::fmt;
use std::{
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, trace};
use loopdev::{LoopControl, LoopDevice};
use nix::errno::Errno;
use sys_mount::{FilesystemType, Mount, UnmountFlags};
use types::FwBuilderError;

/// An external program invocation
#[derive(Clone, Debug)]
pub(crate) struct ToolCommand {
    program: String,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub(crate) fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub(crate) fn program(&self) -> &str {
        &self.program
    }

    pub(crate) fn get_args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;

        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// What an external program left behind once it exited
#[derive(Clone, Debug, Default)]
pub(crate) struct CommandOutput {
    pub(crate) code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CommandOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub(crate) fn into_failure(self, cmd: &ToolCommand) -> FwBuilderError {
        FwBuilderError::ToolFailure {
            program: cmd.program().to_owned(),
            code: self.code,
            stderr: self.stderr.trim().to_owned(),
        }
    }
}

/// Every side effect the build has on the machine goes through this trait.
pub(crate) trait Host {
    /// Runs a program to completion, whatever its exit status.
    fn run(&mut self, cmd: &ToolCommand) -> Result<CommandOutput, FwBuilderError>;

    /// Runs a program and turns a non-zero exit status into an error.
    fn run_checked(&mut self, cmd: &ToolCommand) -> Result<CommandOutput, FwBuilderError> {
        let output = self.run(cmd)?;

        if output.success() {
            Ok(output)
        } else {
            Err(output.into_failure(cmd))
        }
    }

    fn loop_next_free(&mut self) -> Result<PathBuf, FwBuilderError>;
    fn loop_attach(&mut self, device: &Path, file: &Path) -> Result<(), FwBuilderError>;
    fn loop_detach(&mut self, device: &Path) -> Result<(), FwBuilderError>;

    fn mount(&mut self, source: &Path, target: &Path, fstype: &str)
        -> Result<(), FwBuilderError>;
    fn unmount(&mut self, target: &Path) -> Result<(), FwBuilderError>;
}

impl<T: Host + ?Sized> Host for &mut T {
    fn run(&mut self, cmd: &ToolCommand) -> Result<CommandOutput, FwBuilderError> {
        (**self).run(cmd)
    }

    fn loop_next_free(&mut self) -> Result<PathBuf, FwBuilderError> {
        (**self).loop_next_free()
    }

    fn loop_attach(&mut self, device: &Path, file: &Path) -> Result<(), FwBuilderError> {
        (**self).loop_attach(device, file)
    }

    fn loop_detach(&mut self, device: &Path) -> Result<(), FwBuilderError> {
        (**self).loop_detach(device)
    }

    fn mount(
        &mut self,
        source: &Path,
        target: &Path,
        fstype: &str,
    ) -> Result<(), FwBuilderError> {
        (**self).mount(source, target, fstype)
    }

    fn unmount(&mut self, target: &Path) -> Result<(), FwBuilderError> {
        (**self).unmount(target)
    }
}

/// Returns whether an unmount error only means there was nothing mounted
pub(crate) fn is_not_mounted(err: &FwBuilderError) -> bool {
    match err {
        FwBuilderError::Io(e) => e.raw_os_error() == Some(Errno::EINVAL as i32),
        FwBuilderError::Config(_)
        | FwBuilderError::ToolFailure { .. }
        | FwBuilderError::FilesystemState(_)
        | FwBuilderError::InvalidState(_)
        | FwBuilderError::Yaml(_) => false,
    }
}

/// The machine we're running on
#[derive(Debug, Default)]
pub(crate) struct System;

impl Host for System {
    fn run(&mut self, cmd: &ToolCommand) -> Result<CommandOutput, FwBuilderError> {
        debug!("Running {cmd}");

        let output = Command::new(cmd.program())
            .args(cmd.get_args())
            .output()?;

        let res = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !res.stdout.is_empty() {
            debug!("{} stdout: {}", cmd.program(), res.stdout.trim_end());
        }

        if !res.stderr.is_empty() {
            debug!("{} stderr: {}", cmd.program(), res.stderr.trim_end());
        }

        trace!("{} exited with {:?}", cmd.program(), res.code);

        Ok(res)
    }

    fn loop_next_free(&mut self) -> Result<PathBuf, FwBuilderError> {
        let ctrl = LoopControl::open()?;
        let device = ctrl.next_free()?;

        Ok(device.path().ok_or(io::Error::new(
            io::ErrorKind::NotFound,
            "Loop Device File Not Found",
        ))?)
    }

    fn loop_attach(&mut self, device: &Path, file: &Path) -> Result<(), FwBuilderError> {
        let loop_device = LoopDevice::open(device)?;
        loop_device.with().part_scan(true).attach(file)?;

        debug!(
            "Attached {} to loop device {}",
            file.display(),
            device.display()
        );

        Ok(())
    }

    fn loop_detach(&mut self, device: &Path) -> Result<(), FwBuilderError> {
        LoopDevice::open(device)?.detach()?;

        debug!("Loop device {} detached", device.display());
        Ok(())
    }

    fn mount(
        &mut self,
        source: &Path,
        target: &Path,
        fstype: &str,
    ) -> Result<(), FwBuilderError> {
        debug!(
            "Mounting {} ({fstype}) on {}",
            source.display(),
            target.display()
        );

        Mount::builder()
            .fstype(FilesystemType::Manual(fstype))
            .mount(source, target)?;

        trace!("Mount Successful");
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> Result<(), FwBuilderError> {
        debug!("Unmounting {}", target.display());

        sys_mount::unmount(target, UnmountFlags::empty())?;
        Ok(())
    }
}
