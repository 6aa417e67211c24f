use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::{
    content::MountTable,
    host::{is_not_mounted, Host},
    loopback::LoopbackManager,
};

/// Mount points a chroot into the rootfs needs, in mount order
const CHROOT_MOUNTS: [&str; 3] = ["proc", "dev/pts", "dev/shm"];

/// Puts the machine back the way it was after a build failure.
///
/// Running it again while it's already running does nothing, and so does
/// running it once everything is torn down.
#[derive(Debug, Default)]
pub(crate) struct FailureHandler {
    in_progress: bool,
    chroot_root: Option<PathBuf>,
}

impl FailureHandler {
    /// Also tears down the chroot mounts found under `root`
    pub(crate) fn with_chroot(root: &Path) -> Self {
        Self {
            in_progress: false,
            chroot_root: Some(root.to_path_buf()),
        }
    }

    fn unmount_image(
        &mut self,
        host: &mut dyn Host,
        loopback: &mut LoopbackManager,
        mounts: &mut MountTable,
    ) {
        for target in mounts.drain() {
            match host.unmount(&target) {
                Ok(()) => debug!("Unmounted {}", target.display()),
                Err(e) if is_not_mounted(&e) => {
                    debug!("{} wasn't mounted", target.display());
                }
                Err(e) => {
                    error!("Couldn't unmount {}: {e}", target.display());
                    self.handle(host, loopback, mounts);
                }
            }
        }
    }

    fn unmount_chroot(host: &mut dyn Host, root: &Path) {
        for sub in CHROOT_MOUNTS.iter().rev() {
            let target = root.join(sub);

            match host.unmount(&target) {
                Ok(()) => debug!("Unmounted {}", target.display()),
                Err(e) if is_not_mounted(&e) => {
                    debug!("{} wasn't mounted", target.display());
                }
                Err(e) => error!("Couldn't unmount {}: {e}", target.display()),
            }
        }
    }

    /// Unmounts the image partitions, releases the loop device and tears
    /// down the chroot mounts. Errors are logged, never returned.
    pub(crate) fn handle(
        &mut self,
        host: &mut dyn Host,
        loopback: &mut LoopbackManager,
        mounts: &mut MountTable,
    ) {
        if self.in_progress {
            warn!("Cleanup already in progress");
            return;
        }

        self.in_progress = true;
        info!("Cleaning up");

        if loopback.is_bound() {
            self.unmount_image(host, loopback, mounts);
        }

        if let Err(e) = loopback.release(host) {
            error!("Couldn't release the loop device: {e}");
        }

        if let Some(root) = &self.chroot_root {
            Self::unmount_chroot(host, root);
        }

        self.in_progress = false;
    }
}
