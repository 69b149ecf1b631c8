//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Linux only. Unprivileged mounts go through fusermount3.
//! - Thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use tracing::info;

use super::GridFuse;
use crate::vfs::GridOps;

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("gridfuse");
    mo.uid(nix::unistd::getuid().as_raw());
    mo.gid(nix::unistd::getgid().as_raw());
    mo
}

/// Mount `fs` on an existing directory. Returns once the kernel session is
/// up; await or unmount the handle to tear it down.
#[cfg(target_os = "linux")]
pub async fn mount_gridfs<F: GridOps>(
    fs: GridFuse<F>,
    mount_point: impl AsRef<Path>,
    unprivileged: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let session = rfuse3::raw::Session::new(default_mount_options());
    info!(mount_point = %mount_point.as_ref().display(), unprivileged, "mounting");
    if unprivileged {
        session.mount_with_unprivileged(fs, mount_point).await
    } else {
        session.mount(fs, mount_point).await
    }
}

#[cfg(not(target_os = "linux"))]
pub async fn mount_gridfs<F: GridOps>(
    _fs: GridFuse<F>,
    _mount_point: impl AsRef<Path>,
    _unprivileged: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
