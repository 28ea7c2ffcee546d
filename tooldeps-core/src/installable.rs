// tooldeps-core/src/installable.rs
//! "Is it there; if not and allowed, install it" for the external tools the
//! engine bootstraps itself (conda, involucro).
use std::path::PathBuf;
use std::time::Duration;

use tooldeps_common::error::Result;
use tooldeps_io::fs::{create_dir_all, is_writable_dir};
use tooldeps_io::lock::with_file_lock;
use tracing::{debug, error, warn};

pub trait InstallableContext {
    fn is_installed(&self) -> bool;

    /// Preconditions for an install attempt (platform, empty target dir).
    fn can_install(&self) -> bool;

    fn installable_description(&self) -> &str;

    /// Directory the installable lives in; also holds its install lock.
    fn parent_path(&self) -> PathBuf;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    AutoInitDisabled,
    CannotInstall,
    Installed,
    /// An install ran but the post-install check still failed.
    InstallFailed,
}

impl InstallOutcome {
    pub fn is_installed(self) -> bool {
        matches!(self, Self::AlreadyInstalled | Self::Installed)
    }
}

pub fn lock_path(ctx: &(impl InstallableContext + ?Sized)) -> PathBuf {
    ctx.parent_path()
        .join(ctx.installable_description().to_lowercase())
}

/// Install `ctx` with `install` unless it is present already. When an install
/// may happen, the whole check runs under a lock at
/// `parent_path/description.to_lowercase()` so concurrent processes queue
/// up; failing to get that lock within `lock_timeout` is `DepsError::Lock`.
pub fn ensure_installed<C, F>(
    ctx: &C,
    install: F,
    auto_init: bool,
    lock_timeout: Duration,
) -> Result<InstallOutcome>
where
    C: InstallableContext + ?Sized,
    F: FnOnce() -> Result<()>,
{
    let parent = ctx.parent_path();
    if !parent.exists() {
        create_dir_all(&parent)?;
    }

    if auto_init && is_writable_dir(&parent) {
        let path = lock_path(ctx);
        with_file_lock(&path, lock_timeout, || check_and_install(ctx, install, auto_init))
    } else {
        Ok(check_and_install(ctx, install, auto_init))
    }
}

fn check_and_install<C, F>(ctx: &C, install: F, auto_init: bool) -> InstallOutcome
where
    C: InstallableContext + ?Sized,
    F: FnOnce() -> Result<()>,
{
    let desc = ctx.installable_description();
    if ctx.is_installed() {
        debug!("{} already installed", desc);
        return InstallOutcome::AlreadyInstalled;
    }
    if !auto_init {
        warn!("{} not installed and auto-installation disabled.", desc);
        return InstallOutcome::AutoInitDisabled;
    }
    if !ctx.can_install() {
        warn!("{} not installed and cannot be installed here.", desc);
        return InstallOutcome::CannotInstall;
    }

    debug!("Installing {} under {}", desc, ctx.parent_path().display());
    if let Err(e) = install() {
        error!("{} installation requested and failed: {}", desc, e);
        return InstallOutcome::InstallFailed;
    }
    if ctx.is_installed() {
        InstallOutcome::Installed
    } else {
        warn!("{} installation requested, seemed to succeed, but not found.", desc);
        InstallOutcome::InstallFailed
    }
}
