//! Pre-flight checks for bstrace
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() and setrlimit() require unsafe

use anyhow::{bail, Context, Result};
use log::debug;
use std::path::Path;

use crate::loader::ModuleBundle;

/// Minimum kernel version required for the BPF ring buffer
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// bpffs magic as reported by `statfs`
const BPF_FS_MAGIC: i64 = 0xcafe_4a11;

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// The first unmet requirement, with a hint on how to fix it.
pub fn run_preflight_checks(modules: &Path, pin_path: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_bpffs(pin_path)?;
    check_bundle(modules)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: bstrace requires root privileges to load eBPF programs.\n\n\
         Run with: sudo bstrace ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             bstrace requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check that pins can be created: the nearest existing ancestor of
/// `pin_path` must live on a bpf filesystem.
fn check_bpffs(pin_path: &Path) -> Result<()> {
    let existing = pin_path.ancestors().find(|p| p.exists()).unwrap_or(Path::new("/"));
    let c_path = std::ffi::CString::new(existing.as_os_str().as_encoded_bytes())
        .with_context(|| format!("Invalid pin path: {}", pin_path.display()))?;

    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to stat {}", existing.display()));
    }

    #[allow(clippy::unnecessary_cast, clippy::cast_possible_wrap)]
    if stat.f_type as i64 != BPF_FS_MAGIC {
        bail!(
            "{} is not on a bpf filesystem.\n\n\
             Mount one with: mount -t bpf bpf /sys/fs/bpf\n\
             or pass --pin-path <DIR> inside an existing bpffs mount.",
            existing.display()
        );
    }
    Ok(())
}

/// Check the module bundle is staged
fn check_bundle(modules: &Path) -> Result<()> {
    ModuleBundle::new(modules).check().with_context(|| {
        format!(
            "Probe modules not found in {}\n\n\
             Build them with: cargo xtask build-ebpf",
            modules.display()
        )
    })
}

/// Lift the locked-memory limit for kernels that still charge BPF maps to it
pub fn bump_memlock_rlimit() {
    let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version_check() {
        // Don't assert success since test might run on old kernel
        let _ = check_kernel_version();
    }

    #[test]
    fn test_parse_release() {
        assert_eq!(parse_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_release("5.8rc1"), Some((5, 8)));
        assert_eq!(parse_release("6"), None);
        assert_eq!(parse_release("unknown"), None);
    }

    #[test]
    fn test_bundle_not_found() {
        let err = check_bundle(Path::new("/nonexistent/bstrace-modules")).unwrap_err();
        assert!(format!("{err:#}").contains("cargo xtask build-ebpf"));
    }

    #[test]
    fn test_tmp_is_not_bpffs() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_bpffs(&dir.path().join("pins")).unwrap_err();
        assert!(err.to_string().contains("not on a bpf filesystem"));
    }
}
