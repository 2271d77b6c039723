//! Well-known locations on the host.

use std::path::{Path, PathBuf};

use crate::err::Error;


/// Transient jail working dirs live here, one per invocation, named
/// with the crate and our pid.
pub(crate) const JAIL_DIR: &str = "/var/run/crate";

/// Cached downloads (just base.txz today).
pub(crate) const CACHE_DIR: &str = "/var/cache/crate";

/// The cross-process firewall users file; see firewall::users.
pub(crate) fn fw_users_file() -> PathBuf
{
	Path::new(JAIL_DIR).join("ctx-firewall-users")
}

/// Where the base archive lands once fetched.
pub(crate) fn base_archive() -> PathBuf
{
	Path::new(CACHE_DIR).join("base.txz")
}

/// Where the base archive comes from: keyed on the host's machine
/// arch and OS release, so the jail runs what the kernel expects.
pub(crate) fn base_archive_url() -> Result<String, anyhow::Error>
{
	let arch = crate::info::sysctl_str("hw.machine")?;
	let rel = crate::info::sysctl_str("kern.osrelease")?;
	Ok(format!(
		"ftp://ftp1.freebsd.org/pub/FreeBSD/snapshots/{arch}/{rel}/base.txz"))
}


// Root-owned 0700; jails and the lock file are nobody else's business.
fn ensure_dir(dir: &Path) -> Result<(), Error>
{
	match crate::util::fs::mkdir(dir, 0o700) {
		Ok(()) => Ok(()),
		Err(_) if dir.is_dir() => Ok(()),
		Err(e) => Err(e),
	}
}

pub(crate) fn ensure_jail_dir() -> Result<(), Error>
{
	ensure_dir(Path::new(JAIL_DIR))
}

pub(crate) fn ensure_cache_dir() -> Result<(), Error>
{
	ensure_dir(Path::new(CACHE_DIR))
}
