//! Misc util funcs

/// Filesystem stuff (low-level wrappers and tree removal)
pub(crate) mod fs;



use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::OnceLock;
use std::time::Instant;

use uzers::os::unix::UserExt;


// We chown things back to whoever invoked us, so the real uid/gid get
// captured once at startup, before the early setuid() makes getuid()
// useless for that purpose.
static CALLER_UID: AtomicU32 = AtomicU32::new(0);
static CALLER_GID: AtomicU32 = AtomicU32::new(0);

pub(crate) fn set_caller_ids()
{
	use std::sync::atomic::Ordering::Relaxed;
	CALLER_UID.store(uzers::get_current_uid(), Relaxed);
	CALLER_GID.store(uzers::get_current_gid(), Relaxed);
}

pub(crate) fn caller_uid() -> u32
{
	use std::sync::atomic::Ordering::Relaxed;
	CALLER_UID.load(Relaxed)
}

pub(crate) fn caller_gid() -> u32
{
	use std::sync::atomic::Ordering::Relaxed;
	CALLER_GID.load(Relaxed)
}


/// Name of the invoking user, from the environment like the rest of
/// the identity bits we surface into the jail.
pub(crate) fn username() -> Result<String, anyhow::Error>
{
	match std::env::var("USER") {
		Ok(u) if !u.is_empty() => Ok(u),
		_ => Err(crate::err::Error::Policy(
				"USER is not set in the environment".to_string()).into()),
	}
}



/*
 * Progress logging (-p / --log-progress).  Dimmed "sec.ms: msg" lines
 * timed from process start.
 */

static PROGRESS: AtomicBool = AtomicBool::new(false);
static STARTED: OnceLock<Instant> = OnceLock::new();

pub(crate) fn set_progress(on: bool)
{
	use std::sync::atomic::Ordering::Relaxed;
	let _ = STARTED.set(Instant::now());
	PROGRESS.store(on, Relaxed);
}

/// Elapsed seconds.millis since startup, for the progress lines.
fn elapsed() -> String
{
	let el = STARTED.get_or_init(Instant::now).elapsed();
	format!("{}.{:03}", el.as_secs(), el.subsec_millis())
}

pub(crate) fn plog(msg: impl AsRef<str>)
{
	use std::sync::atomic::Ordering::Relaxed;
	if !PROGRESS.load(Relaxed) { return }

	use colored::Colorize as _;
	eprintln!("{}", format!("{}: {}", elapsed(), msg.as_ref()).dimmed());
}



/// Append paths.
///
/// Path::join() treats joining an absolute path as _replacing_ the
/// base.  We're always treating the base as a sort of chroot here, so
/// that behavior is never what we want.
pub(crate) fn path_join(base: impl AsRef<Path>, sub: impl AsRef<Path>)
		-> PathBuf
{
	let sub = match sub.as_ref().strip_prefix("/") {
		Ok(x) => x,
		Err(_) => sub.as_ref(),
	};
	base.as_ref().join(sub)
}


/// Substitute $HOME at the front of a path with the invoking caller's
/// home dir.  That's the only variable the spec language knows.  The
/// environment wins; passwd is the fallback when HOME isn't set.
pub(crate) fn substitute_vars(path: &str) -> String
{
	match path.strip_prefix("$HOME") {
		Some(rest) => format!("{}{}", caller_home(), rest),
		None => path.to_string(),
	}
}

/// The invoking caller's home directory on the host.
pub(crate) fn caller_home() -> String
{
	match std::env::var("HOME") {
		Ok(h) if !h.is_empty() => h,
		_ => uzers::get_user_by_uid(caller_uid())
				.map(|u| u.home_dir().to_string_lossy().into_owned())
				.unwrap_or_else(|| "/root".to_string()),
	}
}



/// Everything past the _first_ dot of the final component goes, so
/// "gimp.crate" -> "gimp" and "app.tar.xz" -> "app".  Used for naming
/// jail dirs.
pub(crate) fn file_bare_name(path: impl AsRef<Path>) -> String
{
	let base = file_name(path);
	match base.find('.') {
		Some(i) => base[..i].to_string(),
		None => base,
	}
}

/// Just the final path component.
pub(crate) fn file_name(path: impl AsRef<Path>) -> String
{
	path.as_ref().file_name()
			.map(|f| f.to_string_lossy().into_owned())
			.unwrap_or_default()
}




#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn join()
	{
		let j = path_join("/jail/x", "/usr/bin/env");
		assert_eq!(j, PathBuf::from("/jail/x/usr/bin/env"));

		// Relative subs append too
		let j = path_join("/jail/x", "usr/bin/env");
		assert_eq!(j, PathBuf::from("/jail/x/usr/bin/env"));
	}

	#[test]
	fn bare_name()
	{
		assert_eq!(file_bare_name("/a/b/gimp.crate"), "gimp");
		assert_eq!(file_bare_name("app.tar.xz"), "app");
		assert_eq!(file_bare_name("/x/noext"), "noext");
	}

	#[test]
	fn fname()
	{
		assert_eq!(file_name("/a/b/gimp.crate"), "gimp.crate");
		assert_eq!(file_name("plain"), "plain");
	}

	#[test]
	fn subst()
	{
		super::set_caller_ids();

		// Non-$HOME paths pass through untouched
		assert_eq!(substitute_vars("/usr/local/bin/x"), "/usr/local/bin/x");

		// $HOME gets replaced with something absolute
		let s = substitute_vars("$HOME/.config");
		assert!(s.ends_with("/.config"));
		assert!(s.starts_with('/'));
		assert!(!s.contains('$'));
	}
}
