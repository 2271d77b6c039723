//! Error kinds.
//!
//! Everything fatal funnels into one of these; anyhow carries them up
//! with a location tag (e.g. "creating a crate: ...") and main paints
//! the result red.  Nothing here is ever silently eaten; the only
//! recoveries in the whole program are the EPERM-unflag retry in
//! util::fs and the ipfw_nat load-on-demand in check.

use std::path::PathBuf;


#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum Error
{
	/// The spec (or an argument derived from it) is no good.
	#[error("{0}")]
	Config(String),

	/// Filesystem-level failure.
	#[error("failed to {what} {}: {err}", .path.display())]
	Io {
		what: &'static str,
		path: PathBuf,
		#[source]
		err: std::io::Error,
	},

	/// A raw syscall went sideways.
	#[error("system call {syscall}({arg}) failed: {err}")]
	Sys {
		syscall: &'static str,
		arg: String,
		err: String,
	},

	/// A child command exited non-zero (or didn't exit at all).
	#[error("failed to {what}: {detail}")]
	ExternalCommand {
		what: String,
		detail: String,
	},

	/// We're not in a position to do this at all (not root, jailed,
	/// kernel missing a feature).
	#[error("{0}")]
	Policy(String),
}


impl Error
{
	/// Shorthand for the Io variant; the call sites read better.
	pub(crate) fn io(what: &'static str, path: impl Into<PathBuf>,
			err: std::io::Error) -> Self
	{
		Self::Io { what, path: path.into(), err }
	}

	pub(crate) fn sys(syscall: &'static str, arg: impl Into<String>,
			errno: i32) -> Self
	{
		let err = std::io::Error::from_raw_os_error(errno).to_string();
		Self::Sys { syscall, arg: arg.into(), err }
	}
}


/// Yell about something advisory.  Yellow, stderr, and we move on.
pub(crate) fn warn(msg: impl AsRef<str>)
{
	use colored::Colorize as _;
	eprintln!("{}", msg.as_ref().yellow());
}
