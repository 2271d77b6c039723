//! External command plumbing.
//!
//! The heavy lifting (tar, xz, pkg, ldd, ifconfig, ipfw, jexec,
//! service...) is all delegated to child processes.  Everything goes
//! through a shell so the pipelines read like the admin would type
//! them; the contract is simply "non-zero exit is fatal".

use std::process::Command;

use crate::err::Error;


fn shell(cmd: &str) -> Command
{
	let mut c = Command::new("/bin/sh");
	c.arg("-c").arg(cmd);
	c
}


/// Run a command, stdio inherited.  Fail on non-zero exit.
pub(crate) fn run(cmd: &str, what: &str) -> Result<(), Error>
{
	let st = shell(cmd).status().map_err(|e| Error::ExternalCommand {
		what: what.to_string(),
		detail: format!("could not spawn: {e}"),
	})?;

	match st.success() {
		true => Ok(()),
		false => Err(Error::ExternalCommand {
			what: what.to_string(),
			detail: format!("the command failed with {st}"),
		}),
	}
}


/// Same, with stdout dropped.  For the chatty in-jail commands.
pub(crate) fn run_quiet(cmd: &str, what: &str) -> Result<(), Error>
{
	run(&format!("{cmd} > /dev/null"), what)
}


/// Run a command and capture stdout (stderr stays on ours).
pub(crate) fn output(cmd: &str, what: &str) -> Result<String, Error>
{
	let out = shell(cmd).output().map_err(|e| Error::ExternalCommand {
		what: what.to_string(),
		detail: format!("could not spawn: {e}"),
	})?;

	if !out.status.success()
	{
		return Err(Error::ExternalCommand {
			what: what.to_string(),
			detail: format!("the command failed with {}", out.status),
		});
	}

	String::from_utf8(out.stdout).map_err(|_| Error::ExternalCommand {
		what: what.to_string(),
		detail: "the command produced non-UTF8 output".to_string(),
	})
}


/// Run a command and hand back its raw exit code; this is how the
/// crate's own payload gets run, and _its_ failures are its business,
/// not ours.  Death-by-signal reports as 128+sig the way shells do.
pub(crate) fn status(cmd: &str, what: &str) -> Result<i32, Error>
{
	let st = shell(cmd).status().map_err(|e| Error::ExternalCommand {
		what: what.to_string(),
		detail: format!("could not spawn: {e}"),
	})?;

	match st.code() {
		Some(c) => Ok(c),
		None => {
			use std::os::unix::process::ExitStatusExt;
			Ok(st.signal().map(|s| 128 + s).unwrap_or(-1))
		},
	}
}


/// The xz invocation, threaded up to the machine.
pub(crate) fn xz_command() -> String
{
	let ncpu = crate::info::sysctl_int("hw.ncpu").unwrap_or(1);
	format!("xz --threads={ncpu}")
}


/// chroot prefix for running a command inside an extracted tree.
/// ASSUME_ALWAYS_YES rides along for the pkg invocations.
pub(crate) fn chroot_prefix(jail: &std::path::Path) -> String
{
	format!("ASSUME_ALWAYS_YES=yes /usr/sbin/chroot {} ", jail.display())
}




#[cfg(test)]
mod tests
{
	#[test]
	fn ok_and_fail()
	{
		super::run("true", "run true").unwrap();
		super::run("false", "run false").unwrap_err();
	}

	#[test]
	fn captured()
	{
		let out = super::output("echo hi there", "echo").unwrap();
		assert_eq!(out, "hi there\n");
	}

	#[test]
	fn raw_status()
	{
		assert_eq!(super::status("exit 0", "t").unwrap(), 0);
		assert_eq!(super::status("exit 42", "t").unwrap(), 42);
	}
}
