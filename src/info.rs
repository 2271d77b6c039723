//! Info about (and pokes at) the kernel and host.

use anyhow::anyhow;


/// Read an int sysctl.
pub(crate) fn sysctl_int(name: &str) -> Result<i32, anyhow::Error>
{
	use sysctl::{Ctl, Sysctl as _};

	let ctl = Ctl::new(name)
			.map_err(|e| anyhow!("sysctl {}: {}", name, e))?;
	let val = ctl.value()
			.map_err(|e| anyhow!("{} value: {}", name, e))?;

	let iv = val.as_int()
			.ok_or_else(|| anyhow!("{} not int?  {:?}", name, val))?;
	Ok(*iv)
}


/// Read a string sysctl.
pub(crate) fn sysctl_str(name: &str) -> Result<String, anyhow::Error>
{
	use sysctl::{Ctl, Sysctl as _};

	let ctl = Ctl::new(name)
			.map_err(|e| anyhow!("sysctl {}: {}", name, e))?;
	let sv = ctl.value_string()
			.map_err(|e| anyhow!("{} string: {}", name, e))?;

	Ok(sv)
}


/// Set an int sysctl.  Root-only, obviously.
pub(crate) fn sysctl_set_int(name: &str, value: i32)
		-> Result<(), anyhow::Error>
{
	use sysctl::{Ctl, CtlValue, Sysctl as _};

	let ctl = Ctl::new(name)
			.map_err(|e| anyhow!("sysctl {}: {}", name, e))?;
	ctl.set_value(CtlValue::Int(value))
			.map_err(|e| anyhow!("set {} = {}: {}", name, value, e))?;
	Ok(())
}


/// Are we in a jail?  Running jails from inside jails isn't a thing
/// we do.
pub(crate) fn jailed() -> Result<bool, anyhow::Error>
{
	Ok(sysctl_int("security.jail.jailed")? == 1)
}


/// Host's hostname; the jail inherits it.
pub(crate) fn hostname() -> Result<String, anyhow::Error>
{
	let hn = hostname::get()
			.map_err(|e| anyhow!("gethostname: {e}"))?;
	Ok(hn.to_string_lossy().into_owned())
}


/// Make sure a kernel module is loaded, loading it on demand.  This
/// is one of the two sanctioned recoveries in the whole program.
pub(crate) fn ensure_kld_loaded(name: &str) -> Result<(), anyhow::Error>
{
	use crate::exec;

	// kldstat -q exits 0 iff the module (or something providing it)
	// is present.
	let present = exec::status(&format!("kldstat -q -m {name}"),
			"check for kernel module")? == 0;
	if !present
	{
		crate::util::plog(format!("loading kernel module {name}"));
		exec::run(&format!("kldload {name}"),
				&format!("load the {name} kernel module"))?;
	}
	Ok(())
}
