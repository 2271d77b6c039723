//! Runtime precondition checks.

use crate::err::Error;


/// Things that have to hold before we touch anything: we must be
/// effectively root (jails, mounts, ipfw), and must not ourselves be
/// inside a jail.  Also captures the invoking caller's uid/gid and
/// then pins real==effective uid for the children we spawn.
pub(crate) fn policy() -> Result<(), anyhow::Error>
{
	// Who called us, before we touch uids
	crate::util::set_caller_ids();

	if uzers::get_effective_uid() != 0
	{
		return Err(Error::Policy(
				"must be run as root (jails, mounts and firewall rules \
				need it)".to_string()).into());
	}

	if crate::info::jailed()?
	{
		return Err(Error::Policy(
				"refusing to run inside a jail".to_string()).into());
	}

	// setuid(geteuid()) so children don't see a split identity
	let res = unsafe { libc::setuid(libc::geteuid()) };
	if res != 0
	{
		return Err(Error::sys("setuid", "geteuid()",
				std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
				.into());
	}

	Ok(())
}


/// What the `net` option needs from the kernel.  The module load and
/// the forwarding flip are the intrusive bits; both get logged.
pub(crate) fn net_preconditions() -> Result<(), anyhow::Error>
{
	// vnet jails need VIMAGE
	if crate::info::sysctl_int("kern.features.vimage").unwrap_or(0) == 0
	{
		return Err(Error::Policy(
				"the crate needs network access, but the VIMAGE feature \
				isn't available in the kernel (kern.features.vimage==0)"
				.to_string()).into());
	}

	// ipfw's NAT wants its kernel module
	crate::info::ensure_kld_loaded("ipfw_nat")?;

	// Forwarding has to be on for the jail's packets to move.  We
	// don't restore it on exit: another running crate may still be
	// depending on it.
	if crate::info::sysctl_int("net.inet.ip.forwarding")? == 0
	{
		crate::util::plog(
				"setting net.inet.ip.forwarding=1 (not restored on exit)");
		crate::info::sysctl_set_int("net.inet.ip.forwarding", 1)?;
	}

	Ok(())
}
