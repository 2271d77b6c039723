//! Jail lifecycle and in-jail command running.
//!
//! Creation goes through jail(8): its parameter language is the same
//! one jail_setv(3) speaks, and -i hands us back the jid we need for
//! jexec and the vnet interface transfer.

use std::path::Path;

use crate::err::Error;
use crate::exec;


/// Numeric jail id, as jexec/ifconfig want it.
pub(crate) type Jid = i32;


/// Create a persistent vnet jail on an extracted tree.  Raw sockets
/// and socket-af follow the net option (ping and friends).
pub(crate) fn create(path: &Path, hostname: &str, allow_net: bool)
		-> Result<Jid, Error>
{
	let net = if allow_net { "true" } else { "false" };
	let cmd = format!(
		"jail -i -c path={} host.hostname={} persist \
		allow.raw_sockets={} allow.socket_af={} vnet=new",
		path.display(), hostname, net, net);

	let out = exec::output(&cmd, "create jail")?;
	out.trim().parse().map_err(|_| Error::ExternalCommand {
		what: "create jail".to_string(),
		detail: format!("jail -i printed no jid (got '{}')", out.trim()),
	})
}


/// Kill a jail off.
pub(crate) fn remove(jid: Jid) -> Result<(), Error>
{
	exec::run(&format!("jail -r {jid}"), "remove jail")
}


/// Run a command inside the jail, as root there.
pub(crate) fn run_in(jid: Jid, cmd: &str, what: &str) -> Result<(), Error>
{
	exec::run(&format!("jexec {jid} {cmd}"), what)
}

/// Same, with stdout dropped (for the chatty ones).
pub(crate) fn run_in_quiet(jid: Jid, cmd: &str, what: &str)
		-> Result<(), Error>
{
	exec::run_quiet(&format!("jexec {jid} {cmd}"), what)
}


/// Run the payload inside the jail as a user with a login environment,
/// returning the raw exit code.
pub(crate) fn run_in_as(jid: Jid, user: &str, cmd: &str, what: &str)
		-> Result<i32, Error>
{
	exec::status(&format!("jexec -l -U {user} {jid} {cmd}"), what)
}
