//! ipfw rule orchestration for jail networking.
//!
//! Rule numbering: inbound rules sit at a lower base than outbound so
//! redirections get evaluated first.  Within a jail's outbound block
//! the order is whitewashes, then bans, then the catch-all NAT.  The
//! common outbound NAT rule is shared by every running jail and
//! refcounted through the users file (see users).

pub(crate) mod users;

use std::net::Ipv4Addr;

use crate::err::Error;
use crate::exec;
use crate::spec::NetOpts;


/// Inbound rules come first; out rules later so redirections win.
const RULE_BASE_IN: u32 = 19000;
const RULE_BASE_OUT: u32 = 59000;


/// Everything the rule generator needs to know about one jail's
/// networking.
#[derive(Debug, Clone)]
pub(crate) struct FwConfig
{
	/// Epair index; keys the per-jail rule numbers.
	pub(crate) epair_index: u32,

	/// Jail-side epair address (the redirect target).
	pub(crate) epair_ip_b: Ipv4Addr,

	/// Gateway interface and its address/LAN.
	pub(crate) gw_iface: String,
	pub(crate) host_ip: Ipv4Addr,
	pub(crate) host_lan: String,

	/// Set when outbound DNS is allowed.
	pub(crate) nameserver: Option<Ipv4Addr>,

	pub(crate) net: NetOpts,
}


impl FwConfig
{
	/// Per-jail inbound rule (and NAT instance) number.
	pub(crate) fn rule_in(&self) -> u32
	{
		RULE_BASE_IN + 1 + self.epair_index
	}

	/// The shared outbound rule/NAT number.
	pub(crate) fn rule_out_common(&self) -> u32
	{
		RULE_BASE_OUT
	}

	/// Per-jail outbound rule number.
	pub(crate) fn rule_out(&self) -> u32
	{
		RULE_BASE_OUT + 1 + self.epair_index
	}


	/// The inbound block: one NAT instance configured with every
	/// port redirection, plus an in-recv and out-xmit rule per range.
	pub(crate) fn inbound_commands(&self) -> Vec<String>
	{
		let mut cmds = Vec::new();
		if !self.net.allow_inbound() { return cmds }

		let (nat, rule) = (self.rule_in(), self.rule_in());
		let (ip_b, host) = (self.epair_ip_b, self.host_ip);

		let mut config = format!("nat {nat} config");
		for (proto, maps) in [("tcp", &self.net.inbound_tcp),
				("udp", &self.net.inbound_udp)]
		{
			for (host_r, jail_r) in maps
			{
				config.push_str(&format!(
					" redirect_port {proto} {ip_b}:{jail_r} {host}:{host_r}"));
			}
		}
		cmds.push(config);

		for (proto, maps) in [("tcp", &self.net.inbound_tcp),
				("udp", &self.net.inbound_udp)]
		{
			for (host_r, jail_r) in maps
			{
				cmds.push(format!(
					"add {rule} nat {nat} {proto} from any to {host} {host_r} \
					in recv {}", self.gw_iface));
				cmds.push(format!(
					"add {rule} nat {nat} {proto} from {ip_b} {jail_r} to any \
					out xmit {}", self.gw_iface));
			}
		}
		cmds
	}


	/// The shared outbound block: NAT through the host address, and
	/// the return-traffic hook.  Installed only by the first user.
	pub(crate) fn outbound_common_commands(&self) -> Vec<String>
	{
		let nat = self.rule_out_common();
		vec![
			format!("nat {nat} config ip {}", self.host_ip),
			format!("add {nat} nat {nat} all from any to {} in recv {}",
					self.host_ip, self.gw_iface),
		]
	}


	/// This jail's outbound block: DNS whitewash (or ban), host/LAN
	/// bans, then NAT everything else out.
	pub(crate) fn outbound_commands(&self) -> Vec<String>
	{
		let mut cmds = Vec::new();
		if !self.net.allow_outbound() { return cmds }

		let rule = self.rule_out();
		let nat = self.rule_out_common();
		let ip_b = self.epair_ip_b;
		let ifc = &self.gw_iface;

		if self.net.outbound_dns
		{
			// Resolver is reachable; everything else claiming to be
			// DNS isn't
			if let Some(ns) = self.nameserver
			{
				cmds.push(format!(
					"add {rule} nat {nat} udp from {ip_b} to {ns} 53 \
					out xmit {ifc}"));
				cmds.push(format!(
					"add {rule} allow udp from {ip_b} to {ns} 53"));
			}
		}
		cmds.push(format!("add {rule} deny udp from {ip_b} to any 53"));

		if !self.net.outbound_host
		{ cmds.push(format!("add {rule} deny ip from {ip_b} to me")); }
		if !self.net.outbound_lan
		{
			cmds.push(format!("add {rule} deny ip from {ip_b} to {}",
					self.host_lan));
		}

		cmds.push(format!(
			"add {rule} nat {nat} all from {ip_b} to any out xmit {ifc}"));
		cmds
	}
}


fn ipfw(cmd: &str) -> Result<(), Error>
{
	exec::run(&format!("ipfw -q {cmd}"), "add firewall rule")
}


/// Install this jail's rules.  The common outbound rules go in only
/// on the empty -> non-empty edge of the users set, under its lock.
pub(crate) fn install(fw: &FwConfig) -> Result<(), anyhow::Error>
{
	for cmd in fw.inbound_commands()
	{ ipfw(&cmd)?; }

	if fw.net.allow_outbound()
	{
		{
			let mut fwusers = users::FwUsers::lock(&crate::locs::fw_users_file())?;
			if fwusers.is_empty()?
			{
				for cmd in fw.outbound_common_commands()
				{ ipfw(&cmd)?; }
			}
			fwusers.add(std::process::id())?;
		}
		for cmd in fw.outbound_commands()
		{ ipfw(&cmd)?; }
	}

	Ok(())
}


// Removal is best-effort: one rule refusing to die mustn't strand the
// others (or the users-file bookkeeping).  First failure wins the
// error; the rest get reported.
fn keep_first(first: &mut Option<anyhow::Error>,
		res: Result<(), impl Into<anyhow::Error>>)
{
	if let Err(e) = res
	{
		let e = e.into();
		match first {
			None => *first = Some(e),
			Some(_) => crate::err::warn(format!("firewall teardown: {e:#}")),
		}
	}
}


/// Remove this jail's rules; the last user out also deletes the
/// common rules.  This also runs after a half-failed install, where
/// some of the rules it deletes never made it in; those deletions
/// fail and that's fine.
pub(crate) fn remove(fw: &FwConfig) -> Result<(), anyhow::Error>
{
	let mut first: Option<anyhow::Error> = None;

	if fw.net.allow_inbound()
	{
		keep_first(&mut first, exec::run(
				&format!("ipfw delete {}", fw.rule_in()),
				"destroy firewall rule"));
	}

	if fw.net.allow_outbound()
	{
		keep_first(&mut first, exec::run(
				&format!("ipfw delete {}", fw.rule_out()),
				"destroy firewall rule"));

		match users::FwUsers::lock(&crate::locs::fw_users_file()) {
			Ok(mut fwusers) => {
				keep_first(&mut first, fwusers.del(std::process::id()));
				match fwusers.is_empty() {
					Ok(true) => keep_first(&mut first, exec::run(
							&format!("ipfw delete {}", fw.rule_out_common()),
							"destroy firewall rule")),
					Ok(false) => (),
					Err(e) => keep_first(&mut first, Err(e)),
				}
			},
			Err(e) => keep_first(&mut first, Err(e)),
		}
	}

	match first {
		Some(e) => Err(e),
		None => Ok(()),
	}
}




#[cfg(test)]
mod tests
{
	use super::*;
	use crate::spec::PortRange;

	fn fwconf(net: NetOpts) -> FwConfig
	{
		FwConfig {
			epair_index: 3,
			epair_ip_b: Ipv4Addr::new(10, 0, 0, 107),
			gw_iface: "igb0".to_string(),
			host_ip: Ipv4Addr::new(192, 168, 1, 42),
			host_lan: "192.168.1.0/24".to_string(),
			nameserver: Some(Ipv4Addr::new(192, 168, 1, 53)),
			net,
		}
	}

	fn pr(lo: u16, hi: u16) -> PortRange
	{
		PortRange { lo, hi }
	}


	#[test]
	fn rule_numbers()
	{
		let fw = fwconf(NetOpts::default_all());
		assert_eq!(fw.rule_in(), 19004);
		assert_eq!(fw.rule_out(), 59004);
		assert_eq!(fw.rule_out_common(), 59000);
		// Inbound strictly below outbound
		assert!(fw.rule_in() < fw.rule_out_common());
	}

	#[test]
	fn inbound_redirect()
	{
		// Scenario: inbound-tcp {8080: 80}
		let net = NetOpts {
			inbound_tcp: vec![(pr(8080, 8080), pr(80, 80))],
			..NetOpts::default()
		};
		let fw = fwconf(net);

		let cmds = fw.inbound_commands();
		assert_eq!(cmds.len(), 3);
		assert_eq!(cmds[0],
			"nat 19004 config redirect_port tcp 10.0.0.107:80 \
			192.168.1.42:8080");
		assert!(cmds[1].contains("from any to 192.168.1.42 8080 in recv igb0"));
		assert!(cmds[2].contains("from 10.0.0.107 80 to any out xmit igb0"));
	}

	#[test]
	fn inbound_ranges_and_udp()
	{
		let net = NetOpts {
			inbound_tcp: vec![(pr(9000, 9010), pr(9000, 9010))],
			inbound_udp: vec![(pr(5353, 5353), pr(53, 53))],
			..NetOpts::default()
		};
		let fw = fwconf(net);

		let cmds = fw.inbound_commands();
		assert!(cmds[0].contains("redirect_port tcp 10.0.0.107:9000-9010 \
				192.168.1.42:9000-9010"));
		assert!(cmds[0].contains("redirect_port udp 10.0.0.107:53 \
				192.168.1.42:5353"));
		// config + 2 per tcp map + 2 per udp map
		assert_eq!(cmds.len(), 5);
	}

	#[test]
	fn no_inbound_no_commands()
	{
		let fw = fwconf(NetOpts::default_all());
		assert!(fw.inbound_commands().is_empty());
	}

	#[test]
	fn outbound_common()
	{
		let fw = fwconf(NetOpts::default_all());
		let cmds = fw.outbound_common_commands();
		assert_eq!(cmds[0], "nat 59000 config ip 192.168.1.42");
		assert_eq!(cmds[1],
			"add 59000 nat 59000 all from any to 192.168.1.42 in recv igb0");
	}

	#[test]
	fn outbound_all_allowed()
	{
		let fw = fwconf(NetOpts::default_all());
		let cmds = fw.outbound_commands();

		// DNS whitewash pair, the DNS ban, and the catch-all NAT; no
		// host/LAN bans since both are allowed
		assert_eq!(cmds.len(), 4);
		assert!(cmds[0].contains("udp from 10.0.0.107 to 192.168.1.53 53"));
		assert!(cmds[1].starts_with("add 59004 allow udp"));
		assert!(cmds[2].contains("deny udp from 10.0.0.107 to any 53"));
		assert!(cmds[3].contains("nat 59000 all from 10.0.0.107 to any \
				out xmit igb0"));
	}

	#[test]
	fn outbound_wan_only()
	{
		// Tor-style: wan only, no DNS
		let net = NetOpts { outbound_wan: true, ..NetOpts::default() };
		let fw = fwconf(net);
		let cmds = fw.outbound_commands();

		// DNS ban, host ban, LAN ban, catch-all NAT; whitewashes
		// precede bans precede NAT
		assert_eq!(cmds.len(), 4);
		assert!(cmds[0].contains("deny udp from 10.0.0.107 to any 53"));
		assert!(cmds[1].contains("deny ip from 10.0.0.107 to me"));
		assert!(cmds[2].contains("deny ip from 10.0.0.107 to 192.168.1.0/24"));
		assert!(cmds[3].contains("nat 59000 all"));
	}

	#[test]
	fn outbound_none_no_commands()
	{
		let net = NetOpts {
			inbound_tcp: vec![(pr(80, 80), pr(80, 80))],
			..NetOpts::default()
		};
		let fw = fwconf(net);
		assert!(fw.outbound_commands().is_empty());
	}
}
