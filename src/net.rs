//! Host networking pieces: where the default route goes, what the
//! gateway interface's address/LAN look like, the nameserver, and the
//! epair pipe between host and jail.

use std::net::Ipv4Addr;
use std::path::Path;

use crate::err::Error;
use crate::exec;


/*
 * Default route / gateway interface
 */

/// The interface the default route points out of.
pub(crate) fn gateway_iface() -> Result<String, anyhow::Error>
{
	let out = exec::output("netstat -rn",
			"determine host's gateway interface")?;
	parse_default_route(&out).ok_or_else(|| Error::Sys {
		syscall: "netstat",
		arg: "-rn".to_string(),
		err: "unable to determine host's gateway interface".to_string(),
	}.into())
}

/// Routing table lines are "Destination Gateway Flags Netif [Expire]";
/// we want Netif of the default entry.
fn parse_default_route(out: &str) -> Option<String>
{
	for line in out.lines()
	{
		if !line.starts_with("default") { continue }
		let elts: Vec<&str> = line.split_whitespace().collect();
		if elts.len() >= 4
		{ return Some(elts[3].to_string()) }
	}
	None
}



/*
 * Interface addresses
 */

/// An interface's IPv4 binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IfaceIp4
{
	pub(crate) addr: Ipv4Addr,
	pub(crate) mask: Ipv4Addr,
}

impl IfaceIp4
{
	/// The LAN this address sits on, CIDR form ("192.168.1.0/24").
	pub(crate) fn lan_cidr(&self) -> String
	{
		let a = u32::from(self.addr);
		let m = u32::from(self.mask);
		let net = Ipv4Addr::from(a & m);
		format!("{}/{}", net, m.count_ones())
	}
}


/// All IPv4 addresses of a named interface, via getifaddrs(3).
pub(crate) fn iface_ip4_addresses(iface: &str)
		-> Result<Vec<IfaceIp4>, Error>
{
	let mut ret = Vec::new();

	unsafe {
		let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
		if libc::getifaddrs(&mut ifap) == -1
		{
			let eno = std::io::Error::last_os_error()
					.raw_os_error().unwrap_or(0);
			return Err(Error::sys("getifaddrs", iface, eno));
		}

		let mut cur = ifap;
		while !cur.is_null()
		{
			let a = &*cur;
			cur = a.ifa_next;

			if a.ifa_addr.is_null() || a.ifa_netmask.is_null()
			{ continue }
			if (*a.ifa_addr).sa_family != libc::AF_INET as libc::sa_family_t
			{ continue }

			let name = std::ffi::CStr::from_ptr(a.ifa_name).to_string_lossy();
			if name != iface { continue }

			let sin = &*(a.ifa_addr as *const libc::sockaddr_in);
			let msk = &*(a.ifa_netmask as *const libc::sockaddr_in);
			ret.push(IfaceIp4 {
				addr: Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
				mask: Ipv4Addr::from(u32::from_be(msk.sin_addr.s_addr)),
			});
		}

		libc::freeifaddrs(ifap);
	}

	Ok(ret)
}



/*
 * Nameserver
 */

/// The host's first nameserver, out of resolv.conf.
pub(crate) fn nameserver() -> Result<Ipv4Addr, anyhow::Error>
{
	let lines = crate::util::fs::read_lines(Path::new("/etc/resolv.conf"))?;
	parse_nameserver(&lines).ok_or_else(|| Error::Config(
			"no IPv4 nameserver found in /etc/resolv.conf".to_string()).into())
}

fn parse_nameserver(lines: &[String]) -> Option<Ipv4Addr>
{
	for line in lines
	{
		let mut it = line.split_whitespace();
		if it.next() != Some("nameserver") { continue }
		if let Some(ip) = it.next().and_then(|s| s.parse().ok())
		{ return Some(ip) }
	}
	None
}



/*
 * Epair: the virtual wire between host and jail
 */

/// One created epair.  Side A stays on the host; side B moves into
/// the jail's vnet.  Addresses come out of 10/8, two per pair, with a
/// /31 between them.
#[derive(Debug)]
pub(crate) struct Epair
{
	index: u32,
}


impl Epair
{
	/// `ifconfig epair create` atomically allocates the next free
	/// index, so concurrent runs can't collide.
	pub(crate) fn create() -> Result<Self, anyhow::Error>
	{
		let out = exec::output("ifconfig epair create",
				"create the jail epair")?;
		let name = out.trim();
		let index = parse_epair_index(name).ok_or_else(|| Error::Sys {
			syscall: "ifconfig",
			arg: "epair create".to_string(),
			err: format!("unexpected interface name '{name}'"),
		})?;
		Ok(Epair { index })
	}

	pub(crate) fn index(&self) -> u32
	{
		self.index
	}

	/// Host-side interface name.
	pub(crate) fn name_a(&self) -> String
	{
		format!("epair{}a", self.index)
	}

	/// Jail-side interface name.
	pub(crate) fn name_b(&self) -> String
	{
		format!("epair{}b", self.index)
	}

	pub(crate) fn ip_a(&self) -> Ipv4Addr
	{
		num_to_ip(self.index, 0)
	}

	pub(crate) fn ip_b(&self) -> Ipv4Addr
	{
		num_to_ip(self.index, 1)
	}

	/// Destroying side A takes side B with it, wherever it lives.
	pub(crate) fn destroy(&self) -> Result<(), Error>
	{
		exec::run(&format!("ifconfig {} destroy", self.name_a()),
				"destroy the jail epair")
	}
}


/// "epair3a" -> 3.
fn parse_epair_index(name: &str) -> Option<u32>
{
	name.strip_prefix("epair")?.strip_suffix('a')?.parse().ok()
}


/// Epair index -> 10/8 address.  ip_idx is 0 for the host side, 1 for
/// the jail side; the +100 skips the low addresses people expect to
/// mean something.  Injective over (index, idx), which is what keeps
/// concurrent jails off each other's wires.
pub(crate) fn num_to_ip(epair_index: u32, ip_idx: u32) -> Ipv4Addr
{
	let ip = 100 + 2 * epair_index + ip_idx;
	let b4 = ip % 256;
	let ip = ip / 256;
	let b3 = ip % 256;
	let b2 = ip / 256;
	Ipv4Addr::new(10, b2 as u8, b3 as u8, b4 as u8)
}




#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn default_route()
	{
		let out = "\
Routing tables

Internet:
Destination        Gateway            Flags     Netif Expire
default            192.168.1.1        UGS        igb0
127.0.0.1          link#2             UH          lo0
192.168.1.0/24     link#1             U          igb0
";
		assert_eq!(parse_default_route(out).as_deref(), Some("igb0"));

		assert_eq!(parse_default_route("no routes here\n"), None);
	}

	#[test]
	fn resolv_conf()
	{
		let lines: Vec<String> = [
			"# Generated by resolvconf",
			"search example.net",
			"nameserver 192.168.1.53",
			"nameserver 8.8.8.8",
		].into_iter().map(String::from).collect();
		assert_eq!(parse_nameserver(&lines),
				Some(Ipv4Addr::new(192, 168, 1, 53)));

		let none: Vec<String> = vec!["search example.net".to_string()];
		assert_eq!(parse_nameserver(&none), None);
	}

	#[test]
	fn epair_names()
	{
		assert_eq!(parse_epair_index("epair0a"), Some(0));
		assert_eq!(parse_epair_index("epair17a"), Some(17));
		assert_eq!(parse_epair_index("epair17b"), None);
		assert_eq!(parse_epair_index("lo0"), None);

		let ep = Epair { index: 3 };
		assert_eq!(ep.name_a(), "epair3a");
		assert_eq!(ep.name_b(), "epair3b");
	}

	#[test]
	fn addresses()
	{
		// Low indexes stay in 10.0.0.x
		assert_eq!(num_to_ip(0, 0), Ipv4Addr::new(10, 0, 0, 100));
		assert_eq!(num_to_ip(0, 1), Ipv4Addr::new(10, 0, 0, 101));
		assert_eq!(num_to_ip(1, 0), Ipv4Addr::new(10, 0, 0, 102));

		// Rolls over the octet boundary rather than clipping
		assert_eq!(num_to_ip(78, 0), Ipv4Addr::new(10, 0, 1, 0));

		// Injective over a decent chunk of indexes
		use std::collections::BTreeSet;
		let mut seen = BTreeSet::new();
		for n in 0..10_000
		{
			for idx in 0..2
			{ assert!(seen.insert(num_to_ip(n, idx))); }
		}
	}

	#[test]
	fn cidr()
	{
		let i = IfaceIp4 {
			addr: Ipv4Addr::new(192, 168, 1, 42),
			mask: Ipv4Addr::new(255, 255, 255, 0),
		};
		assert_eq!(i.lan_cidr(), "192.168.1.0/24");

		let i = IfaceIp4 {
			addr: Ipv4Addr::new(10, 2, 3, 4),
			mask: Ipv4Addr::new(255, 0, 0, 0),
		};
		assert_eq!(i.lan_cidr(), "10.0.0.0/8");
	}
}
