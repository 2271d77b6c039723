//! Reading the spec out of its YAML form.
//!
//! The schema is deliberately loose for the user's benefit (scalars
//! where lists would do, lists of pairs, maps of scripts...), so this
//! walks the serde_yaml value tree by hand rather than deriving
//! anything.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value;

use super::{NetOpts, OptDetails, PortMap, PortRange, Share, Spec, TorOpts};
use crate::err::Error;


fn cfg(msg: impl Into<String>) -> Error
{
	Error::Config(msg.into())
}


/// A scalar node as a string.  YAML helpfully types bare numbers and
/// bools for us, so those get stringified back.
fn scalar(node: &Value) -> Option<String>
{
	match node {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

fn scalar_or_err(node: &Value, opath: &str) -> Result<String, Error>
{
	scalar(node).ok_or_else(|| cfg(format!(
			"unsupported {opath} object, only scalar is allowed")))
}


/// A list of scalars, or one scalar split on spaces.  The usual way
/// multi-valued spec fields are written.
fn list_or_scalar(node: &Value) -> Option<Vec<String>>
{
	match node {
		Value::Sequence(seq) => {
			let mut out = Vec::with_capacity(seq.len());
			for e in seq
			{ out.push(scalar(e)?); }
			Some(out)
		},
		_ => {
			let s = scalar(node)?;
			Some(s.split_whitespace().map(|e| e.to_string()).collect())
		},
	}
}

fn list_or_scalar_or_err(node: &Value, opath: &str)
		-> Result<Vec<String>, Error>
{
	list_or_scalar(node).ok_or_else(|| cfg(format!(
			"unsupported {opath} object, only list or scalar are allowed")))
}


/// Share elements: a scalar `p` (host p -> jail p) or a pair
/// `[host, jail]`.
fn parse_shares(node: &Value, opath: &str) -> Result<Vec<Share>, Error>
{
	let seq = node.as_sequence()
			.ok_or_else(|| cfg(format!("{opath} has to be a list")))?;

	let mut out = Vec::with_capacity(seq.len());
	for one in seq
	{
		if let Some(s) = scalar(one)
		{
			out.push(Share { host: s.clone(), jail: s });
			continue;
		}
		match one.as_sequence() {
			Some(pair) if pair.len() == 2 => {
				let host = scalar_or_err(&pair[0], opath)?;
				let jail = scalar_or_err(&pair[1], opath)?;
				out.push(Share { host, jail });
			},
			_ => {
				return Err(cfg(format!("elements of the {opath} list have \
						to be scalars or lists of size two (host, jail)")));
			},
		}
	}
	Ok(out)
}



/*
 * Options
 */

fn parse_net_outbound(node: &Value, net: &mut NetOpts) -> Result<(), Error>
{
	let vals = list_or_scalar_or_err(node, "net/outbound")?;
	for v in &vals
	{
		match v.as_str() {
			"all" => {
				if vals.len() > 1
				{ return Err(cfg("net/outbound contains other elements \
						besides 'all'")); }
				net.outbound_wan = true;
				net.outbound_lan = true;
				net.outbound_host = true;
				net.outbound_dns = true;
			},
			"none" => {
				if vals.len() > 1
				{ return Err(cfg("net/outbound contains other elements \
						besides 'none'")); }
			},
			"wan"  => net.outbound_wan = true,
			"lan"  => net.outbound_lan = true,
			"host" => net.outbound_host = true,
			"dns"  => net.outbound_dns = true,
			other => {
				return Err(cfg(format!("net/outbound contains the unknown \
						element '{other}'")));
			},
		}
	}
	Ok(())
}


fn parse_net_inbound(node: &Value, proto: &str)
		-> Result<Vec<PortMap>, Error>
{
	// List/scalar form: bare ports, host port == jail port
	if let Some(ports) = list_or_scalar(node)
	{
		let mut out = Vec::with_capacity(ports.len());
		for p in ports
		{
			let pr: PortRange = p.parse()?;
			out.push((pr, pr));
		}
		return Ok(out);
	}

	// Map form: host range -> jail range
	match node.as_mapping() {
		Some(map) => {
			let mut out = Vec::with_capacity(map.len());
			for (k, v) in map
			{
				let host: PortRange =
						scalar_or_err(k, proto)?.parse()?;
				let jail: PortRange =
						scalar_or_err(v, proto)?.parse()?;
				out.push((host, jail));
			}
			Ok(out)
		},
		None => Err(cfg(format!("options/net/{proto} value must be an \
				array, a scalar or a map"))),
	}
}


fn parse_net_details(node: &Value) -> Result<NetOpts, Error>
{
	// A bare or null `net` means default: all outbound, no inbound
	let map = match node.as_mapping() {
		Some(m) => m,
		None => return Ok(NetOpts::default_all()),
	};

	let mut net = NetOpts::default();
	for (k, v) in map
	{
		let key = scalar_or_err(k, "options/net")?;
		match key.as_str() {
			"outbound" => parse_net_outbound(v, &mut net)?,
			"inbound-tcp" =>
				net.inbound_tcp = parse_net_inbound(v, "inbound-tcp")?,
			"inbound-udp" =>
				net.inbound_udp = parse_net_inbound(v, "inbound-udp")?,
			other => {
				return Err(cfg(format!("the invalid value \
						options/net/{other} supplied")));
			},
		}
	}
	Ok(net)
}


fn parse_tor_details(node: &Value) -> Result<TorOpts, Error>
{
	let mut tor = TorOpts::default();
	if let Some(map) = node.as_mapping()
	{
		for (k, v) in map
		{
			let key = scalar_or_err(k, "options/tor")?;
			match key.as_str() {
				"control-port" => {
					tor.control_port = v.as_bool().ok_or_else(|| cfg(
							"options/tor/control-port can't be converted \
							to boolean"))?;
				},
				other => {
					return Err(cfg(format!("the invalid value \
							options/tor/{other} supplied")));
				},
			}
		}
	}
	Ok(tor)
}


fn parse_options(node: &Value)
		-> Result<BTreeMap<String, OptDetails>, Error>
{
	let mut out = BTreeMap::new();

	// Simplified form: a list (or scalar) of option names.  net/tor
	// get their defaults.
	if let Some(names) = list_or_scalar(node)
	{
		for name in names
		{
			let det = match name.as_str() {
				"net" => OptDetails::Net(NetOpts::default_all()),
				"tor" => OptDetails::Tor(TorOpts::default()),
				_ => OptDetails::Flag,
			};
			out.insert(name, det);
		}
		return Ok(out);
	}

	// Extended form: a map of name -> details
	let map = node.as_mapping()
			.ok_or_else(|| cfg("options are not scalar, list or map"))?;

	for (k, v) in map
	{
		let name = scalar_or_err(k, "options")?;
		if !v.is_mapping() && !v.is_null()
		{
			return Err(cfg(format!("options/{name} value must be a map or \
					empty when options are in the extended format")));
		}
		let det = match name.as_str() {
			"net" => OptDetails::Net(parse_net_details(v)?),
			"tor" => OptDetails::Tor(parse_tor_details(v)?),
			_ => {
				if !v.is_null()
				{
					return Err(cfg("options/* values must be empty when \
							options are in the extended format"));
				}
				OptDetails::Flag
			},
		};
		out.insert(name, det);
	}
	Ok(out)
}



/*
 * Scripts
 */

/// A script body: one scalar line, or a list of scalar lines.  Either
/// way we end up with a newline-terminated blob for `sh -c`.
fn script_body(node: &Value) -> Option<String>
{
	if let Some(s) = scalar(node)
	{ return Some(format!("{s}\n")); }

	let seq = node.as_sequence()?;
	if seq.is_empty() { return None }

	let mut out = String::new();
	for line in seq
	{
		out.push_str(&scalar(line)?);
		out.push('\n');
	}
	Some(out)
}


/// One section's worth of scripts.  Supported layouts:
/// scalar; list of scalars (one multi-line script); list of lists
/// (anonymous scripts, named script#N); map of name -> scalar/list.
fn parse_scripts_section(section: &str, node: &Value)
		-> Result<BTreeMap<String, String>, Error>
{
	let err = || cfg(format!("scripts must be scalars, arrays of scalars, \
			arrays of arrays of scalars, or maps of scalars or of arrays \
			of scalars, problematic section '{section}'"));

	// Single anonymous script
	if let Some(body) = script_body(node)
	{
		return Ok([(String::new(), body)].into_iter().collect());
	}

	// A list of scripts, auto-named by position
	if let Some(seq) = node.as_sequence()
	{
		let mut out = BTreeMap::new();
		for (idx, elt) in seq.iter().enumerate()
		{
			let body = script_body(elt).ok_or_else(err)?;
			out.insert(format!("script#{}", idx + 1), body);
		}
		return Ok(out);
	}

	// A map of named scripts
	if let Some(map) = node.as_mapping()
	{
		let mut out = BTreeMap::new();
		for (k, v) in map
		{
			let name = scalar_or_err(k, "scripts")?;
			let body = script_body(v).ok_or_else(err)?;
			out.insert(name, body);
		}
		return Ok(out);
	}

	Err(err())
}



/*
 * Interface
 */

pub fn parse_spec(fname: &Path) -> Result<Spec, anyhow::Error>
{
	let text = std::fs::read_to_string(fname)
			.map_err(|e| Error::io("read", fname, e))?;
	Ok(parse_spec_str(&text)?)
}


pub fn parse_spec_str(text: &str) -> Result<Spec, Error>
{
	let top: Value = serde_yaml::from_str(text)
			.map_err(|e| cfg(format!("YAML error: {e}")))?;

	let mut spec = Spec::default();

	let top = match &top {
		Value::Null => return Ok(spec),
		v => v.as_mapping()
				.ok_or_else(|| cfg("the spec has to be a YAML map"))?,
	};

	for (k, v) in top
	{
		let key = scalar_or_err(k, "spec")?;
		match key.as_str() {
			"base" => parse_base(v, &mut spec)?,
			"pkg" => parse_pkg(v, &mut spec)?,
			"run" => parse_run(v, &mut spec)?,
			"dirs" => {
				for (bk, bv) in submap(v, "dirs")?
				{
					match scalar_or_err(bk, "dirs")?.as_str() {
						"share" => spec.dirs_share =
								parse_shares(bv, "dirs/share")?,
						other => return Err(cfg(format!(
								"unknown element dirs/{other} in spec"))),
					}
				}
			},
			"files" => {
				for (bk, bv) in submap(v, "files")?
				{
					match scalar_or_err(bk, "files")?.as_str() {
						"share" => spec.files_share =
								parse_shares(bv, "files/share")?,
						other => return Err(cfg(format!(
								"unknown element files/{other} in spec"))),
					}
				}
			},
			"options" => spec.options = parse_options(v)?,
			"scripts" => {
				let map = v.as_mapping()
						.ok_or_else(|| cfg("scripts must be a map"))?;
				for (sk, sv) in map
				{
					let section = scalar_or_err(sk, "scripts")?;
					if spec.scripts.contains_key(&section)
					{
						return Err(cfg(format!(
								"duplicate 'scripts/{section}'")));
					}
					let scripts = parse_scripts_section(&section, sv)?;
					spec.scripts.insert(section, scripts);
				}
			},
			other => {
				return Err(cfg(format!(
						"unknown top-level element '{other}' in spec")));
			},
		}
	}

	Ok(spec)
}


fn submap<'a>(node: &'a Value, what: &str)
		-> Result<&'a serde_yaml::Mapping, Error>
{
	node.as_mapping()
			.ok_or_else(|| cfg(format!("{what} has to be a map")))
}


fn parse_base(node: &Value, spec: &mut Spec) -> Result<(), Error>
{
	for (k, v) in submap(node, "base")?
	{
		match scalar_or_err(k, "base")?.as_str() {
			"keep" => spec.base_keep =
					list_or_scalar_or_err(v, "base/keep")?,
			"keep-wildcard" => spec.base_keep_wildcard =
					list_or_scalar_or_err(v, "base/keep-wildcard")?,
			"remove" => spec.base_remove =
					list_or_scalar_or_err(v, "base/remove")?,
			other => return Err(cfg(format!(
					"unknown element base/{other} in spec"))),
		}
	}
	Ok(())
}


fn parse_pkg(node: &Value, spec: &mut Spec) -> Result<(), Error>
{
	for (k, v) in submap(node, "pkg")?
	{
		match scalar_or_err(k, "pkg")?.as_str() {
			"install" => spec.pkg_install =
					list_or_scalar_or_err(v, "pkg/install")?,
			"local-override" => {
				let map = v.as_mapping().ok_or_else(|| cfg(
						"pkg/local-override must be a map of package name \
						to local package file path"))?;
				for (ok, ov) in map
				{
					spec.pkg_local_override.push((
						scalar_or_err(ok, "pkg/local-override")?,
						scalar_or_err(ov, "pkg/local-override")?,
					));
				}
			},
			"add" => spec.pkg_add = list_or_scalar_or_err(v, "pkg/add")?,
			"nuke" => spec.pkg_nuke = list_or_scalar_or_err(v, "pkg/nuke")?,
			other => return Err(cfg(format!(
					"unknown element pkg/{other} in spec"))),
		}
	}
	Ok(())
}


fn parse_run(node: &Value, spec: &mut Spec) -> Result<(), Error>
{
	for (k, v) in submap(node, "run")?
	{
		match scalar_or_err(k, "run")?.as_str() {
			"command" => {
				let command = scalar_or_err(v, "run/command")?;
				// Executable, then everything past the first space is
				// its args
				match command.split_once(' ') {
					None => spec.run_executable = Some(command),
					Some((exe, args)) => {
						spec.run_executable = Some(exe.to_string());
						spec.run_args = args.to_string();
					},
				}
			},
			"service" => spec.run_services =
					list_or_scalar_or_err(v, "run/service")?,
			other => return Err(cfg(format!(
					"unknown element run/{other} in spec"))),
		}
	}
	Ok(())
}




#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn full_doc()
	{
		let spec = parse_spec_str(r#"
base:
  keep:
    - /usr/bin/fetch
    - /rescue/nc
  keep-wildcard: /usr/lib/pam_*.so
  remove:
    - /etc/motd
pkg:
  install: firefox ca_root_nss
  local-override:
    firefox: /tmp/firefox-custom.pkg
  nuke:
    - llvm
run:
  command: /usr/local/bin/firefox --no-remote
  service: dbus
dirs:
  share:
    - [$HOME/Downloads, $HOME/Downloads]
files:
  share:
    - /tmp/shared.sock
options:
  - x11
  - net
scripts:
  run:begin:
    prep: echo starting
"#).unwrap();

		assert_eq!(spec.base_keep, vec!["/usr/bin/fetch", "/rescue/nc"]);
		assert_eq!(spec.base_keep_wildcard, vec!["/usr/lib/pam_*.so"]);
		assert_eq!(spec.base_remove, vec!["/etc/motd"]);

		assert_eq!(spec.pkg_install, vec!["firefox", "ca_root_nss"]);
		assert_eq!(spec.pkg_local_override,
				vec![("firefox".to_string(),
					"/tmp/firefox-custom.pkg".to_string())]);
		assert_eq!(spec.pkg_nuke, vec!["llvm"]);

		assert_eq!(spec.run_executable.as_deref(),
				Some("/usr/local/bin/firefox"));
		assert_eq!(spec.run_args, "--no-remote");
		assert_eq!(spec.run_services, vec!["dbus"]);

		assert_eq!(spec.dirs_share.len(), 1);
		assert_eq!(spec.dirs_share[0].host, "$HOME/Downloads");
		// A bare scalar shares the same path both sides
		assert_eq!(spec.files_share[0].host, "/tmp/shared.sock");
		assert_eq!(spec.files_share[0].jail, "/tmp/shared.sock");

		assert!(spec.has_option("x11"));
		// Simplified-form net defaults to all-outbound
		let net = spec.option_net().unwrap();
		assert!(net.outbound_wan && net.outbound_lan
				&& net.outbound_host && net.outbound_dns);
		assert!(!net.allow_inbound());

		assert_eq!(spec.scripts["run:begin"]["prep"], "echo starting\n");
	}

	#[test]
	fn net_extended()
	{
		let spec = parse_spec_str(r#"
run:
  command: /usr/local/bin/thing
options:
  net:
    outbound: [wan, dns]
    inbound-tcp:
      8080: 80
      9000-9010: 9000-9010
    inbound-udp: 5353
"#).unwrap();

		let net = spec.option_net().unwrap();
		assert!(net.outbound_wan && net.outbound_dns);
		assert!(!net.outbound_lan && !net.outbound_host);

		assert_eq!(net.inbound_tcp.len(), 2);
		let (host, jail) = net.inbound_tcp[0];
		assert_eq!((host.lo, host.hi, jail.lo, jail.hi), (8080, 8080, 80, 80));
		let (host, jail) = net.inbound_tcp[1];
		assert_eq!((host.lo, host.hi), (9000, 9010));
		assert_eq!((jail.lo, jail.hi), (9000, 9010));

		// Scalar inbound: same port both sides
		let (host, jail) = net.inbound_udp[0];
		assert_eq!((host.lo, jail.lo), (5353, 5353));
	}

	#[test]
	fn net_outbound_exclusives()
	{
		parse_spec_str(r#"
options:
  net:
    outbound: [all, dns]
"#).unwrap_err();

		let spec = parse_spec_str(r#"
options:
  net:
    outbound: none
    inbound-tcp: 8080
"#).unwrap();
		let net = spec.option_net().unwrap();
		assert!(!net.allow_outbound());
		assert!(net.allow_inbound());
	}

	#[test]
	fn tor_extended()
	{
		let spec = parse_spec_str(r#"
options:
  tor:
    control-port: true
"#).unwrap();
		assert!(spec.option_tor().unwrap().control_port);

		// Bad boolean
		parse_spec_str(r#"
options:
  tor:
    control-port: maybe
"#).unwrap_err();
	}

	#[test]
	fn flag_options_take_no_details()
	{
		parse_spec_str(r#"
options:
  x11:
    some: thing
"#).unwrap_err();

		let spec = parse_spec_str(r#"
options:
  x11:
  video:
"#).unwrap();
		assert!(spec.has_option("x11"));
		assert!(spec.has_option("video"));
	}

	#[test]
	fn unknown_option_parses_validate_rejects()
	{
		// Scenario: {options: [bogus]} is a ConfigError out of
		// validate, not a parse crash
		let spec = parse_spec_str("options: [bogus]\n").unwrap();
		let err = spec.validate().unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn script_forms()
	{
		let spec = parse_spec_str(r#"
run:
  command: /usr/local/bin/x
scripts:
  run:begin: echo one
  run:end:
    - echo a
    - echo b
  run:before-execute:
    - [echo first]
    - [echo second, echo more]
  run:after-execute:
    named: echo hi
"#).unwrap();

		assert_eq!(spec.scripts["run:begin"][""], "echo one\n");
		assert_eq!(spec.scripts["run:end"][""], "echo a\necho b\n");
		assert_eq!(spec.scripts["run:before-execute"]["script#1"],
				"echo first\n");
		assert_eq!(spec.scripts["run:before-execute"]["script#2"],
				"echo second\necho more\n");
		assert_eq!(spec.scripts["run:after-execute"]["named"], "echo hi\n");
	}

	#[test]
	fn dup_script_section()
	{
		// Can't actually write a duplicate map key in YAML that
		// serde_yaml will hand us twice, so this guards the spec-level
		// map instead; the parse error comes from serde_yaml itself.
		parse_spec_str(r#"
scripts:
  run:begin: echo one
  run:begin: echo two
"#).unwrap_err();
	}

	#[test]
	fn unknown_keys()
	{
		parse_spec_str("nonsense: 1\n").unwrap_err();
		parse_spec_str("base:\n  frobnicate: x\n").unwrap_err();
		parse_spec_str("pkg:\n  wat: x\n").unwrap_err();
		parse_spec_str("run:\n  wat: x\n").unwrap_err();
	}

	#[test]
	fn share_pair_shapes()
	{
		parse_spec_str(r#"
dirs:
  share:
    - [/a, /b, /c]
"#).unwrap_err();

		parse_spec_str("dirs:\n  share: notalist\n").unwrap_err();
	}

	#[test]
	fn empty_spec_is_empty()
	{
		let spec = parse_spec_str("").unwrap();
		assert_eq!(spec, Spec::default());
	}
}
