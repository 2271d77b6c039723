//! The crate spec: the declarative description of what goes into a
//! crate and how it runs.
//!
//! Loaded from YAML (see parse), validated, then preprocessed into
//! its final form (derived packages, services, keep-files
//! materialized).  After preprocess() nothing mutates it.

use std::collections::BTreeMap;

use crate::err::Error;

/// The YAML reading
mod parse;
pub use parse::{parse_spec, parse_spec_str};


/// Option names we know, in the order they're processed.
pub(crate) const ALL_OPTIONS: &[&str] = &[
	"x11", "net", "ssl-certs", "tor", "video", "gl",
	"no-rm-static-libs", "dbg-ktrace",
];


/// The known lifecycle script sections.  Scripts anywhere else are a
/// config error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::EnumString)]
pub(crate) enum ScriptSection
{
	#[strum(serialize = "run:begin")]
	RunBegin,
	#[strum(serialize = "run:before-create-jail")]
	BeforeCreateJail,
	#[strum(serialize = "run:after-create-jail")]
	AfterCreateJail,
	#[strum(serialize = "run:before-create-users")]
	BeforeCreateUsers,
	#[strum(serialize = "run:after-create-users")]
	AfterCreateUsers,
	#[strum(serialize = "run:before-start-services")]
	BeforeStartServices,
	#[strum(serialize = "run:after-start-services")]
	AfterStartServices,
	#[strum(serialize = "run:before-execute")]
	BeforeExecute,
	#[strum(serialize = "run:after-execute")]
	AfterExecute,
	#[strum(serialize = "run:before-remove-jail")]
	BeforeRemoveJail,
	#[strum(serialize = "run:after-remove-jail")]
	AfterRemoveJail,
	#[strum(serialize = "run:end")]
	RunEnd,
}



/// An inclusive port range.  A single port is a range of span 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PortRange
{
	pub(crate) lo: u16,
	pub(crate) hi: u16,
}

impl PortRange
{
	pub(crate) fn span(&self) -> u16
	{
		self.hi - self.lo
	}
}

impl std::fmt::Display for PortRange
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error>
	{
		match self.lo == self.hi {
			true  => write!(f, "{}", self.lo),
			false => write!(f, "{}-{}", self.lo, self.hi),
		}
	}
}

impl std::str::FromStr for PortRange
{
	type Err = Error;

	/// "80" or "8000-8010".
	fn from_str(s: &str) -> Result<Self, Error>
	{
		let bad = || Error::Config(format!("bad port range '{s}'"));
		let num = |p: &str| p.trim().parse::<u16>().map_err(|_| bad());

		match s.split_once('-') {
			None => {
				let p = num(s)?;
				Ok(PortRange { lo: p, hi: p })
			},
			Some((l, h)) => {
				let (lo, hi) = (num(l)?, num(h)?);
				if lo > hi { return Err(bad()) }
				Ok(PortRange { lo, hi })
			},
		}
	}
}


/// (host range, jail range) redirection pair.
pub(crate) type PortMap = (PortRange, PortRange);


/// Details of the `net` option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NetOpts
{
	pub(crate) outbound_wan:  bool,
	pub(crate) outbound_lan:  bool,
	pub(crate) outbound_host: bool,
	pub(crate) outbound_dns:  bool,

	pub(crate) inbound_tcp: Vec<PortMap>,
	pub(crate) inbound_udp: Vec<PortMap>,
}

impl NetOpts
{
	/// A bare `net` means "all outbound, no inbound".
	pub(crate) fn default_all() -> Self
	{
		NetOpts {
			outbound_wan: true,
			outbound_lan: true,
			outbound_host: true,
			outbound_dns: true,
			..Default::default()
		}
	}

	pub(crate) fn allow_outbound(&self) -> bool
	{
		self.outbound_wan || self.outbound_lan || self.outbound_host
				|| self.outbound_dns
	}

	pub(crate) fn allow_inbound(&self) -> bool
	{
		!self.inbound_tcp.is_empty() || !self.inbound_udp.is_empty()
	}
}


/// Details of the `tor` option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TorOpts
{
	pub(crate) control_port: bool,
}


/// What hangs off an option name.  Most options are bare flags; net
/// and tor carry details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OptDetails
{
	Flag,
	Net(NetOpts),
	Tor(TorOpts),
}


/// A host path shared into the jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Share
{
	pub(crate) host: String,
	pub(crate) jail: String,
}



#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spec
{
	/// Base-tree paths kept through pruning.
	pub(crate) base_keep: Vec<String>,

	/// Glob patterns expanded at prune time.
	pub(crate) base_keep_wildcard: Vec<String>,

	/// Paths always deleted, keep set or no.
	pub(crate) base_remove: Vec<String>,

	/// Packages pulled in via the package manager.
	pub(crate) pkg_install: Vec<String>,

	/// name -> local package file replacing the repo version.
	pub(crate) pkg_local_override: Vec<(String, String)>,

	/// Local package files added without dependency resolution.
	pub(crate) pkg_add: Vec<String>,

	/// Packages force-deleted after install.
	pub(crate) pkg_nuke: Vec<String>,

	/// What to run, split off its argument string.
	pub(crate) run_executable: Option<String>,
	pub(crate) run_args: String,

	/// Services started before the executable, stopped in reverse.
	pub(crate) run_services: Vec<String>,

	pub(crate) dirs_share: Vec<Share>,
	pub(crate) files_share: Vec<Share>,

	/// Option name -> details.  Key recognition happens in
	/// validate() so a typo'd name reports as a config error rather
	/// than a parse crash.
	pub(crate) options: BTreeMap<String, OptDetails>,

	/// Section -> script name -> script text.
	pub(crate) scripts: BTreeMap<String, BTreeMap<String, String>>,
}


impl Spec
{
	pub(crate) fn has_option(&self, name: &str) -> bool
	{
		self.options.contains_key(name)
	}

	pub(crate) fn option_net(&self) -> Option<&NetOpts>
	{
		match self.options.get("net") {
			Some(OptDetails::Net(n)) => Some(n),
			_ => None,
		}
	}

	pub(crate) fn option_tor(&self) -> Option<&TorOpts>
	{
		match self.options.get("tor") {
			Some(OptDetails::Tor(t)) => Some(t),
			_ => None,
		}
	}


	/// Does the net option want any networking at all?
	pub(crate) fn wants_net(&self) -> bool
	{
		self.option_net()
				.map(|n| n.allow_outbound() || n.allow_inbound())
				.unwrap_or(false)
	}


	/// Materialize the derived bits of the spec.  Idempotent: every
	/// expansion checks whether it's already been applied, so
	/// preprocessing twice is the same as once.
	pub fn preprocess(mut self) -> Spec
	{
		// Pushes that shouldn't double up on a second pass
		fn push_once(v: &mut Vec<String>, s: &str)
		{
			if !v.iter().any(|e| e == s) { v.push(s.to_string()) }
		}

		// ssl-certs just means the CA bundle package
		if self.options.remove("ssl-certs").is_some()
		{ push_once(&mut self.pkg_install, "ca_root_nss"); }

		// tor wants a pile of things: the package, the service first
		// in line, the base utilities its rc script leans on, and WAN
		// access
		if let Some(tor) = self.option_tor().copied()
		{
			push_once(&mut self.pkg_install, "tor");
			if self.run_services.first().map(|s| s.as_str()) != Some("tor")
			{ self.run_services.insert(0, "tor".to_string()); }

			push_once(&mut self.base_keep, "/usr/bin/limits");
			push_once(&mut self.base_keep, "/usr/bin/su");
			// tor's rc script validates its pidfile with ps
			push_once(&mut self.base_keep, "/bin/ps");
			push_once(&mut self.base_keep, "/bin/csh");
			// pam, for the su that tor's rc script does
			push_once(&mut self.base_keep_wildcard, "/usr/lib/pam_*.so");
			push_once(&mut self.base_keep_wildcard, "/usr/lib/pam_*.so.*");

			if tor.control_port
			{
				self.scripts
						.entry(ScriptSection::BeforeStartServices.to_string())
						.or_default()
						.insert("openTorControlPort".to_string(),
							"echo ControlPort 9051 >> /usr/local/etc/tor/torrc\n"
								.to_string());
			}

			// Tor only needs WAN; DNS goes through tor itself
			let net = self.options.entry("net".to_string())
					.or_insert_with(|| OptDetails::Net(NetOpts::default()));
			if let OptDetails::Net(n) = net
			{ n.outbound_wan = true; }
		}

		// gl: GPU driver packages
		if self.options.remove("gl").is_some()
		{
			push_once(&mut self.pkg_install, "mesa-dri");
			push_once(&mut self.pkg_install, "nvidia-driver");
		}

		// dbg-ktrace keeps the tracer around; the option itself stays
		// because run wants to see it too
		if self.has_option("dbg-ktrace")
		{ push_once(&mut self.base_keep, "/usr/bin/ktrace"); }

		self
	}


	/// Check the invariants.  Call on the parsed spec; preprocess
	/// doesn't invalidate anything this checks.
	pub fn validate(&self) -> Result<(), Error>
	{
		let cfg = |m: String| Err(Error::Config(m));
		let is_abs = |p: &str| p.starts_with('/');

		// Something has to actually happen when the crate runs
		if self.run_executable.is_none() && self.run_services.is_empty()
				&& !self.has_option("tor")
		{
			return cfg("crate has to have either the executable to run, \
					some services to run, or both, it can't have nothing \
					to do".to_string());
		}

		// Local overrides can't stutter
		let mut seen = std::collections::BTreeMap::new();
		for (name, file) in &self.pkg_local_override
		{
			if let Some(prev) = seen.insert(name.clone(), file.clone())
			{
				return cfg(format!("duplicate local override packages: \
						{name}->{prev} and {name}->{file}"));
			}
		}

		// Executable must be a full path
		if let Some(exe) = &self.run_executable
		{
			if !is_abs(exe)
			{
				return cfg(format!("the executable path has to be a full \
						path, executable={exe}"));
			}
		}

		// Shares must be full paths, after variable substitution
		for (what, shares) in [("directory", &self.dirs_share),
				("file", &self.files_share)]
		{
			for sh in shares.iter()
			{
				let host = crate::util::substitute_vars(&sh.host);
				let jail = crate::util::substitute_vars(&sh.jail);
				if !is_abs(&host) || !is_abs(&jail)
				{
					return cfg(format!("the shared {what} paths have to be \
							full paths, share={}->{}", sh.host, sh.jail));
				}
			}
		}

		// Option names must be ones we know
		for name in self.options.keys()
		{
			if !ALL_OPTIONS.contains(&name.as_str())
			{ return cfg(format!("the unknown option '{name}' was supplied")); }
		}

		// Script sections must be ones we know
		for sec in self.scripts.keys()
		{
			if sec.parse::<ScriptSection>().is_err()
			{
				return cfg(format!("the unknown script section '{sec}' \
						was supplied"));
			}
		}

		// Inbound redirections have to line up 1:1
		if let Some(net) = self.option_net()
		{
			for (host, jail) in net.inbound_tcp.iter().chain(&net.inbound_udp)
			{
				if host.span() != jail.span()
				{
					return cfg(format!("port ranges have different spans: \
							{host} and {jail}"));
				}
			}
		}

		Ok(())
	}


	/// Crate name to default the output file from: executable
	/// basename, else the first service.
	pub(crate) fn guess_name(&self) -> String
	{
		match &self.run_executable {
			Some(exe) => crate::util::file_name(exe),
			None => self.run_services.first().cloned().unwrap_or_default(),
		}
	}
}




#[cfg(test)]
mod tests
{
	use super::*;

	fn minimal() -> Spec
	{
		Spec {
			run_executable: Some("/usr/local/bin/xclock".to_string()),
			..Default::default()
		}
	}

	#[test]
	fn portrange_parse()
	{
		let p: PortRange = "80".parse().unwrap();
		assert_eq!(p, PortRange { lo: 80, hi: 80 });
		assert_eq!(p.to_string(), "80");

		let p: PortRange = "8000-8010".parse().unwrap();
		assert_eq!(p, PortRange { lo: 8000, hi: 8010 });
		assert_eq!(p.span(), 10);
		assert_eq!(p.to_string(), "8000-8010");

		"80-".parse::<PortRange>().unwrap_err();
		"x".parse::<PortRange>().unwrap_err();
		"90-80".parse::<PortRange>().unwrap_err();
	}

	#[test]
	fn validate_nothing_to_do()
	{
		let spec = Spec::default();
		let err = spec.validate().unwrap_err();
		assert!(err.to_string().contains("nothing to do"));

		// An executable is enough
		minimal().validate().unwrap();

		// So is a service
		let spec = Spec {
			run_services: vec!["nginx".to_string()],
			..Default::default()
		};
		spec.validate().unwrap();

		// So is tor
		let mut spec = Spec::default();
		spec.options.insert("tor".to_string(),
				OptDetails::Tor(TorOpts::default()));
		spec.validate().unwrap();
	}

	#[test]
	fn validate_bogus_option()
	{
		let mut spec = minimal();
		spec.options.insert("bogus".to_string(), OptDetails::Flag);
		let err = spec.validate().unwrap_err();
		assert!(err.to_string().contains("unknown option 'bogus'"));
	}

	#[test]
	fn validate_relative_exe()
	{
		let mut spec = minimal();
		spec.run_executable = Some("bin/thing".to_string());
		spec.validate().unwrap_err();
	}

	#[test]
	fn validate_share_paths()
	{
		let mut spec = minimal();
		spec.dirs_share.push(Share {
			host: "$HOME/.thing".to_string(),
			jail: "$HOME/.thing".to_string(),
		});
		// $HOME expands to something absolute, so this is fine
		crate::util::set_caller_ids();
		spec.validate().unwrap();

		spec.dirs_share.push(Share {
			host: "relative/path".to_string(),
			jail: "/ok".to_string(),
		});
		spec.validate().unwrap_err();
	}

	#[test]
	fn validate_dup_override()
	{
		let mut spec = minimal();
		spec.pkg_local_override.push(("foo".into(), "/tmp/foo-1.pkg".into()));
		spec.pkg_local_override.push(("foo".into(), "/tmp/foo-2.pkg".into()));
		let err = spec.validate().unwrap_err();
		assert!(err.to_string().contains("duplicate local override"));
	}

	#[test]
	fn validate_port_spans()
	{
		let mut spec = minimal();
		let net = NetOpts {
			inbound_tcp: vec![(PortRange { lo: 8000, hi: 8010 },
					PortRange { lo: 80, hi: 80 })],
			..NetOpts::default()
		};
		spec.options.insert("net".to_string(), OptDetails::Net(net));
		let err = spec.validate().unwrap_err();
		assert!(err.to_string().contains("different spans"));
	}

	#[test]
	fn validate_script_sections()
	{
		let mut spec = minimal();
		spec.scripts.entry("run:begin".to_string()).or_default()
				.insert("x".to_string(), "echo hi\n".to_string());
		spec.validate().unwrap();

		spec.scripts.entry("create:nope".to_string()).or_default()
				.insert("x".to_string(), "echo hi\n".to_string());
		let err = spec.validate().unwrap_err();
		assert!(err.to_string().contains("unknown script section"));
	}


	#[test]
	fn preprocess_ssl_certs()
	{
		let mut spec = minimal();
		spec.options.insert("ssl-certs".to_string(), OptDetails::Flag);

		let spec = spec.preprocess();
		assert!(spec.pkg_install.iter().any(|p| p == "ca_root_nss"));
		assert!(!spec.has_option("ssl-certs"));
	}

	#[test]
	fn preprocess_gl()
	{
		let mut spec = minimal();
		spec.options.insert("gl".to_string(), OptDetails::Flag);

		let spec = spec.preprocess();
		assert!(spec.pkg_install.iter().any(|p| p == "mesa-dri"));
		assert!(spec.pkg_install.iter().any(|p| p == "nvidia-driver"));
		assert!(!spec.has_option("gl"));
	}

	#[test]
	fn preprocess_ktrace()
	{
		let mut spec = minimal();
		spec.options.insert("dbg-ktrace".to_string(), OptDetails::Flag);

		let spec = spec.preprocess();
		assert!(spec.base_keep.iter().any(|p| p == "/usr/bin/ktrace"));
		// This one stays; run wants to see it
		assert!(spec.has_option("dbg-ktrace"));
	}

	#[test]
	fn preprocess_tor()
	{
		let mut spec = Spec::default();
		spec.options.insert("tor".to_string(),
				OptDetails::Tor(TorOpts { control_port: true }));
		spec.run_services.push("nginx".to_string());

		let spec = spec.preprocess();
		assert!(spec.pkg_install.iter().any(|p| p == "tor"));
		assert_eq!(spec.run_services[0], "tor");
		assert_eq!(spec.run_services[1], "nginx");
		assert!(spec.base_keep.iter().any(|p| p == "/bin/ps"));
		assert!(spec.base_keep_wildcard.iter()
				.any(|p| p == "/usr/lib/pam_*.so"));

		let script = &spec.scripts["run:before-start-services"]
				["openTorControlPort"];
		assert_eq!(script,
				"echo ControlPort 9051 >> /usr/local/etc/tor/torrc\n");

		let net = spec.option_net().unwrap();
		assert!(net.outbound_wan);
		assert!(!net.outbound_dns);
	}

	#[test]
	fn preprocess_idempotent()
	{
		let mut spec = Spec::default();
		spec.options.insert("tor".to_string(),
				OptDetails::Tor(TorOpts { control_port: true }));
		spec.options.insert("ssl-certs".to_string(), OptDetails::Flag);
		spec.options.insert("dbg-ktrace".to_string(), OptDetails::Flag);
		spec.run_services.push("nginx".to_string());

		let once = spec.preprocess();
		let twice = once.clone().preprocess();
		assert_eq!(once, twice);
	}

	#[test]
	fn guessed_names()
	{
		assert_eq!(minimal().guess_name(), "xclock");

		let spec = Spec {
			run_services: vec!["tor".to_string()],
			..Default::default()
		};
		assert_eq!(spec.guess_name(), "tor");
	}
}
