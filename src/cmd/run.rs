//! $0 run: crate file in, the app running in a jail, exit code out.

use std::path::{Path, PathBuf};

use crate::err::{warn, Error};
use crate::exec;
use crate::firewall::FwConfig;
use crate::jail::{self, Jid};
use crate::mount::Mount;
use crate::net;
use crate::scope::Registry;
use crate::spec::ScriptSection;
use crate::util::fs;
use crate::util::{self, file_bare_name, path_join, plog, substitute_vars};


/// The idle script for service-only crates: something has to sit in
/// the foreground, or the whole thing would exit before the services
/// get to do anything.
fn idle_script(services: &[String]) -> String
{
	format!("#!/bin/sh

trap onSIGINT 2

onSIGINT()
{{
  echo \"Caught signal SIGINT ... exiting\"
  exit 0
}}

echo \"Running the services: {}\"
echo \"Waiting for Ctrl-C to exit ...\"
/bin/sleep 1000000000
", services.join(" "))
}


/// Set up this jail's end of the world: lo0, the epair, addresses,
/// routing, and the firewall rules.
fn setup_networking(jailpath: &Path, jid: Jid,
		netopts: crate::spec::NetOpts, registry: &mut Registry)
		-> Result<(), anyhow::Error>
{
	// Where do packets leave this host?
	let gw_iface = net::gateway_iface()?;
	let addrs = net::iface_ip4_addresses(&gw_iface)?;
	let Some(ip4) = addrs.first().copied() else {
		return Err(Error::Sys {
			syscall: "getifaddrs",
			arg: gw_iface,
			err: "failed to determine host's gateway interface IP: \
					no IPv4 addresses found".to_string(),
		}.into());
	};
	let host_ip = ip4.addr;
	let host_lan = ip4.lan_cidr();

	let nameserver = match netopts.outbound_dns {
		true => Some(net::nameserver()?),
		false => None,
	};

	// The jail resolves names itself only when DNS is allowed out
	if netopts.outbound_dns
	{
		fs::copy_file(Path::new("/etc/resolv.conf"),
				&path_join(jailpath, "/etc/resolv.conf"))?;
	}

	// lo0 shows up in every vnet jail; give it its address
	jail::run_in(jid, "ifconfig lo0 inet 127.0.0.1",
			"set up the lo0 interface in jail")?;

	// The wire: A stays here, B moves into the jail
	let epair = net::Epair::create()?;
	let epair_index = epair.index();
	let epair_ip_b = epair.ip_b();
	plog(format!("created epair {}", epair.name_a()));

	exec::run(&format!("ifconfig {} vnet {}", epair.name_b(), jid),
			"transfer the network interface into jail")?;
	jail::run_in(jid, &format!("ifconfig {} inet {} netmask 0xfffffffe",
			epair.name_b(), epair.ip_b()),
			"set up the jail-side epair address")?;
	exec::run(&format!("ifconfig {} inet {} netmask 0xfffffffe",
			epair.name_a(), epair.ip_a()),
			"set up the host-side epair address")?;

	// The in-jail firewall service wants rc.conf to say so
	fs::append(&path_join(jailpath, "/etc/rc.conf"),
			"firewall_enable=\"YES\"\nfirewall_type=\"open\"\n")?;

	jail::run_in_quiet(jid, &format!("route add default {}", epair.ip_a()),
			"set default route in jail")?;

	registry.push("destroy the jail epair", move || Ok(epair.destroy()?));

	// Firewall rules, refcounting the shared outbound NAT.  The
	// teardown goes in first, so a half-failed install still gets its
	// rules pulled back out.
	let fw = FwConfig {
		epair_index,
		epair_ip_b,
		gw_iface,
		host_ip,
		host_lan,
		nameserver,
		net: netopts,
	};
	{
		let fw = fw.clone();
		registry.push("remove firewall rules",
				move || crate::firewall::remove(&fw));
	}
	crate::firewall::install(&fw)?;

	Ok(())
}


/// The video option: find out who owns /dev/video* and mirror that
/// user/group into the jail.
fn setup_video(jid: Jid, user: &str) -> Result<(), anyhow::Error>
{
	use std::os::unix::fs::MetadataExt;

	let mut video_ids: Option<(u32, u32)> = None;
	for ent in std::fs::read_dir("/dev")
			.map_err(|e| Error::io("readdir", "/dev", e))?
	{
		let ent = ent.map_err(|e| Error::io("readdir", "/dev", e))?;
		let name = ent.file_name().to_string_lossy().into_owned();
		let rest = match name.strip_prefix("video") {
			Some(r) => r,
			None => continue,
		};
		if rest.is_empty() || !rest.chars().next().unwrap().is_ascii_digit()
		{ continue }

		let md = ent.metadata()
				.map_err(|e| Error::io("stat", ent.path(), e))?;
		match video_ids {
			None => video_ids = Some((md.uid(), md.gid())),
			Some((uid, gid)) if (md.uid(), md.gid()) != (uid, gid) =>
				warn("video devices have different uid/gid combinations"),
			Some(_) => (),
		}
	}

	match video_ids {
		Some((uid, gid)) => {
			jail::run_in(jid, &format!("/usr/sbin/pw groupadd videoops -g {gid}"),
					"add the videoops group")?;
			jail::run_in(jid, &format!("/usr/sbin/pw groupmod videoops -m {user}"),
					"add the main user to the videoops group")?;
			jail::run_in(jid, &format!("/usr/sbin/pw useradd video -u {uid} -g {gid}"),
					"add the video user in jail")?;
		},
		None => warn("the app expects video, but no video devices are present"),
	}
	Ok(())
}


/// The whole run pipeline.  Returns the (clamped) exit code of the
/// crate's process.
pub(crate) fn run(crate_file: &Path, extra_args: &[String])
		-> Result<i32, anyhow::Error>
{
	plog(format!("'run' command is invoked, {} extra arguments",
			extra_args.len()));

	let user = util::username()?;
	let home_dir = format!("/home/{user}");
	let (uid, gid) = (util::caller_uid(), util::caller_gid());

	crate::locs::ensure_jail_dir()?;

	// Phase A: the tree
	let jailpath = Path::new(crate::locs::JAIL_DIR).join(format!(
			"jail-{}-pid{}", file_bare_name(crate_file), std::process::id()));
	fs::mkdir(&jailpath, 0o700)?;

	let mut registry = Registry::new();
	{
		let jailpath = jailpath.clone();
		registry.push("remove the jail directory", move || {
			plog(format!("removing the jail directory {}", jailpath.display()));
			Ok(fs::rmdir_hier(&jailpath)?)
		});
	}

	plog(format!("extracting the crate file {} into {}",
			crate_file.display(), jailpath.display()));
	exec::run(&format!("{} --decompress < {} | tar xf - -C {}",
			exec::xz_command(), crate_file.display(), jailpath.display()),
			"extract the crate file into the jail directory")?;

	let spec = crate::spec::parse_spec(&path_join(&jailpath, "/+CRATE.SPEC"))?;
	spec.validate()?;
	let spec = spec.preprocess();

	// Phase A.4: the kernel has to be able to do what the spec wants
	if spec.wants_net()
	{ crate::check::net_preconditions()?; }

	crate::scripts::run_section(ScriptSection::RunBegin, &spec, &jailpath)?;

	let devfs = Mount::devfs(path_join(&jailpath, "/dev"));
	devfs.mount()?;
	registry.push("unmount devfs", move || Ok(devfs.unmount()?));

	// The environment the app will see
	let mut jail_env = vec!["CRATE=yes".to_string()];

	// x11: the socket dir mounts through, DISPLAY rides along
	if spec.has_option("x11")
	{
		plog("x11 option is requested: mount the X11 socket in jail");
		let sockdir = path_join(&jailpath, "/tmp/.X11-unix");
		if !fs::dir_exists(&sockdir)
		{ fs::mkdir(&sockdir, 0o777)?; }
		let xmount = Mount::nullfs(sockdir, "/tmp/.X11-unix");
		xmount.mount()?;
		registry.push("unmount the X11 socket dir",
				move || Ok(xmount.unmount()?));

		match std::env::var("DISPLAY") {
			Ok(d) if !d.is_empty() => jail_env.push(format!("DISPLAY={d}")),
			_ => return Err(Error::Config(
					"DISPLAY environment variable is not set".to_string())
					.into()),
		}
	}

	// Phase C: the jail itself
	crate::scripts::run_section(ScriptSection::BeforeCreateJail, &spec,
			&jailpath)?;
	let hostname = crate::info::hostname()?;
	let jid = jail::create(&jailpath, &hostname, spec.has_option("net"))?;
	plog(format!("jail has been created, jid={jid}"));
	{
		let spec = spec.clone();
		let jailpath = jailpath.clone();
		registry.push("remove jail", move || {
			crate::scripts::run_section(ScriptSection::BeforeRemoveJail,
					&spec, &jailpath)?;
			plog(format!("removing jail jid={jid}"));
			jail::remove(jid)?;
			crate::scripts::run_section(ScriptSection::AfterRemoveJail,
					&spec, &jailpath)?;
			Ok(())
		});
	}
	crate::scripts::run_section(ScriptSection::AfterCreateJail, &spec,
			&jailpath)?;

	// Phase B: networking (the epair needs the jid, so it comes here)
	if spec.wants_net()
	{
		if let Some(netopts) = spec.option_net()
		{ setup_networking(&jailpath, jid, netopts.clone(), &mut registry)?; }
	}

	// Phase D: inside the jail
	if spec.wants_net()
	{
		jail::run_in_quiet(jid, "service ipfw start",
				"start firewall in jail")?;
	}

	plog(format!("create user's home directory {home_dir}, \
			uid={uid} gid={gid}"));
	let jhome = path_join(&jailpath, &home_dir);
	if !fs::dir_exists(&path_join(&jailpath, "/home"))
	{ fs::mkdir(&path_join(&jailpath, "/home"), 0o755)?; }
	fs::mkdir(&jhome, 0o755)?;
	fs::chown(&jhome, uid, gid)?;

	crate::scripts::run_section(ScriptSection::BeforeCreateUsers, &spec,
			&jailpath)?;
	plog(format!("add group and user {user} in jail"));
	jail::run_in(jid, &format!("/usr/sbin/pw groupadd {user} -g {gid}"),
			"add the group in jail")?;
	jail::run_in(jid, &format!(
			"/usr/sbin/pw useradd {user} -u {uid} -g {gid} -s /bin/sh -d {home_dir}"),
			"add the user in jail")?;
	jail::run_in(jid, &format!("/usr/sbin/pw usermod {user} -G wheel"),
			"add the user to the wheel group")?;

	if spec.has_option("video")
	{ setup_video(jid, &user)?; }

	crate::scripts::run_section(ScriptSection::AfterCreateUsers, &spec,
			&jailpath)?;

	// Shared directories: host side must exist, jail side gets made
	for share in &spec.dirs_share
	{
		let host = PathBuf::from(substitute_vars(&share.host));
		let jdir = path_join(&jailpath, substitute_vars(&share.jail));
		if !fs::dir_exists(&host)
		{
			return Err(Error::Config(format!("shared directory '{}' \
					doesn't exist on the host, can't run the app",
					host.display())).into());
		}
		fs::mkdir_p(&jdir)?;
		let m = Mount::nullfs(jdir, host);
		m.mount()?;
		registry.push("unmount a shared directory",
				move || Ok(m.unmount()?));
	}

	// Shared files: hard links, made in whichever direction the file
	// already exists; both missing is an error
	for share in &spec.files_share
	{
		let host = PathBuf::from(substitute_vars(&share.host));
		let jfile = path_join(&jailpath, substitute_vars(&share.jail));
		let host_exists = fs::file_exists(&host);
		let jail_exists = fs::file_exists(&jfile);
		match (host_exists, jail_exists) {
			(false, false) => {
				return Err(Error::Config(format!("none of the files in a \
						file-share exists: host={} jail={}",
						host.display(), jfile.display())).into());
			},
			(true, true) => {
				fs::unlink(&jfile)?;
				fs::link(&host, &jfile)?;
			},
			(true, false) => fs::link(&host, &jfile)?,
			(false, true) => fs::link(&jfile, &host)?,
		}
	}

	// Phase E: services (and the X11 credentials they may want)
	crate::scripts::run_section(ScriptSection::BeforeStartServices, &spec,
			&jailpath)?;
	for service in &spec.run_services
	{
		jail::run_in(jid, &format!("/usr/sbin/service {service} onestart"),
				"start the service in jail")?;
	}
	crate::scripts::run_section(ScriptSection::AfterStartServices, &spec,
			&jailpath)?;

	if spec.has_option("x11")
	{
		// The host home isn't necessarily /home/<user>; the jail one is
		let host_home = util::caller_home();
		for fname in [".Xauthority", ".ICEauthority"]
		{
			let hfile = PathBuf::from(format!("{host_home}/{fname}"));
			if fs::file_exists(&hfile)
			{
				let jfile = path_join(&jailpath, format!("{home_dir}/{fname}"));
				fs::copy_file(&hfile, &jfile)?;
				fs::chown(&jfile, uid, gid)?;
			}
		}
	}

	// Phase F: the payload
	crate::scripts::run_section(ScriptSection::BeforeExecute, &spec,
			&jailpath)?;
	let raw_code = match &spec.run_executable {
		Some(exe) => {
			let env = jail_env.join(" ");
			plog(format!("running the command in jail: env={env}"));
			let mut cmd = format!("/usr/bin/env {env}");
			if spec.has_option("dbg-ktrace")
			{ cmd.push_str(" /usr/bin/ktrace"); }
			cmd.push(' ');
			cmd.push_str(exe);
			if !spec.run_args.is_empty()
			{
				cmd.push(' ');
				cmd.push_str(&spec.run_args);
			}
			for arg in extra_args
			{
				cmd.push(' ');
				cmd.push_str(arg);
			}
			jail::run_in_as(jid, &user, &cmd, "run the command in jail")?
		},
		None => {
			// Service-only crate: park a signal-friendly sleeper in
			// the foreground
			plog("this is a service-only crate, install and run the \
					command that exits on Ctrl-C");
			let script = path_join(&jailpath, "/run.sh");
			fs::write(&script, &idle_script(&spec.run_services))?;
			fs::chown(&script, uid, gid)?;
			fs::chmod(&script, 0o500)?;
			jail::run_in_as(jid, &user, "/run.sh",
					"run the idle command in jail")?
		},
	};
	plog(format!("command has finished in jail: raw={raw_code}"));
	crate::scripts::run_section(ScriptSection::AfterExecute, &spec,
			&jailpath)?;

	// Phase G: unwind.  Services stop in reverse start order.
	for service in spec.run_services.iter().rev()
	{
		jail::run_in(jid, &format!("/usr/sbin/service {service} onestop"),
				"stop the service in jail")?;
	}

	if spec.has_option("dbg-ktrace")
	{
		// The trace lands in the in-jail home (jexec -l starts there)
		let traced = path_join(&jailpath, format!("{home_dir}/ktrace.out"));
		fs::copy_file(&traced, Path::new("ktrace.out"))?;
		fs::chown(Path::new("ktrace.out"), uid, gid)?;
	}

	crate::scripts::run_section(ScriptSection::RunEnd, &spec, &jailpath)?;

	// Everything registered goes, newest first: jail, firewall,
	// epair, mounts, jail dir
	registry.run_now();

	// Exit codes above 255 have been observed out of system(); keep
	// the raw value in the log above and clamp what we return
	plog("'run' command has succeeded");
	Ok(raw_code.clamp(0, 255))
}




#[cfg(test)]
mod tests
{
	#[test]
	fn idle_script_shape()
	{
		let s = super::idle_script(&["tor".to_string(), "dbus".to_string()]);
		assert!(s.starts_with("#!/bin/sh\n"));
		assert!(s.contains("trap onSIGINT 2"));
		assert!(s.contains("Running the services: tor dbus"));
		assert!(s.contains("/bin/sleep"));
	}
}
