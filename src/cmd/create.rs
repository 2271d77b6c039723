//! $0 create: spec in, crate file out.

use std::path::{Path, PathBuf};

use crate::err::Error;
use crate::exec;
use crate::mount::Mount;
use crate::scope::Teardown;
use crate::spec::Spec;
use crate::util::fs;
use crate::util::{file_bare_name, path_join, plog};


/// Blue banner around the long-running pkg phase, so it's obvious in
/// a wall of pkg output where we are.
fn notify_long_process(begin: bool, process: &str, doing: &str)
{
	use colored::Colorize as _;
	let line = match begin {
		true  => format!("== Running {process} in order to {doing}"),
		false => format!("== {process} has finished to {doing}"),
	};
	println!("{}", "==".blue());
	println!("{}", line.blue());
	println!("{}", "==".blue());
}


fn chroot_cmd(jail: &Path, cmd: &str, what: &str) -> Result<(), Error>
{
	exec::run(&format!("{}{}", exec::chroot_prefix(jail), cmd), what)
}


/// The package phase: everything pkg does to the tree, then pkg
/// itself gets deleted out of it.
fn install_packages(jail: &Path, spec: &Spec) -> Result<(), anyhow::Error>
{
	let mut all: Vec<&str> =
			spec.pkg_install.iter().map(|s| s.as_str()).collect();
	all.extend(spec.pkg_add.iter().map(|s| s.as_str()));
	let doing = format!("install the required packages: {}", all.join(" "));
	notify_long_process(true, "pkg", &doing);

	if !spec.pkg_install.is_empty()
	{
		chroot_cmd(jail, &format!("pkg install {}",
				spec.pkg_install.join(" ")),
				"install the requested packages into the jail")?;
	}

	// Adds go in without dependency resolution; the file has to take
	// a detour through the jail's /tmp for the chrooted pkg to see it
	for pkgfile in &spec.pkg_add
	{
		let fname = crate::util::file_name(pkgfile);
		fs::copy_file(Path::new(pkgfile), &path_join(jail, format!("/tmp/{fname}")))?;
		chroot_cmd(jail, &format!("pkg add /tmp/{fname}"),
				"add the package file in jail")?;
	}

	// Local overrides: out with the repo version, in with the local
	for (name, pkgfile) in &spec.pkg_local_override
	{
		if !fs::file_exists(Path::new(pkgfile))
		{
			return Err(Error::Config(format!("package override: failed to \
					find the package file '{pkgfile}'")).into());
		}
		chroot_cmd(jail, &format!("pkg delete {name}"),
				&format!("remove the package '{name}' for local override \
						in jail"))?;
		let fname = crate::util::file_name(pkgfile);
		let tmp = path_join(jail, format!("/tmp/{fname}"));
		fs::copy_file(Path::new(pkgfile), &tmp)?;
		chroot_cmd(jail, &format!("pkg add /tmp/{fname}"),
				&format!("add the local override package '{pkgfile}' \
						in jail"))?;
		fs::unlink(&tmp)?;
	}

	// Nukes don't care who depends on them
	for name in &spec.pkg_nuke
	{
		chroot_cmd(jail, &format!("/usr/local/sbin/pkg-static delete -y -f \
				{name}"), "nuke the package in the jail")?;
	}

	// Record what ended up installed, then evict pkg itself
	exec::run(&format!("{}pkg info > {}", exec::chroot_prefix(jail),
			path_join(jail, "/+CRATE.PKGS").display()),
			"write the +CRATE.PKGS file")?;
	chroot_cmd(jail, "pkg delete -f pkg",
			"remove the 'pkg' package from jail")?;

	if !spec.pkg_add.is_empty()
	{
		exec::run(&format!("rm {}/tmp/*", jail.display()),
				"remove the added package files from jail")?;
	}

	notify_long_process(false, "pkg", &doing);
	Ok(())
}


/// The whole create pipeline.
pub(crate) fn run(spec_file: &Path, output: Option<&Path>)
		-> Result<(), anyhow::Error>
{
	plog("'create' command is invoked");

	let spec = crate::spec::parse_spec(spec_file)?;
	spec.validate()?;
	let spec = spec.preprocess();

	let crate_file: PathBuf = match output {
		Some(o) => o.to_path_buf(),
		None => format!("{}.crate", spec.guess_name()).into(),
	};

	crate::locs::ensure_jail_dir()?;
	crate::locs::ensure_cache_dir()?;

	// Fetch the base archive once; it's a cache, not a mirror
	let base = crate::locs::base_archive();
	if !fs::file_exists(&base)
	{
		let url = crate::locs::base_archive_url()?;
		println!("downloading base.txz from {url} ...");
		exec::run(&format!("fetch -o {} {}", base.display(), url),
				"download base.txz")?;
		println!("base.txz has finished downloading");
	}

	// The working tree, gone again on every exit path
	let jail = Path::new(crate::locs::JAIL_DIR).join(format!(
			"chroot-create-{}-pid{}",
			file_bare_name(&crate_file), std::process::id()));
	fs::mkdir(&jail, 0o700)?;
	let mut td_jaildir = {
		let jail = jail.clone();
		Teardown::new("remove the jail directory", move || {
			plog(format!("removing the jail directory {}", jail.display()));
			Ok(fs::rmdir_hier(&jail)?)
		})
	};

	plog("unpacking the base archive");
	exec::run(&format!(
			"cat {} | {} --decompress | tar -xf - --uname \"\" --gname \"\" -C {}",
			base.display(), exec::xz_command(), jail.display()),
			"unpack the system base into the jail directory")?;

	// pkg needs to resolve names from inside the tree
	fs::copy_file(Path::new("/etc/resolv.conf"),
			&path_join(&jail, "/etc/resolv.conf"))?;

	plog("mounting devfs in jail");
	let devfs = Mount::devfs(path_join(&jail, "/dev"));
	devfs.mount()?;
	let mut td_devfs = Teardown::new("unmount devfs",
			move || Ok(devfs.unmount()?));

	plog("mounting the pkg cache as nullfs in jail");
	let jail_pkg_cache = path_join(&jail, "/var/cache/pkg");
	if !fs::dir_exists(&jail_pkg_cache)
	{ fs::mkdir(&jail_pkg_cache, 0o755)?; }
	let pkgcache = Mount::nullfs(jail_pkg_cache, "/var/cache/pkg");
	pkgcache.mount()?;
	let mut td_pkgcache = Teardown::new("unmount the pkg cache",
			move || Ok(pkgcache.unmount()?));

	if !spec.pkg_install.is_empty() || !spec.pkg_add.is_empty()
	{
		plog("installing packages ...");
		install_packages(&jail, &spec)?;
		plog("done installing packages");
	}

	plog("unmounting the pkg cache in jail");
	td_pkgcache.run_now()?;
	plog("unmounting devfs in jail");
	td_devfs.run_now()?;

	plog("removing unnecessary parts");
	crate::prune::remove_redundant(&jail, &spec)?;

	fs::unlink(&path_join(&jail, "/etc/resolv.conf"))?;

	plog("writing the +CRATE.SPEC file");
	fs::copy_file(spec_file, &path_join(&jail, "/+CRATE.SPEC"))?;

	plog(format!("creating the crate file {}", crate_file.display()));
	exec::run(&format!("tar cf - -C {} . | {} --extreme > {}",
			jail.display(), exec::xz_command(), crate_file.display()),
			"compress the jail directory into the crate file")?;
	fs::chown(&crate_file, crate::util::caller_uid(),
			crate::util::caller_gid())?;

	plog("removing the jail directory");
	td_jaildir.run_now()?;

	println!("the crate file '{}' has been created", crate_file.display());
	plog("'create' command has succeeded");
	Ok(())
}
