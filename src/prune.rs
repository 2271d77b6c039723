//! Base-tree pruning: reduce a freshly extracted (and
//! package-populated) base tree to the minimal set that still runs
//! what the spec wants run.
//!
//! Two phases: compute the keep set (the spec'd files plus their
//! transitive ELF closures plus the utility seeds), then sweep a
//! fixed list of base directories with the appropriate removal
//! flavor.  Everything under the package prefix is kept wholesale;
//! packages may lean on base libraries, so their closures feed the
//! keep set (filtered to base paths), but never the other way around.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::err::warn;
use crate::spec::Spec;
use crate::util::fs;
use crate::util::path_join;


/// Third-party packages land here; it's exempt from the sweep.
const PKG_PREFIX: &str = "/usr/local/";


fn is_base_path(path: &str) -> bool
{
	!path.starts_with(PKG_PREFIX)
}


/// The utilities every crate keeps: user management, a shell, env,
/// and the dynamic linker, or nothing else we kept will even start.
const SEED_ALWAYS: &[&str] = &[
	"/bin/sh",
	"/usr/bin/env",
	"/usr/sbin/pw",
	"/usr/sbin/pwd_mkdb",
	"/usr/libexec/ld-elf.so.1",
];

/// What `service <x> onestart` drags in (found the hard way, with
/// ktrace).
const SEED_SERVICES: &[&str] = &[
	"/usr/sbin/service",
	"/bin/cat",
	"/bin/chmod",
	"/usr/bin/env",
	"/bin/kenv",
	"/bin/mkdir",
	"/usr/bin/touch",
	"/usr/bin/procstat",
	"/usr/bin/grep",
	"/sbin/sysctl",
	"/usr/bin/limits",
	"/usr/sbin/daemon",
];


/// Compute the keep set and sweep everything else.
pub(crate) fn remove_redundant(jail: &Path, spec: &Spec)
		-> Result<(), anyhow::Error>
{
	let keep = build_keep_set(jail, spec)?;
	sweep(jail, spec, &keep)?;
	Ok(())
}


/// The keep set, as jail-prefixed paths.
fn build_keep_set(jail: &Path, spec: &Spec)
		-> Result<BTreeSet<PathBuf>, anyhow::Error>
{
	let mut keep: BTreeSet<PathBuf> = BTreeSet::new();

	// Keep one file, and its closure when it's ELF.  `file` is the
	// in-jail path.
	fn keep_file(keep: &mut BTreeSet<PathBuf>, jail: &Path, file: &str)
			-> Result<(), anyhow::Error>
	{
		let jpath = path_join(jail, file);
		keep.insert(jpath.clone());
		if fs::is_elf_or_dir(&jpath) == fs::PathKind::Elf
		{
			for dep in crate::elf::dependencies(Path::new(file), jail, |_| true)?
			{ keep.insert(path_join(jail, dep)); }
		}
		Ok(())
	}

	// The executable, when it lives in base.  (Package executables
	// survive on their own; their base closure is handled with the
	// rest of the packages below.)
	if let Some(exe) = &spec.run_executable
	{
		if is_base_path(exe)
		{ keep.insert(path_join(jail, exe)); }
		let jexe = path_join(jail, exe);
		if fs::is_elf_or_dir(&jexe) == fs::PathKind::Elf
		{
			for dep in crate::elf::dependencies(Path::new(exe), jail, |_| true)?
			{ keep.insert(path_join(jail, dep)); }
		}
	}

	// Spec'd keeps
	for file in &spec.base_keep
	{ keep_file(&mut keep, jail, file)?; }

	// Wildcard keeps: expand against the tree, then treat like keeps
	for pattern in &spec.base_keep_wildcard
	{
		let jpattern = path_join(jail, pattern);
		let matches = glob::glob(&jpattern.to_string_lossy())
				.map_err(|e| crate::err::Error::Config(format!(
					"bad keep-wildcard pattern '{pattern}': {e}")))?;
		let mut any = false;
		for m in matches.flatten()
		{
			any = true;
			// Back to an in-jail path for the ldd run
			let inside = m.strip_prefix(jail).unwrap_or(&m);
			let inside = format!("/{}", inside.display());
			keep_file(&mut keep, jail, &inside)?;
		}
		if !any
		{ warn(format!("keep-wildcard '{pattern}' matched nothing")); }
	}

	// Utility seeds
	for file in SEED_ALWAYS
	{ keep_file(&mut keep, jail, file)?; }

	if !spec.run_services.is_empty()
	{
		for file in SEED_SERVICES
		{ keep_file(&mut keep, jail, file)?; }
		if spec.run_executable.is_none()
		{
			// The idle script for service-only crates sleeps
			keep_file(&mut keep, jail, "/bin/sleep")?;
		}
	}

	// Installed packages may link against base libraries; walk every
	// package ELF and fold its base-side closure in.
	if !spec.pkg_install.is_empty() || !spec.pkg_add.is_empty()
	{
		let pkgroot = path_join(jail, PKG_PREFIX);
		if pkgroot.is_dir()
		{
			for elf in fs::find_elf_files(&pkgroot)?
			{
				let inside = elf.strip_prefix(jail).unwrap_or(&elf);
				let inside = format!("/{}", inside.display());
				let deps = crate::elf::dependencies(
						Path::new(&inside), jail, is_base_path)?;
				for dep in deps
				{ keep.insert(path_join(jail, dep)); }
			}
		}
	}

	Ok(keep)
}


/// The directed deletion sweep.  Which directories get which
/// treatment is policy, not inference; this list is it.
fn sweep(jail: &Path, spec: &Spec, keep: &BTreeSet<PathBuf>)
		-> Result<(), anyhow::Error>
{
	// Spec'd unconditional removals happen first, keep set or no
	for path in &spec.base_remove
	{
		let jpath = path_join(jail, path);
		if fs::dir_exists(&jpath)
		{ fs::rmdir_hier(&jpath)?; }
		else if jpath.symlink_metadata().is_ok()
		{ fs::unlink(&jpath)?; }
		else
		{ warn(format!("base/remove path '{path}' doesn't exist")); }
	}

	enum Op { Flat, Hier, FlatExcept, HierExcept, Rmdir, Unlink }
	use Op::*;

	let plan: &[(&str, Op)] = &[
		("/bin", FlatExcept),
		("/boot", Hier),
		("/etc/periodic", Hier),
		("/usr/lib/include", Unlink),
		("/lib", HierExcept),
		("/usr/lib", HierExcept),
		("/usr/lib32", Hier),
		("/usr/include", Hier),
		("/sbin", HierExcept),
		("/usr/bin", HierExcept),
		("/usr/sbin", HierExcept),
		("/usr/libexec", HierExcept),
		("/usr/share/dtrace", Hier),
		("/usr/share/doc", Hier),
		("/usr/share/examples", Hier),
		("/usr/share/bsdconfig", Hier),
		("/usr/share/games", Hier),
		("/usr/share/i18n", Hier),
		("/usr/share/man", Hier),
		("/usr/share/misc", Hier),
		("/usr/share/pc-sysinstall", Hier),
		("/usr/share/openssl", Hier),
		("/usr/tests", Hier),
		("/usr/src", Rmdir),
		("/usr/obj", Rmdir),
		("/var/db/etcupdate", Hier),
		("/rescue", Flat),
	];

	for (dir, op) in plan
	{
		let jdir = path_join(jail, dir);
		// A base this old or this trimmed just doesn't have the dir;
		// nothing to delete is success.
		if jdir.symlink_metadata().is_err() { continue }

		match op {
			Flat => fs::rmdir_flat(&jdir)?,
			Hier => fs::rmdir_hier(&jdir)?,
			FlatExcept => { fs::rmdir_flat_except(&jdir, keep)?; },
			HierExcept => { fs::rmdir_hier_except(&jdir, keep)?; },
			Rmdir => fs::rmdir(&jdir)?,
			Unlink => fs::unlink(&jdir)?,
		}
	}

	// Package metadata/cache dirs only exist to be thrown away, but
	// only a package-install run created them
	if !spec.pkg_install.is_empty() || !spec.pkg_add.is_empty()
	{
		for dir in ["/var/cache/pkg", "/var/db/pkg"]
		{
			let jdir = path_join(jail, dir);
			if jdir.is_dir()
			{ fs::rmdir_flat(&jdir)?; }
		}
	}

	// Static archives are build-time baggage
	if !spec.has_option("no-rm-static-libs")
	{
		let pkgroot = path_join(jail, PKG_PREFIX);
		if pkgroot.is_dir()
		{ remove_static_libs(&pkgroot)?; }
	}

	Ok(())
}


/// Unlink every *.a under a tree.
fn remove_static_libs(dir: &Path) -> Result<(), anyhow::Error>
{
	for ent in std::fs::read_dir(dir)
			.map_err(|e| crate::err::Error::io("readdir", dir, e))?
	{
		let ent = ent.map_err(|e| crate::err::Error::io("readdir", dir, e))?;
		let path = ent.path();
		let md = path.symlink_metadata()
				.map_err(|e| crate::err::Error::io("lstat", &path, e))?;
		if md.is_dir()
		{ remove_static_libs(&path)?; }
		else if path.extension().map(|e| e == "a").unwrap_or(false)
		{ fs::unlink(&path)?; }
	}
	Ok(())
}




#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn base_path_filter()
	{
		assert!(is_base_path("/lib/libc.so.7"));
		assert!(is_base_path("/usr/lib/libm.so.5"));
		assert!(!is_base_path("/usr/local/lib/libpng.so"));
		// The prefix itself (no trailing slash) is base; only things
		// under it are packages
		assert!(is_base_path("/usr/local"));
	}

	#[test]
	fn static_lib_removal()
	{
		let td = tempfile::tempdir().unwrap();
		let d = td.path();
		std::fs::create_dir_all(d.join("lib/sub")).unwrap();
		std::fs::write(d.join("lib/libx.a"), b"!<arch>").unwrap();
		std::fs::write(d.join("lib/sub/liby.a"), b"!<arch>").unwrap();
		std::fs::write(d.join("lib/libx.so"), b"so").unwrap();

		remove_static_libs(d).unwrap();
		assert!(!d.join("lib/libx.a").exists());
		assert!(!d.join("lib/sub/liby.a").exists());
		assert!(d.join("lib/libx.so").exists());
	}

	#[test]
	fn base_remove_and_sweep_missing_dirs()
	{
		// A tiny fake tree: the sweep should tolerate nearly all of
		// its plan being absent, honor base.remove, and respect the
		// keep set.
		let td = tempfile::tempdir().unwrap();
		let jail = td.path();

		std::fs::create_dir_all(jail.join("bin")).unwrap();
		std::fs::write(jail.join("bin/sh"), b"#!").unwrap();
		std::fs::write(jail.join("bin/goner"), b"x").unwrap();
		std::fs::create_dir_all(jail.join("etc")).unwrap();
		std::fs::write(jail.join("etc/motd"), b"welcome").unwrap();
		std::fs::create_dir_all(jail.join("usr/share/doc")).unwrap();
		std::fs::write(jail.join("usr/share/doc/README"), b"docs").unwrap();

		let spec = Spec {
			base_remove: vec!["/etc/motd".to_string()],
			..Default::default()
		};
		let keep: BTreeSet<PathBuf> =
				[jail.join("bin/sh")].into_iter().collect();

		sweep(jail, &spec, &keep).unwrap();

		assert!(jail.join("bin/sh").exists());
		assert!(!jail.join("bin/goner").exists());
		assert!(!jail.join("etc/motd").exists());
		assert!(!jail.join("usr/share/doc").exists());
	}
}
