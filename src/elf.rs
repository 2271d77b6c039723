//! ELF shared-library dependency resolution.
//!
//! We don't reimplement the dynamic linker; ld-elf.so finds libraries
//! through its own magic, and ldd(1) will happily tell us what it
//! resolved.  So: run ldd on the binary inside a chroot of the jail
//! and read the right-hand sides back.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};


/// Resolved dependencies of one binary, as paths inside the jail.
/// `filter` drops paths we don't care about (the pruner uses it to
/// keep package-prefix libs out of base closures).
pub(crate) fn dependencies(exe: &Path, jail: &Path,
		filter: impl Fn(&str) -> bool)
		-> Result<BTreeSet<PathBuf>, anyhow::Error>
{
	let cmd = format!("/usr/sbin/chroot {} /bin/sh -c \"ldd {}\"",
			jail.display(), exe.display());
	let out = crate::exec::output(&cmd, "get elf dependencies")?;

	Ok(parse_ldd(&out).into_iter()
			.filter(|p| filter(p))
			.map(PathBuf::from)
			.collect())
}


/// Pull the resolved paths out of ldd output.  Lines look like
///
///     libthr.so.3 => /lib/libthr.so.3 (0x801234000)
///
/// and we want the absolute middle bit.  Unresolved ("not found") and
/// non-dependency lines just get skipped.
fn parse_ldd(out: &str) -> BTreeSet<String>
{
	let mut deps = BTreeSet::new();
	for line in out.lines()
	{
		let Some((_, rhs)) = line.split_once("=>") else { continue };
		let path = rhs.trim().split_whitespace().next().unwrap_or("");
		if path.starts_with('/')
		{ deps.insert(path.to_string()); }
	}
	deps
}




#[cfg(test)]
mod tests
{
	use super::parse_ldd;

	const LDD_OUT: &str = "\
/usr/local/bin/gimp:
\tlibgimp-2.0.so.0 => /usr/local/lib/libgimp-2.0.so.0 (0x800280000)\n\
\tlibc.so.7 => /lib/libc.so.7 (0x800a00000)\n\
\tlibm.so.5 => /lib/libm.so.5 (0x800d00000)\n\
\tlibmissing.so => not found\n";

	#[test]
	fn parses_resolved_paths()
	{
		let deps = parse_ldd(LDD_OUT);
		let expect: std::collections::BTreeSet<String> = [
			"/usr/local/lib/libgimp-2.0.so.0",
			"/lib/libc.so.7",
			"/lib/libm.so.5",
		].into_iter().map(String::from).collect();
		assert_eq!(deps, expect);
	}

	#[test]
	fn empty_and_junk()
	{
		assert!(parse_ldd("").is_empty());
		assert!(parse_ldd("/bin/sh:\n").is_empty());
		// A static binary's complaint
		assert!(parse_ldd("ldd: /rescue/sh: not a dynamic ELF executable\n")
				.is_empty());
	}
}
