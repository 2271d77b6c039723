//! Filesystem-related funcs.
//!
//! Partly thin wrappers over libc for things std doesn't cover
//! (chflags), partly the tree-surgery primitives the pruner leans on.
//! Everything fails fast with a descriptive error; the one recovery
//! here is the EPERM-after-chflags retry.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use crate::err::Error;



/*
 * Low-level wrappers
 */

fn cpath(path: &Path) -> Result<CString, Error>
{
	let bytes = path.as_os_str().as_encoded_bytes();
	CString::new(bytes).map_err(|_| Error::Sys {
		syscall: "cstring",
		arg: path.to_string_lossy().into_owned(),
		err: "embedded NUL in path".to_string(),
	})
}

fn errno() -> i32
{
	std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}


/// Clear all file flags (schg and friends) on a path.
///
/// When we're tearing down a base tree, EPERM on unlink/rmdir nearly
/// always means the immutable/undeletable flag, so the removal funcs
/// below clear flags and retry exactly once.
pub(crate) fn chflags_clear(path: &Path) -> Result<(), Error>
{
	let f = cpath(path)?;
	let res = unsafe { libc::chflags(f.as_ptr(), 0) };
	match res {
		0 => Ok(()),
		_ => Err(Error::sys("chflags", path.to_string_lossy(), errno())),
	}
}


pub(crate) fn chown(path: &Path, uid: u32, gid: u32) -> Result<(), Error>
{
	let f = cpath(path)?;
	let res = unsafe { libc::chown(f.as_ptr(), uid, gid) };
	match res {
		0 => Ok(()),
		_ => Err(Error::sys("chown", path.to_string_lossy(), errno())),
	}
}


pub(crate) fn chmod(path: &Path, mode: u32) -> Result<(), Error>
{
	let f = cpath(path)?;
	let res = unsafe { libc::chmod(f.as_ptr(), mode as libc::mode_t) };
	match res {
		0 => Ok(()),
		_ => Err(Error::sys("chmod", path.to_string_lossy(), errno())),
	}
}



/*
 * Mid-level bits over std
 */

pub(crate) fn file_exists(path: &Path) -> bool
{
	path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

pub(crate) fn dir_exists(path: &Path) -> bool
{
	path.metadata().map(|m| m.is_dir()).unwrap_or(false)
}


pub(crate) fn mkdir(dir: &Path, mode: u32) -> Result<(), Error>
{
	use std::fs::DirBuilder;
	use std::os::unix::fs::DirBuilderExt;
	let mut db = DirBuilder::new();
	db.mode(mode);
	db.create(dir).map_err(|e| Error::io("mkdir", dir, e))
}

/// mkdir -p equivalent for jail-side share dirs.
pub(crate) fn mkdir_p(dir: &Path) -> Result<(), Error>
{
	std::fs::create_dir_all(dir).map_err(|e| Error::io("mkdir", dir, e))
}


pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), Error>
{
	std::fs::copy(src, dst).map_err(|e| Error::io("copy", src, e))?;
	Ok(())
}

pub(crate) fn link(existing: &Path, new: &Path) -> Result<(), Error>
{
	std::fs::hard_link(existing, new)
			.map_err(|e| Error::io("link", existing, e))
}


pub(crate) fn write(path: &Path, data: &str) -> Result<(), Error>
{
	std::fs::write(path, data).map_err(|e| Error::io("write", path, e))
}

pub(crate) fn append(path: &Path, data: &str) -> Result<(), Error>
{
	use std::io::Write as _;
	let mut f = std::fs::OpenOptions::new()
			.create(true).append(true).open(path)
			.map_err(|e| Error::io("open", path, e))?;
	f.write_all(data.as_bytes())
			.map_err(|e| Error::io("append", path, e))
}

pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>, Error>
{
	let data = std::fs::read_to_string(path)
			.map_err(|e| Error::io("read", path, e))?;
	Ok(data.lines().map(|l| l.to_string()).collect())
}



/*
 * Removal, with the EPERM policy
 */

pub(crate) fn unlink(file: &Path) -> Result<(), Error>
{
	match std::fs::remove_file(file) {
		Ok(()) => Ok(()),
		Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
			// Probably schg; strip flags and go again, once.
			chflags_clear(file)?;
			std::fs::remove_file(file)
					.map_err(|e| Error::io("unlink", file, e))
		},
		Err(e) => Err(Error::io("unlink", file, e)),
	}
}


pub(crate) fn rmdir(dir: &Path) -> Result<(), Error>
{
	match std::fs::remove_dir(dir) {
		Ok(()) => Ok(()),
		Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
			chflags_clear(dir)?;
			std::fs::remove_dir(dir)
					.map_err(|e| Error::io("rmdir", dir, e))
		},
		Err(e) => Err(Error::io("rmdir", dir, e)),
	}
}


fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, Error>
{
	let rd = std::fs::read_dir(dir).map_err(|e| Error::io("readdir", dir, e))?;
	let mut ret = Vec::new();
	for ent in rd
	{
		let ent = ent.map_err(|e| Error::io("readdir", dir, e))?;
		ret.push(ent.path());
	}
	Ok(ret)
}


/// Remove the entries at the top of a dir, then the dir itself.
pub(crate) fn rmdir_flat(dir: &Path) -> Result<(), Error>
{
	for ent in read_dir(dir)?
	{ unlink(&ent)?; }
	rmdir(dir)
}


/// Recursive removal.  Symlinks get unlinked, never followed; we're
/// deleting a tree, not whatever it points out of itself at.
pub(crate) fn rmdir_hier(dir: &Path) -> Result<(), Error>
{
	for ent in read_dir(dir)?
	{
		let md = ent.symlink_metadata()
				.map_err(|e| Error::io("lstat", &ent, e))?;
		if md.is_symlink()
		{ unlink(&ent)?; }
		else if md.is_dir()
		{ rmdir_hier(&ent)?; }
		else
		{ unlink(&ent)?; }
	}
	rmdir(dir)
}


/// Flat removal skipping paths in `except`.  The dir itself survives
/// iff something in it did.  Returns whether anything was skipped.
pub(crate) fn rmdir_flat_except(dir: &Path, except: &BTreeSet<PathBuf>)
		-> Result<bool, Error>
{
	let mut skipped = false;
	for ent in read_dir(dir)?
	{
		match except.contains(&ent) {
			true  => skipped = true,
			false => unlink(&ent)?,
		}
	}
	if !skipped { rmdir(dir)?; }
	Ok(skipped)
}


/// Recursive removal skipping paths in `except`.
pub(crate) fn rmdir_hier_except(dir: &Path, except: &BTreeSet<PathBuf>)
		-> Result<bool, Error>
{
	let mut skipped = false;
	for ent in read_dir(dir)?
	{
		if except.contains(&ent)
		{
			skipped = true;
			continue;
		}
		let md = ent.symlink_metadata()
				.map_err(|e| Error::io("lstat", &ent, e))?;
		if md.is_symlink()
		{ unlink(&ent)?; }
		else if md.is_dir()
		{ skipped |= rmdir_hier_except(&ent, except)?; }
		else
		{ unlink(&ent)?; }
	}
	if !skipped { rmdir(dir)?; }
	Ok(skipped)
}



/*
 * Signature sniffing
 */

/// What the pruner's walk cares a path to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathKind
{
	Elf,
	Dir,
	Other,
}


/// ELF iff regular file, owner-exec bit, size >= 128, and the four
/// magic bytes.  (ELF executables can apparently get down to ~142
/// bytes, so 128 is a safe floor.)
pub(crate) fn is_elf_or_dir(path: &Path) -> PathKind
{
	use std::os::unix::fs::PermissionsExt;

	let md = match path.metadata() {
		Ok(m) => m,
		Err(e) => {
			// Dangling symlink or the like; nothing we'd keep anyway.
			crate::err::warn(format!("is_elf_or_dir: failed to stat '{}': {e}",
					path.display()));
			return PathKind::Other;
		},
	};

	if md.is_dir() { return PathKind::Dir }
	if !md.is_file() { return PathKind::Other }
	if md.permissions().mode() & 0o100 == 0 { return PathKind::Other }
	if md.len() < 128 { return PathKind::Other }

	let mut magic = [0u8; 4];
	let ok = std::fs::File::open(path)
			.and_then(|mut f| f.read_exact(&mut magic))
			.is_ok();
	match ok && magic == [0x7f, b'E', b'L', b'F'] {
		true  => PathKind::Elf,
		false => PathKind::Other,
	}
}


/// XZ iff regular file, size > 256, and the five magic bytes.  Any
/// failure along the way just means "not an XZ archive".
pub(crate) fn is_xz_archive(path: &Path) -> bool
{
	let md = match path.metadata() {
		Ok(m) => m,
		Err(_) => return false,
	};
	if !md.is_file() || md.len() <= 256 { return false }

	let mut magic = [0u8; 5];
	let ok = std::fs::File::open(path)
			.and_then(|mut f| f.read_exact(&mut magic))
			.is_ok();
	ok && magic == [0xfd, 0x37, 0x7a, 0x58, 0x5a]
}


/// Depth-first collection of every ELF file under a dir.
pub(crate) fn find_elf_files(dir: &Path) -> Result<BTreeSet<PathBuf>, Error>
{
	let mut set = BTreeSet::new();
	find_elf_inner(dir, &mut set)?;
	Ok(set)
}

fn find_elf_inner(dir: &Path, set: &mut BTreeSet<PathBuf>)
		-> Result<(), Error>
{
	for ent in read_dir(dir)?
	{
		match is_elf_or_dir(&ent) {
			PathKind::Elf => { set.insert(ent); },
			PathKind::Dir => find_elf_inner(&ent, set)?,
			PathKind::Other => (),
		}
	}
	Ok(())
}
