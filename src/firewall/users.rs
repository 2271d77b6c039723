//! The cross-process firewall users set.
//!
//! Every `run` with outbound networking shares one common ipfw NAT
//! rule.  Who's currently relying on it lives in a little file of
//! PIDs, one per line; the first process in installs the common rule,
//! the last one out removes it.  The file is held under an exclusive
//! lock for the whole read-modify-write, so two runs starting or
//! stopping together can't both think they're first/last.

use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use crate::err::Error;


/// The locked users file.  Dropping it releases the lock.
#[derive(Debug)]
pub(crate) struct FwUsers
{
	file: File,
	path: PathBuf,
}


impl FwUsers
{
	/// Open (creating if needed) and exclusively lock the users file.
	/// Blocks until the lock is ours.
	pub(crate) fn lock(path: &Path) -> Result<Self, Error>
	{
		use std::os::unix::fs::OpenOptionsExt;

		// O_EXLOCK takes the lock atomically with the open
		let file = std::fs::OpenOptions::new()
				.read(true).write(true).create(true)
				.mode(0o600)
				.custom_flags(libc::O_EXLOCK)
				.open(path)
				.map_err(|e| Error::io("open+lock", path, e))?;

		Ok(FwUsers { file, path: path.to_path_buf() })
	}


	pub(crate) fn is_empty(&self) -> Result<bool, Error>
	{
		let md = self.file.metadata()
				.map_err(|e| Error::io("stat", &self.path, e))?;
		Ok(md.len() == 0)
	}


	/// Register a PID.  Appends; cheap for the common path.
	pub(crate) fn add(&mut self, pid: u32) -> Result<(), Error>
	{
		self.file.seek(SeekFrom::End(0))
				.map_err(|e| Error::io("seek", &self.path, e))?;
		self.file.write_all(format!("{pid}\n").as_bytes())
				.map_err(|e| Error::io("write", &self.path, e))?;
		Ok(())
	}


	/// Remove a PID (first occurrence).  Rewrites the file.
	pub(crate) fn del(&mut self, pid: u32) -> Result<(), Error>
	{
		let mut pids = self.read_pids()?;
		if let Some(at) = pids.iter().position(|p| *p == pid)
		{ pids.remove(at); }

		self.file.set_len(0)
				.map_err(|e| Error::io("truncate", &self.path, e))?;
		self.file.seek(SeekFrom::Start(0))
				.map_err(|e| Error::io("seek", &self.path, e))?;
		let mut content = String::new();
		for p in pids
		{
			content.push_str(&p.to_string());
			content.push('\n');
		}
		self.file.write_all(content.as_bytes())
				.map_err(|e| Error::io("write", &self.path, e))?;
		Ok(())
	}


	fn read_pids(&mut self) -> Result<Vec<u32>, Error>
	{
		self.file.seek(SeekFrom::Start(0))
				.map_err(|e| Error::io("seek", &self.path, e))?;
		let mut content = String::new();
		self.file.read_to_string(&mut content)
				.map_err(|e| Error::io("read", &self.path, e))?;

		let mut pids = Vec::new();
		for line in content.lines()
		{
			let line = line.trim();
			if line.is_empty() { continue }
			let pid = line.parse().map_err(|_| Error::Config(format!(
					"garbage PID line '{line}' in {}", self.path.display())))?;
			pids.push(pid);
		}
		Ok(pids)
	}
}




#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn lifecycle()
	{
		let td = tempfile::tempdir().unwrap();
		let path = td.path().join("fw-users");

		// Fresh file is empty; scenario 5's first run installs
		{
			let mut u = FwUsers::lock(&path).unwrap();
			assert!(u.is_empty().unwrap());
			u.add(100).unwrap();
			assert!(!u.is_empty().unwrap());
		}

		// Second run sees the non-empty set and doesn't install
		{
			let mut u = FwUsers::lock(&path).unwrap();
			assert!(!u.is_empty().unwrap());
			u.add(200).unwrap();
		}

		// First run leaves; set still non-empty, common rule stays
		{
			let mut u = FwUsers::lock(&path).unwrap();
			u.del(100).unwrap();
			assert!(!u.is_empty().unwrap());
		}

		// Last run leaves; now the common rule goes too
		{
			let mut u = FwUsers::lock(&path).unwrap();
			u.del(200).unwrap();
			assert!(u.is_empty().unwrap());
		}
	}

	#[test]
	fn del_is_selective()
	{
		let td = tempfile::tempdir().unwrap();
		let path = td.path().join("fw-users");

		let mut u = FwUsers::lock(&path).unwrap();
		u.add(1).unwrap();
		u.add(2).unwrap();
		u.add(3).unwrap();
		u.del(2).unwrap();
		assert_eq!(u.read_pids().unwrap(), vec![1, 3]);

		// Deleting something absent is harmless
		u.del(42).unwrap();
		assert_eq!(u.read_pids().unwrap(), vec![1, 3]);
	}

	#[test]
	fn garbage_rejected()
	{
		let td = tempfile::tempdir().unwrap();
		let path = td.path().join("fw-users");
		std::fs::write(&path, "123\nnot-a-pid\n").unwrap();

		let mut u = FwUsers::lock(&path).unwrap();
		u.del(123).unwrap_err();
	}
}
