//! Mounting filesystems into the jail: devfs at <jail>/dev, nullfs
//! for the pkg cache and shared dirs.
//!
//! This goes through nmount(2) directly rather than mount(8); the
//! iovec name/value convention is the same one the mount commands
//! build internally.

use std::ffi::CString;
use std::path::{Path, PathBuf};


use crate::err::Error;


#[derive(Debug)]
pub(crate) struct Mount
{
	fstype: &'static str,

	/// Where it lands (inside the jail tree).
	fspath: PathBuf,

	/// What's being mounted there; empty for devfs.
	target: PathBuf,
}


impl Mount
{
	pub(crate) fn devfs(fspath: impl Into<PathBuf>) -> Self
	{
		Mount { fstype: "devfs", fspath: fspath.into(), target: PathBuf::new() }
	}

	pub(crate) fn nullfs(fspath: impl Into<PathBuf>,
			target: impl Into<PathBuf>) -> Self
	{
		Mount { fstype: "nullfs", fspath: fspath.into(), target: target.into() }
	}


	pub(crate) fn mount(&self) -> Result<(), Error>
	{
		nmount(self.fstype, &self.fspath, &self.target)
	}

	pub(crate) fn unmount(&self) -> Result<(), Error>
	{
		let f = cstr(&self.fspath)?;
		let res = unsafe { libc::unmount(f.as_ptr(), 0) };
		match res {
			0 => Ok(()),
			_ => Err(Error::sys("unmount",
					self.fspath.to_string_lossy(), errno())),
		}
	}
}


fn cstr(path: &Path) -> Result<CString, Error>
{
	CString::new(path.as_os_str().as_encoded_bytes())
			.map_err(|_| Error::Sys {
				syscall: "cstring",
				arg: path.to_string_lossy().into_owned(),
				err: "embedded NUL in path".to_string(),
			})
}

fn errno() -> i32
{
	std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}


fn nmount(fstype: &str, fspath: &Path, target: &Path) -> Result<(), Error>
{
	// nmount takes pairs of (name, value) iovecs.  The CStrings have
	// to outlive the call, so gather them first.
	let mut params: Vec<(CString, CString)> = Vec::with_capacity(3);
	params.push((CString::new("fstype").unwrap(),
			CString::new(fstype).unwrap()));
	params.push((CString::new("fspath").unwrap(), cstr(fspath)?));
	if !target.as_os_str().is_empty()
	{ params.push((CString::new("target").unwrap(), cstr(target)?)); }

	let mut errmsg = [0u8; 255];

	let res = unsafe {
		let mut iov: Vec<libc::iovec> = Vec::with_capacity(params.len() * 2 + 2);
		for (name, val) in &params
		{
			iov.push(libc::iovec {
				iov_base: name.as_ptr() as *mut libc::c_void,
				iov_len: name.as_bytes_with_nul().len(),
			});
			iov.push(libc::iovec {
				iov_base: val.as_ptr() as *mut libc::c_void,
				iov_len: val.as_bytes_with_nul().len(),
			});
		}
		// The kernel writes an explanation here on failure
		let errname = CString::new("errmsg").unwrap();
		iov.push(libc::iovec {
			iov_base: errname.as_ptr() as *mut libc::c_void,
			iov_len: errname.as_bytes_with_nul().len(),
		});
		iov.push(libc::iovec {
			iov_base: errmsg.as_mut_ptr() as *mut libc::c_void,
			iov_len: errmsg.len(),
		});

		libc::nmount(iov.as_mut_ptr(), iov.len() as libc::c_uint, 0)
	};

	match res {
		0 => Ok(()),
		_ => {
			let eno = errno();
			let kmsg = errmsg.iter().position(|c| *c == 0)
					.filter(|p| *p > 0)
					.map(|p| String::from_utf8_lossy(&errmsg[..p]).into_owned());
			let mut err = std::io::Error::from_raw_os_error(eno).to_string();
			if let Some(k) = kmsg
			{ err = format!("{err} ({k})"); }
			Err(Error::Sys {
				syscall: "nmount",
				arg: format!("{} of '{}' on '{}'", fstype,
						target.display(), fspath.display()),
				err,
			})
		},
	}
}
