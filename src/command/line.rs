//! Command line handling
//!
//! General invocation:
//! $0 [options] <command> [command-opts]
//!
//! Plus the shorthand forms: `$0 name.yml` creates, `$0 name.crate
//! [args]` runs (when the file really is an XZ archive).

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::err::Error;


/// Main arg entry point
#[derive(Debug)]
#[derive(Parser)]
#[command(name = "crate")]
#[command(about = "Package an application into a crate.  \
		Run it in a jail, anywhere.")]
#[command(version)]
pub struct CrArgs
{
	#[command(subcommand)]
	pub(crate) command: CrCmds,

	/// Log progress with elapsed-time stamps.
	#[arg(short = 'p', long, global = true)]
	pub(crate) log_progress: bool,
}


/// Individual subcommands and their args
#[derive(Debug)]
#[derive(Subcommand)]
pub(crate) enum CrCmds
{
	/// Create a crate from a spec.
	///
	/// This downloads (or reuses) the base archive, installs the
	/// spec'd packages into a fresh tree, prunes everything the app
	/// doesn't need, and packs the result into a .crate file.
	Create(CrCmdCreate),

	/// Run a crate.
	///
	/// This extracts the crate into a transient jail, restores the
	/// user/network/graphics plumbing its spec asks for, runs the
	/// app, and tears the whole thing down again.  The exit code is
	/// the app's own.
	Run(CrCmdRun),
}


/// Create args
#[derive(Debug)]
#[derive(Parser)]
pub(crate) struct CrCmdCreate
{
	/// The crate specification file.
	#[arg(short, long)]
	pub(crate) spec: PathBuf,

	/// Output crate file (default: the executable or first service
	/// name, with .crate appended).
	#[arg(short, long)]
	pub(crate) output: Option<PathBuf>,
}


/// Run args
#[derive(Debug)]
#[derive(Parser)]
pub(crate) struct CrCmdRun
{
	/// The crate file to run.
	#[arg(short, long)]
	pub(crate) file: Option<PathBuf>,

	/// The crate file, positionally.
	#[arg(value_name = "CRATE")]
	pub(crate) crate_file: Option<PathBuf>,

	/// Extra arguments appended to the crate's command.
	#[arg(last = true)]
	pub(crate) args: Vec<String>,
}

impl CrCmdRun
{
	/// -f/--file and the positional form are both accepted; one of
	/// them has to be there.
	pub(crate) fn crate_path(&self) -> Result<PathBuf, Error>
	{
		self.file.clone().or_else(|| self.crate_file.clone())
				.ok_or_else(|| Error::Config(
					"the 'run' command requires the crate file as an \
					argument (-f, --file)".to_string()))
	}
}



/// The shorthand pre-parse: if the first arg names a spec or a crate
/// file, rewrite into the longhand invocation and let clap take it
/// from there.
fn shorthand(argv: &[OsString]) -> Option<Vec<OsString>>
{
	let first = argv.get(1)?;
	let fstr = first.to_str()?;
	if fstr.starts_with('-') { return None }

	let path = Path::new(first);
	let ext = path.extension()?.to_str()?;

	match ext {
		"yml" if argv.len() == 2 => {
			Some(vec![argv[0].clone(), "create".into(), "-s".into(),
					first.clone()])
		},
		// Only run things that really look like crates; anything
		// else falls through to normal parsing (and its diagnostics)
		"crate" if crate::util::fs::is_xz_archive(path) => {
			let mut out = vec![argv[0].clone(), "run".into(), "-f".into(),
					first.clone()];
			if argv.len() > 2
			{
				out.push("--".into());
				out.extend(argv[2..].iter().cloned());
			}
			Some(out)
		},
		_ => None,
	}
}


pub fn parse() -> CrArgs
{
	let argv: Vec<OsString> = std::env::args_os().collect();
	let parsed = match shorthand(&argv) {
		Some(rewritten) => CrArgs::try_parse_from(rewritten),
		None => CrArgs::try_parse_from(argv),
	};

	match parsed {
		Ok(args) => args,
		Err(e) => {
			// Help/version are a clean exit; everything else is a
			// usage error, and those exit 1 here
			use clap::error::ErrorKind as EK;
			let code = match e.kind() {
				EK::DisplayHelp | EK::DisplayVersion => 0,
				_ => 1,
			};
			let _ = e.print();
			std::process::exit(code);
		},
	}
}




#[cfg(test)]
mod tests
{
	use super::*;

	fn osv(args: &[&str]) -> Vec<OsString>
	{
		args.iter().map(|a| a.into()).collect()
	}

	#[test]
	fn shorthand_yml()
	{
		let re = shorthand(&osv(&["crate", "gimp.yml"])).unwrap();
		assert_eq!(re, osv(&["crate", "create", "-s", "gimp.yml"]));

		// Trailing args make no sense for create; not a shorthand
		assert!(shorthand(&osv(&["crate", "gimp.yml", "x"])).is_none());
	}

	#[test]
	fn shorthand_crate()
	{
		// A real XZ-looking file
		let td = tempfile::tempdir().unwrap();
		let cf = td.path().join("gimp.crate");
		let mut data = vec![0u8; 300];
		data[..5].copy_from_slice(&[0xfd, 0x37, 0x7a, 0x58, 0x5a]);
		std::fs::write(&cf, &data).unwrap();
		let cstr = cf.to_str().unwrap();

		let re = shorthand(&osv(&["crate", cstr])).unwrap();
		assert_eq!(re, osv(&["crate", "run", "-f", cstr]));

		// Extra args pass through behind a --
		let re = shorthand(&osv(&["crate", cstr, "-x", "blah"])).unwrap();
		assert_eq!(re, osv(&["crate", "run", "-f", cstr, "--", "-x", "blah"]));

		// Not actually an XZ file -> no shorthand
		let fake = td.path().join("fake.crate");
		std::fs::write(&fake, b"nope").unwrap();
		assert!(shorthand(&osv(&["crate", fake.to_str().unwrap()])).is_none());
	}

	#[test]
	fn shorthand_leaves_the_rest_alone()
	{
		assert!(shorthand(&osv(&["crate"])).is_none());
		assert!(shorthand(&osv(&["crate", "-h"])).is_none());
		assert!(shorthand(&osv(&["crate", "create", "-s", "x.yml"])).is_none());
		assert!(shorthand(&osv(&["crate", "noext"])).is_none());
	}

	#[test]
	fn clap_parses_longhand()
	{
		let args = CrArgs::try_parse_from(
				["crate", "-p", "create", "-s", "x.yml", "-o", "out.crate"])
				.unwrap();
		assert!(args.log_progress);
		match args.command {
			CrCmds::Create(c) => {
				assert_eq!(c.spec, PathBuf::from("x.yml"));
				assert_eq!(c.output, Some(PathBuf::from("out.crate")));
			},
			_ => panic!("wrong command"),
		}

		let args = CrArgs::try_parse_from(
				["crate", "run", "-f", "x.crate", "--", "--flag", "v"])
				.unwrap();
		match args.command {
			CrCmds::Run(r) => {
				assert_eq!(r.crate_path().unwrap(),
						PathBuf::from("x.crate"));
				assert_eq!(r.args, vec!["--flag", "v"]);
			},
			_ => panic!("wrong command"),
		}
	}

	#[test]
	fn run_requires_a_file()
	{
		let args = CrArgs::try_parse_from(["crate", "run"]).unwrap();
		match args.command {
			CrCmds::Run(r) => { r.crate_path().unwrap_err(); },
			_ => panic!("wrong command"),
		}

		// Positional form works too
		let args = CrArgs::try_parse_from(["crate", "run", "x.crate"])
				.unwrap();
		match args.command {
			CrCmds::Run(r) => {
				assert_eq!(r.crate_path().unwrap(), PathBuf::from("x.crate"));
			},
			_ => panic!("wrong command"),
		}
	}

	#[test]
	fn unknown_flags_fail()
	{
		CrArgs::try_parse_from(["crate", "--wat"]).unwrap_err();
		CrArgs::try_parse_from(["crate", "create"]).unwrap_err();
	}
}
