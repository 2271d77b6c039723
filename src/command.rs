//! Command handling: the central dispatch for everything that goes
//! on.

/// Command-line parsing and handling
mod line;
pub(crate) use line::{CrArgs, CrCmds};
pub use line::parse;


use std::process::ExitCode;

use anyhow::Context as _;


// Handle exiting with a code in special cases: run hands the crate's
// own exit code through.
#[derive(Debug)]
enum MyExit
{
	Ok,
	Code(u8),
}

impl From<MyExit> for ExitCode
{
	fn from(my: MyExit) -> Self
	{
		use MyExit as M;
		match my {
			M::Ok      => Self::SUCCESS,
			M::Code(c) => c.into(),
		}
	}
}


/// Dispatch a command
pub fn run(clargs: CrArgs) -> Result<ExitCode, anyhow::Error>
{
	crate::util::set_progress(clargs.log_progress);

	// Root, not jailed, identity pinned
	crate::check::policy()?;

	use CrCmds as CC;
	let myex: MyExit = match &clargs.command {
		CC::Create(args) => {
			crate::cmd::create::run(&args.spec, args.output.as_deref())
					.context("creating a crate")?;
			MyExit::Ok
		},
		CC::Run(args) => {
			let file = args.crate_path()?;
			let code = crate::cmd::run::run(&file, &args.args)
					.context("running a crate container")?;
			MyExit::Code(code.clamp(0, 255) as u8)
		},
	};
	Ok(myex.into())
}
