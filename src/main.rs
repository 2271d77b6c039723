use std::process::ExitCode;


fn main() -> ExitCode
{
	let clargs = crate_bsd::command::parse();

	match crate_bsd::command::run(clargs) {
		Ok(code) => code,
		Err(e) => {
			use colored::Colorize as _;
			eprintln!("{}", format!("{e:#}").red());
			ExitCode::FAILURE
		},
	}
}
