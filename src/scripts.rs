//! Lifecycle script running.
//!
//! The spec can hang shell scripts off named lifecycle sections; at
//! each section we run that section's scripts, in name order, inside
//! a chroot of the jail tree, with loud banners so their output is
//! attributable.

use std::path::Path;

use crate::spec::{ScriptSection, Spec};


/// Escape a script for embedding in a double-quoted sh -c argument.
fn escape(script: &str) -> String
{
	let mut out = String::with_capacity(script.len());
	for chr in script.chars()
	{
		match chr {
			'"' | '\\' => { out.push('\\'); out.push(chr); },
			_ => out.push(chr),
		}
	}
	out
}


/// Run every script registered for a section.
pub(crate) fn run_section(section: ScriptSection, spec: &Spec, jail: &Path)
		-> Result<(), anyhow::Error>
{
	use colored::Colorize as _;

	let Some(scripts) = spec.scripts.get(&section.to_string())
	else { return Ok(()) };

	for (name, body) in scripts
	{
		println!("{}", format!("@run-script#{section}#{name}#begin").cyan());
		let cmd = format!("{}/bin/sh -c \"{}\"",
				crate::exec::chroot_prefix(jail), escape(body));
		crate::exec::run(&cmd, &format!("run script#{section}#{name}"))?;
		println!("{}", format!("@run-script#{section}#{name}#end").cyan());
	}
	Ok(())
}
