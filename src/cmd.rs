//! The individual commands.

/// Build a crate from a spec
pub(crate) mod create;

/// Run a crate in a jail
pub(crate) mod run;
