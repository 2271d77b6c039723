//! Main crate-bsd impl lib

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Commands and args
pub mod command;

// The crate spec
pub mod spec;

// Error kinds
pub mod err;

// Small util bits
mod util;

// Runtime checks (root, jailed, kernel features)
mod check;

// Well-known host locations
mod locs;

// Kernel/host info and sysctl pokes
mod info;

// External command plumbing
mod exec;

// Scoped resource release
mod scope;

// Mounting into jails
mod mount;

// Jail lifecycle
mod jail;

// Host networking and epairs
mod net;

// ipfw rules and the shared-NAT refcount
mod firewall;

// ELF dependency closures
mod elf;

// Base-tree pruning
mod prune;

// Lifecycle script sections
mod scripts;


// CLI Commands
mod cmd;
