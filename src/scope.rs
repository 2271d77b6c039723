//! Scoped resource release.
//!
//! Every host-level resource `run` acquires (mount, jail, epair,
//! firewall rule, the jail dir itself) has to be released on every
//! exit path, including a failure halfway through the pipeline.  A
//! Teardown binds the release action to a scope; a Registry composes
//! them and unwinds strict LIFO.  `run_now` exists for the happy path
//! where a step wants to release early, explicitly, and hear about
//! failures; the Drop path reports failures and keeps going.

use crate::err::warn;


type Action = Box<dyn FnOnce() -> Result<(), anyhow::Error>>;


/// One registered tear-down action.  Runs exactly once: either via
/// run_now(), or from Drop.
pub(crate) struct Teardown
{
	/// What we'd say we're doing, for the failure report.
	what: String,

	/// The action, until it's been consumed.
	action: Option<Action>,
}


impl Teardown
{
	pub(crate) fn new(what: impl Into<String>,
			action: impl FnOnce() -> Result<(), anyhow::Error> + 'static)
			-> Self
	{
		Teardown { what: what.into(), action: Some(Box::new(action)) }
	}

	/// Run the action right now and go inert.  Calling it again (or
	/// dropping afterwards) does nothing.
	pub(crate) fn run_now(&mut self) -> Result<(), anyhow::Error>
	{
		match self.action.take() {
			Some(act) => act(),
			None => Ok(()),
		}
	}
}

impl Drop for Teardown
{
	fn drop(&mut self)
	{
		let what = self.what.clone();
		if let Err(e) = self.run_now()
		{ warn(format!("tear-down '{what}' failed: {e:#}")); }
	}
}

impl std::fmt::Debug for Teardown
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error>
	{
		write!(f, "Teardown({}, {})", self.what,
				if self.action.is_some() { "armed" } else { "inert" })
	}
}



/// An ordered pile of Teardowns.  Push order is acquisition order;
/// unwinding is strictly the reverse.  A failing action is reported
/// and the rest still run.
#[derive(Debug, Default)]
pub(crate) struct Registry
{
	list: Vec<Teardown>,
}


impl Registry
{
	pub(crate) fn new() -> Self
	{
		Self::default()
	}

	/// Register an action for tear-down.
	pub(crate) fn push(&mut self, what: impl Into<String>,
			action: impl FnOnce() -> Result<(), anyhow::Error> + 'static)
	{
		self.list.push(Teardown::new(what, action));
	}

	/// Unwind everything now, newest first.  Failures are reported,
	/// never fatal; skipping the rest of the unwind would leak worse.
	pub(crate) fn run_now(&mut self)
	{
		while let Some(td) = self.list.pop()
		{ drop(td); }
	}
}

// Dropping the registry unwinds it; Vec drops front-to-back, so we
// pop ourselves to get LIFO.
impl Drop for Registry
{
	fn drop(&mut self)
	{
		self.run_now();
	}
}




#[cfg(test)]
mod tests
{
	use super::*;
	use std::cell::RefCell;
	use std::rc::Rc;

	#[test]
	fn runs_on_drop()
	{
		let hit = Rc::new(RefCell::new(false));
		{
			let h = hit.clone();
			let _td = Teardown::new("t", move || { *h.borrow_mut() = true; Ok(()) });
			assert!(!*hit.borrow());
		}
		assert!(*hit.borrow());
	}

	#[test]
	fn run_now_is_once()
	{
		let count = Rc::new(RefCell::new(0));
		{
			let c = count.clone();
			let mut td = Teardown::new("t", move || { *c.borrow_mut() += 1; Ok(()) });
			td.run_now().unwrap();
			td.run_now().unwrap();
			// drop happens here too
		}
		assert_eq!(*count.borrow(), 1);
	}

	#[test]
	fn run_now_propagates()
	{
		let mut td = Teardown::new("boom", || anyhow::bail!("kaboom"));
		td.run_now().unwrap_err();
		// Inert now; the failure doesn't repeat from Drop
		td.run_now().unwrap();
	}

	#[test]
	fn registry_is_lifo()
	{
		let order = Rc::new(RefCell::new(Vec::new()));
		{
			let mut reg = Registry::new();
			for i in 0..4
			{
				let o = order.clone();
				reg.push(format!("step {i}"), move || {
					o.borrow_mut().push(i);
					Ok(())
				});
			}
		}
		assert_eq!(*order.borrow(), vec![3, 2, 1, 0]);
	}

	#[test]
	fn failure_doesnt_stop_the_rest()
	{
		let order = Rc::new(RefCell::new(Vec::new()));
		{
			let mut reg = Registry::new();
			let o = order.clone();
			reg.push("first", move || { o.borrow_mut().push(1); Ok(()) });
			reg.push("boom", || anyhow::bail!("kaboom"));
			let o = order.clone();
			reg.push("last", move || { o.borrow_mut().push(3); Ok(()) });
		}
		// The failing middle one didn't stop its elders from running
		assert_eq!(*order.borrow(), vec![3, 1]);
	}

	#[test]
	fn explicit_unwind_then_drop()
	{
		let order = Rc::new(RefCell::new(Vec::new()));
		let mut reg = Registry::new();
		for i in 0..2
		{
			let o = order.clone();
			reg.push(format!("step {i}"), move || {
				o.borrow_mut().push(i);
				Ok(())
			});
		}
		reg.run_now();
		assert_eq!(*order.borrow(), vec![1, 0]);
		drop(reg);
		// Nothing ran twice
		assert_eq!(*order.borrow(), vec![1, 0]);
	}
}
