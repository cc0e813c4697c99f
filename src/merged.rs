use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use enclose::enclose;

use crate::{Observable, ObserverId, Var};

/// A fixed, ordered set of observables a [`Merged`] is computed from.
///
/// Implemented for tuples of one to four observables.
pub trait Inputs: 'static {
	type Values: 'static;

	/// Latest values of every input, or `None` while any input is empty.
	fn snapshot(&self) -> Option<Self::Values>;

	/// Calls `on_change` whenever any input publishes. Returns one
	/// unsubscribe action per input.
	fn subscribe(&self, on_change: Weak<dyn Fn()>) -> Vec<Box<dyn FnOnce()>>;
}

macro_rules! impl_inputs {
	($($source:ident . $idx:tt),+) => {
		impl<$($source),+> Inputs for ($($source,)+)
		where
			$($source: Observable + Clone,)+
		{
			type Values = ($(<$source as Observable>::Value,)+);

			fn snapshot(&self) -> Option<Self::Values> {
				Some(($(self.$idx.get()?,)+))
			}

			fn subscribe(&self, on_change: Weak<dyn Fn()>) -> Vec<Box<dyn FnOnce()>> {
				vec![$({
					let source = self.$idx.clone();
					let on_change = on_change.clone();
					let id = source.subscribe(Rc::new(
						move |_: &<$source as Observable>::Value| {
							if let Some(on_change) = on_change.upgrade() {
								on_change();
							}
						},
					));
					Box::new(move || {
						source.unsubscribe(id);
					}) as Box<dyn FnOnce()>
				}),+]
			}
		}
	};
}

impl_inputs!(A.0);
impl_inputs!(A.0, B.1);
impl_inputs!(A.0, B.1, C.2);
impl_inputs!(A.0, B.1, C.2, D.3);

/// A value derived from several inputs with a pure function.
///
/// Holds no value until every input has one. After that, each input change
/// runs the function once over a snapshot of all inputs and publishes the
/// result. Changes are not batched: two inputs changed back to back mean two
/// recomputations.
pub struct Merged<T> {
	body: Rc<MergedBody<T>>,
}

struct MergedBody<T> {
	output: Var<T>,
	recomputations: Rc<Cell<u64>>,
	// Inputs only hold a weak reference to this closure.
	#[allow(unused)]
	recompute: Rc<dyn Fn()>,
	unsubscribe: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl<T> Drop for MergedBody<T> {
	fn drop(&mut self) {
		for unsubscribe in self.unsubscribe.get_mut().drain(..) {
			unsubscribe();
		}
	}
}

impl<T> Clone for Merged<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Merged<T>
where
	T: Clone + 'static,
{
	pub fn new<I, F>(inputs: I, combine: F) -> Self
	where
		I: Inputs,
		F: Fn(I::Values) -> T + 'static,
	{
		let output = Var::empty();
		let count = Rc::new(Cell::new(0));
		let inputs = Rc::new(inputs);
		let armed = Rc::new(Cell::new(false));

		let recompute: Rc<dyn Fn()> = Rc::new(enclose!((output, count, inputs, armed) move || {
			if !armed.get() {
				return;
			}
			let Some(values) = inputs.snapshot() else {
				return;
			};
			count.set(count.get() + 1);
			output.set(combine(values));
		}));

		// Subscribing replays every populated input; hold those back and
		// compute once afterwards.
		let unsubscribe = inputs.subscribe(Rc::downgrade(&recompute));
		armed.set(true);
		recompute();

		Merged {
			body: Rc::new(MergedBody {
				output,
				recomputations: count,
				recompute,
				unsubscribe: RefCell::new(unsubscribe),
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> Option<T> {
		self.body.output.get()
	}

	#[inline]
	pub fn has_value(&self) -> bool {
		self.body.output.has_value()
	}

	pub fn observe(&self, func: impl Fn(&T) + 'static) -> ObserverId {
		self.body.output.observe(func)
	}

	pub fn unobserve(&self, id: ObserverId) -> bool {
		self.body.output.unobserve(id)
	}

	/// How many times the combining function ran.
	pub fn recomputations(&self) -> u64 {
		self.body.recomputations.get()
	}
}

impl<T> Observable for Merged<T>
where
	T: Clone + 'static,
{
	type Value = T;

	fn get(&self) -> Option<T> {
		Merged::get(self)
	}

	fn subscribe(&self, observer: Rc<dyn Fn(&T)>) -> ObserverId {
		self.body.output.subscribe(observer)
	}

	fn unsubscribe(&self, id: ObserverId) -> bool {
		Merged::unobserve(self, id)
	}
}

impl<T> std::fmt::Debug for Merged<T>
where
	T: std::fmt::Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Merged")
			.field("output", &self.body.output)
			.field("recomputations", &self.body.recomputations.get())
			.finish()
	}
}
