use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::{Observable, ObserverId};

type ObserverFn<T> = Rc<dyn Fn(&T)>;

/// A mutable, versioned value that notifies its observers on every `set`.
///
/// Cloning a `Var` yields another handle to the same slot. All access
/// happens on the dispatcher thread; there is no locking.
pub struct Var<T> {
	body: Rc<VarBody<T>>,
}

struct VarBody<T> {
	value: RefCell<Option<T>>,
	inner: RefCell<VarInner<T>>,
}

struct VarInner<T> {
	version: u64,
	next_observer: u64,
	observers: SmallVec<[Observer<T>; 4]>,
	queue: VecDeque<(u64, T)>,
	dispatching: bool,
}

struct Observer<T> {
	id: ObserverId,
	/// Version current at registration; older transitions are skipped.
	since: u64,
	func: ObserverFn<T>,
}

impl<T> Clone for Observer<T> {
	fn clone(&self) -> Self {
		Observer {
			id: self.id,
			since: self.since,
			func: self.func.clone(),
		}
	}
}

impl<T> Clone for Var<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Var<T>
where
	T: Clone + 'static,
{
	fn default() -> Self {
		Var::empty()
	}
}

impl<T> Var<T>
where
	T: Clone + 'static,
{
	pub fn new(value: T) -> Self {
		Self::with_initial(Some(value))
	}

	/// A `Var` that holds no value until the first `set`.
	pub fn empty() -> Self {
		Self::with_initial(None)
	}

	fn with_initial(value: Option<T>) -> Self {
		let version = u64::from(value.is_some());
		Var {
			body: Rc::new(VarBody {
				value: RefCell::new(value),
				inner: RefCell::new(VarInner {
					version,
					next_observer: 0,
					observers: SmallVec::new(),
					queue: VecDeque::new(),
					dispatching: false,
				}),
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> Option<T> {
		self.body.value.borrow().clone()
	}

	#[inline]
	pub fn with<R>(&self, func: impl FnOnce(Option<&T>) -> R) -> R {
		func(self.body.value.borrow().as_ref())
	}

	#[inline]
	pub fn has_value(&self) -> bool {
		self.body.value.borrow().is_some()
	}

	/// Number of transitions so far.
	#[inline]
	pub fn version(&self) -> u64 {
		self.body.inner.borrow().version
	}

	pub fn observer_count(&self) -> usize {
		self.body.inner.borrow().observers.len()
	}

	/// Replaces the value and notifies every observer, even when the new
	/// value equals the old one.
	pub fn set(&self, value: T) {
		self.body.set(value)
	}

	pub fn update(&self, func: impl FnOnce(&mut T))
	where
		T: Default,
	{
		let mut next = self.get().unwrap_or_default();
		func(&mut next);
		self.set(next)
	}

	/// Like [`set`](Self::set), but skips the publish when the new value
	/// hashes the same as the current one.
	pub fn set_distinct(&self, value: T) -> bool
	where
		T: Hash,
	{
		let unchanged = self
			.body
			.value
			.borrow()
			.as_ref()
			.is_some_and(|current| fxhash::hash64(current) == fxhash::hash64(&value));

		if unchanged {
			return false;
		}
		self.set(value);
		true
	}

	/// Registers `func`; it is called right away with the current value, if
	/// any, and then for every later transition.
	pub fn observe(&self, func: impl Fn(&T) + 'static) -> ObserverId {
		self.body.observe(Rc::new(func))
	}

	/// Returns `false` if `id` was not registered.
	pub fn unobserve(&self, id: ObserverId) -> bool {
		self.body.unobserve(id)
	}
}

impl<T> VarBody<T>
where
	T: Clone + 'static,
{
	fn set(&self, value: T) {
		{
			let mut inner = self.inner.borrow_mut();
			inner.version += 1;
			let version = inner.version;
			*self.value.borrow_mut() = Some(value.clone());
			inner.queue.push_back((version, value));

			// A set issued from an observer is delivered by the outer loop,
			// after the transition that is currently being dispatched.
			if inner.dispatching {
				return;
			}
			inner.dispatching = true;
		}

		self.dispatch();
	}

	fn dispatch(&self) {
		let _dispatching = Dispatching(self);
		loop {
			let (version, value, observers) = {
				let mut inner = self.inner.borrow_mut();
				let Some((version, value)) = inner.queue.pop_front() else {
					break;
				};
				(version, value, inner.observers.clone())
			};

			for observer in observers {
				if observer.since >= version || !self.is_registered(observer.id) {
					continue;
				}
				(observer.func)(&value);
			}
		}
	}

	fn is_registered(&self, id: ObserverId) -> bool {
		self.inner.borrow().observers.iter().any(|o| o.id == id)
	}

	fn observe(&self, func: ObserverFn<T>) -> ObserverId {
		let id = {
			let mut inner = self.inner.borrow_mut();
			let id = ObserverId(inner.next_observer);
			inner.next_observer += 1;
			let since = inner.version;
			inner.observers.push(Observer {
				id,
				since,
				func: func.clone(),
			});
			id
		};

		let current = self.value.borrow().clone();
		if let Some(current) = current {
			func(&current);
		}
		id
	}

	fn unobserve(&self, id: ObserverId) -> bool {
		let mut inner = self.inner.borrow_mut();
		let before = inner.observers.len();
		inner.observers.retain(|o| o.id != id);
		inner.observers.len() != before
	}
}

/// Ends a dispatch round, also when an observer unwinds. Transitions still
/// queued behind a panicking observer are dropped.
struct Dispatching<'a, T>(&'a VarBody<T>);

impl<T> Drop for Dispatching<'_, T> {
	fn drop(&mut self) {
		if let Ok(mut inner) = self.0.inner.try_borrow_mut() {
			if std::thread::panicking() {
				inner.queue.clear();
			}
			inner.dispatching = false;
		}
	}
}

impl<T> Observable for Var<T>
where
	T: Clone + 'static,
{
	type Value = T;

	fn get(&self) -> Option<T> {
		Var::get(self)
	}

	fn subscribe(&self, observer: Rc<dyn Fn(&T)>) -> ObserverId {
		self.body.observe(observer)
	}

	fn unsubscribe(&self, id: ObserverId) -> bool {
		Var::unobserve(self, id)
	}
}

impl<T> Debug for Var<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Var")
			.field("value", &*self.body.value.borrow())
			.field("version", &self.body.inner.borrow().version)
			.finish()
	}
}
