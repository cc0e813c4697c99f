use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};

use crate::Var;

thread_local! {
	static BOUND: Cell<bool> = const { Cell::new(false) };
}

pub(crate) enum Envelope {
	Ticket(u64),
	Job(Box<dyn FnOnce() + Send>),
	Value(u64, Box<dyn Any + Send>),
	Close(u64),
}

pub(crate) struct Mailbox {
	queue: Mutex<MailboxQueue>,
	ready: Condvar,
	next_id: AtomicU64,
}

struct MailboxQueue {
	items: VecDeque<Envelope>,
	closed: bool,
}

impl Mailbox {
	fn new() -> Self {
		Mailbox {
			queue: Mutex::new(MailboxQueue {
				items: VecDeque::new(),
				closed: false,
			}),
			ready: Condvar::new(),
			next_id: AtomicU64::new(1),
		}
	}

	pub(crate) fn push(&self, envelope: Envelope) {
		let mut queue = self.queue.lock();
		if queue.closed {
			return;
		}
		queue.items.push_back(envelope);
		std::mem::drop(queue);
		self.ready.notify_one();
	}

	fn pop(&self) -> Option<Envelope> {
		self.queue.lock().items.pop_front()
	}

	fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}
}

/// Handle to a callback parked in a [`Dispatcher`]. Waking it queues the
/// callback for the next [`Dispatcher::run_pending`].
pub(crate) struct Ticket {
	id: u64,
	mailbox: Arc<Mailbox>,
}

impl Ticket {
	pub(crate) fn wake(self) {
		self.mailbox.push(Envelope::Ticket(self.id));
	}
}

/// The single scheduling context that observation, completion callbacks and
/// recomputation run on.
///
/// A dispatcher is bound to the thread that created it and never leaves it.
/// Other threads reach it through a [`DispatchHandle`] or a [`Sink`]; nothing
/// they send runs until the owning thread calls [`run_pending`](Self::run_pending)
/// or [`run_until`](Self::run_until).
#[derive(Clone)]
pub struct Dispatcher {
	body: Rc<DispatcherBody>,
}

struct DispatcherBody {
	mailbox: Arc<Mailbox>,
	callbacks: RefCell<FxHashMap<u64, Box<dyn FnOnce()>>>,
	sinks: RefCell<FxHashMap<u64, Rc<dyn Fn(Box<dyn Any + Send>)>>>,
}

impl Drop for DispatcherBody {
	fn drop(&mut self) {
		{
			let mut queue = self.mailbox.queue.lock();
			queue.closed = true;
			queue.items.clear();
		}
		BOUND.with(|bound| bound.set(false));
	}
}

impl Dispatcher {
	/// Binds a new dispatcher to the current thread.
	///
	/// Panics if this thread already has one.
	pub fn new() -> Self {
		BOUND.with(|bound| {
			if bound.get() {
				panic!("a Dispatcher is already bound to this thread");
			}
			bound.set(true);
		});

		Dispatcher {
			body: Rc::new(DispatcherBody {
				mailbox: Arc::new(Mailbox::new()),
				callbacks: RefCell::new(FxHashMap::default()),
				sinks: RefCell::new(FxHashMap::default()),
			}),
		}
	}

	/// Whether the calling thread owns a dispatcher.
	pub fn is_current_thread() -> bool {
		BOUND.with(|bound| bound.get())
	}

	pub fn handle(&self) -> DispatchHandle {
		DispatchHandle {
			mailbox: self.body.mailbox.clone(),
		}
	}

	pub(crate) fn park(&self, callback: Box<dyn FnOnce()>) -> Ticket {
		let id = self.body.mailbox.next_id();
		self.body.callbacks.borrow_mut().insert(id, callback);
		Ticket {
			id,
			mailbox: self.body.mailbox.clone(),
		}
	}

	/// Number of parked callbacks that have not run yet.
	pub fn parked(&self) -> usize {
		self.body.callbacks.borrow().len()
	}

	/// Returns a sender that publishes values into `var` on this dispatcher's
	/// thread, whichever thread calls [`Sink::send`].
	pub fn sink<T>(&self, var: &Var<T>) -> Sink<T>
	where
		T: Clone + Send + 'static,
	{
		let id = self.body.mailbox.next_id();
		let var = var.clone();
		let deliver: Rc<dyn Fn(Box<dyn Any + Send>)> = Rc::new(move |value| {
			match value.downcast::<T>() {
				Ok(value) => var.set(*value),
				Err(_) => tracing::error!(sink = id, "sink received a value of the wrong type"),
			}
		});
		self.body.sinks.borrow_mut().insert(id, deliver);

		Sink {
			channel: Arc::new(SinkChannel {
				id,
				mailbox: self.body.mailbox.clone(),
			}),
			_marker: PhantomData,
		}
	}

	/// Number of sinks still attached to a `Var`.
	pub fn open_sinks(&self) -> usize {
		self.body.sinks.borrow().len()
	}

	/// Runs everything queued so far, including work queued while running.
	/// Returns the number of envelopes processed.
	pub fn run_pending(&self) -> usize {
		let mut count = 0;
		while let Some(envelope) = self.body.mailbox.pop() {
			count += 1;
			match envelope {
				Envelope::Ticket(id) => {
					let callback = self.body.callbacks.borrow_mut().remove(&id);
					if let Some(callback) = callback {
						callback();
					}
				}
				Envelope::Job(job) => job(),
				Envelope::Value(id, value) => {
					let sink = self.body.sinks.borrow().get(&id).cloned();
					match sink {
						Some(deliver) => deliver(value),
						None => tracing::trace!(sink = id, "value for a closed sink dropped"),
					}
				}
				Envelope::Close(id) => {
					self.body.sinks.borrow_mut().remove(&id);
				}
			}
		}

		if count > 0 {
			tracing::trace!(count, "dispatcher drained");
		}
		count
	}

	/// Drains the queue and blocks for more until `predicate` holds or
	/// `timeout` elapses. Returns the final value of `predicate`.
	pub fn run_until(&self, timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
		let deadline = Instant::now() + timeout;
		loop {
			self.run_pending();
			if predicate() {
				return true;
			}

			let mut queue = self.body.mailbox.queue.lock();
			if queue.items.is_empty()
				&& self
					.body
					.mailbox
					.ready
					.wait_until(&mut queue, deadline)
					.timed_out()
			{
				std::mem::drop(queue);
				self.run_pending();
				return predicate();
			}
		}
	}
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new()
	}
}

/// `Send` handle for scheduling work on a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
	mailbox: Arc<Mailbox>,
}

impl DispatchHandle {
	pub fn post(&self, job: impl FnOnce() + Send + 'static) {
		self.mailbox.push(Envelope::Job(Box::new(job)));
	}
}

/// Marshals values from any thread into a [`Var`] living on a dispatcher.
///
/// Dropping the last clone closes the sink.
pub struct Sink<T> {
	channel: Arc<SinkChannel>,
	_marker: PhantomData<fn(T)>,
}

struct SinkChannel {
	id: u64,
	mailbox: Arc<Mailbox>,
}

impl Drop for SinkChannel {
	fn drop(&mut self) {
		self.mailbox.push(Envelope::Close(self.id));
	}
}

impl<T> Clone for Sink<T> {
	fn clone(&self) -> Self {
		Sink {
			channel: self.channel.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> Sink<T>
where
	T: Send + 'static,
{
	pub fn send(&self, value: T) {
		let channel = &self.channel;
		channel.mailbox.push(Envelope::Value(channel.id, Box::new(value)));
	}

	/// Detaches the sink from its `Var`. Values sent earlier are still
	/// delivered; later ones are dropped.
	pub fn close(&self) {
		self.channel.mailbox.push(Envelope::Close(self.channel.id));
	}
}
