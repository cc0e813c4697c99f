use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Ticket;
use crate::owner::Cancel;
use crate::{AwaitError, Dispatcher, ErrorKind, TaskError};

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
/// Outcome stored, nobody has observed it yet.
const COMPLETED: u8 = 2;
/// Outcome observed by a wait or a callback. Final.
const SETTLED: u8 = 3;
const CANCELLED: u8 = 4;

const SLEEP_POLL: Duration = Duration::from_millis(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "task#{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Created,
	Running,
	Completed,
	Cancelled,
}

/// One unit of cancellable work that ends in exactly one outcome.
///
/// Handles are cheap to clone and compare by identity, never by value.
pub struct Task<T> {
	pub(crate) body: Arc<TaskBody<T>>,
}

impl<T> Clone for Task<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

pub(crate) struct TaskBody<T> {
	id: TaskId,
	state: AtomicU8,
	slot: Mutex<Slot<T>>,
	settled: Condvar,
	token: CancellationToken,
	/// Bumped by a cancel that arrives after completion. Deliveries parked
	/// under an older generation are dropped.
	generation: AtomicU64,
}

struct Slot<T> {
	outcome: Option<Result<T, TaskError>>,
	watchers: SmallVec<[Ticket; 2]>,
}

impl<T> TaskBody<T> {
	fn new(state: u8, outcome: Option<Result<T, TaskError>>) -> Self {
		TaskBody {
			id: TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
			state: AtomicU8::new(state),
			slot: Mutex::new(Slot {
				outcome,
				watchers: SmallVec::new(),
			}),
			settled: Condvar::new(),
			token: CancellationToken::new(),
			generation: AtomicU64::new(0),
		}
	}

	fn begin(&self) -> bool {
		self.state
			.compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	fn complete(&self, result: Result<T, TaskError>) {
		let watchers = {
			let mut slot = self.slot.lock();
			let state = self.state.load(Ordering::Acquire);
			if state != CREATED && state != RUNNING {
				tracing::trace!(task = %self.id, "late result discarded");
				return;
			}

			slot.outcome = Some(result);
			if self
				.state
				.compare_exchange(state, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
				.is_err()
			{
				slot.outcome = None;
				tracing::trace!(task = %self.id, "result lost the race against cancel");
				return;
			}
			std::mem::take(&mut slot.watchers)
		};

		tracing::trace!(task = %self.id, "task completed");
		self.settled.notify_all();
		for ticket in watchers {
			ticket.wake();
		}
	}

	/// Returns `true` only when this call stopped an unfinished task. On a
	/// finished task the outcome is kept and only deliveries already parked
	/// are withdrawn.
	pub(crate) fn cancel(&self) -> bool {
		let mut current = self.state.load(Ordering::Acquire);
		loop {
			match current {
				CANCELLED => return false,
				COMPLETED | SETTLED => {
					self.generation.fetch_add(1, Ordering::AcqRel);
					tracing::trace!(task = %self.id, "parked deliveries withdrawn");
					return false;
				}
				_ => {}
			}
			match self.state.compare_exchange(
				current,
				CANCELLED,
				Ordering::AcqRel,
				Ordering::Acquire,
			) {
				Ok(_) => break,
				Err(actual) => current = actual,
			}
		}

		self.token.cancel();
		let watchers = {
			let mut slot = self.slot.lock();
			slot.outcome = None;
			std::mem::take(&mut slot.watchers)
		};
		self.settled.notify_all();

		// Parked callbacks are released by the dispatcher; they see the
		// cancelled state and never run.
		for ticket in watchers {
			ticket.wake();
		}

		tracing::debug!(task = %self.id, "task cancelled");
		true
	}

	/// Claims the outcome for an observer. Returns `None` when cancellation
	/// won.
	fn claim(&self) -> Option<Result<T, TaskError>>
	where
		T: Clone,
	{
		let mut current = self.state.load(Ordering::Acquire);
		loop {
			match current {
				COMPLETED => match self.state.compare_exchange(
					COMPLETED,
					SETTLED,
					Ordering::AcqRel,
					Ordering::Acquire,
				) {
					Ok(_) => break,
					Err(actual) => current = actual,
				},
				SETTLED => break,
				_ => return None,
			}
		}
		self.slot.lock().outcome.clone()
	}

	fn state(&self) -> TaskState {
		match self.state.load(Ordering::Acquire) {
			CREATED => TaskState::Created,
			RUNNING => TaskState::Running,
			CANCELLED => TaskState::Cancelled,
			_ => TaskState::Completed,
		}
	}
}

impl<T: Send> Cancel for TaskBody<T> {
	fn id(&self) -> TaskId {
		self.id
	}

	fn cancel(&self) -> bool {
		TaskBody::cancel(self)
	}
}

impl<T> Task<T>
where
	T: Clone + Send + 'static,
{
	/// A task plus the handle its producer completes it through.
	pub fn pending() -> (Task<T>, Completer<T>) {
		let body = Arc::new(TaskBody::new(CREATED, None));
		(
			Task { body: body.clone() },
			Completer { body: Some(body) },
		)
	}

	/// An already completed task.
	pub fn ready(result: Result<T, TaskError>) -> Task<T> {
		Task {
			body: Arc::new(TaskBody::new(COMPLETED, Some(result))),
		}
	}

	#[inline]
	pub fn id(&self) -> TaskId {
		self.body.id
	}

	pub fn state(&self) -> TaskState {
		self.body.state()
	}

	pub fn is_cancelled(&self) -> bool {
		self.state() == TaskState::Cancelled
	}

	/// Blocks until the task finishes.
	///
	/// Never call this on a dispatcher thread: completion may need that very
	/// thread. Doing so panics.
	pub fn wait(&self) -> Result<T, AwaitError> {
		self.wait_within(None)
	}

	/// With a context, wakes up every poll interval and gives up once that
	/// context is cancelled, cancelling this task too.
	fn wait_within(&self, cx: Option<&TaskContext>) -> Result<T, AwaitError> {
		if Dispatcher::is_current_thread() {
			panic!("Task::wait called on a dispatcher thread, use Task::enqueue instead");
		}

		let interrupted = {
			let mut slot = self.body.slot.lock();
			loop {
				match self.body.state.load(Ordering::Acquire) {
					COMPLETED | SETTLED => break false,
					CANCELLED => return Err(AwaitError::Cancelled),
					_ => match cx {
						None => self.body.settled.wait(&mut slot),
						Some(cx) if cx.is_cancelled() => break true,
						Some(_) => {
							self.body.settled.wait_for(&mut slot, SLEEP_POLL);
						}
					},
				}
			}
		};

		if interrupted {
			tracing::trace!(task = %self.body.id, "waiter cancelled, cancelling the awaited task");
			self.body.cancel();
			return Err(AwaitError::Cancelled);
		}

		match self.body.claim() {
			Some(Ok(value)) => Ok(value),
			Some(Err(error)) => Err(AwaitError::Failed(error)),
			None => Err(AwaitError::Cancelled),
		}
	}

	/// Delivers the outcome to `callback` on `dispatcher`'s thread, at most
	/// once. Nothing is delivered if the task gets cancelled first.
	pub fn enqueue(
		&self,
		dispatcher: &Dispatcher,
		callback: impl FnOnce(Result<T, TaskError>) + 'static,
	) {
		if self.is_cancelled() {
			tracing::trace!(task = %self.body.id, "enqueue on a cancelled task ignored");
			return;
		}

		let body = self.body.clone();
		let generation = body.generation.load(Ordering::Acquire);
		let ticket = dispatcher.park(Box::new(move || {
			if body.generation.load(Ordering::Acquire) != generation {
				tracing::trace!(task = %body.id, "callback withdrawn by cancel");
				return;
			}
			match body.claim() {
				Some(outcome) => callback(outcome),
				None => tracing::trace!(task = %body.id, "callback suppressed by cancel"),
			}
		}));

		let ready = {
			let mut slot = self.body.slot.lock();
			match self.body.state.load(Ordering::Acquire) {
				CREATED | RUNNING => {
					slot.watchers.push(ticket);
					None
				}
				_ => Some(ticket),
			}
		};

		if let Some(ticket) = ready {
			ticket.wake();
		}
	}

	/// Requests cancellation. Returns `false` when the task was already
	/// cancelled or had already finished; a finished task keeps its outcome,
	/// but callbacks enqueued before this call never run.
	pub fn cancel(&self) -> bool {
		self.body.cancel()
	}
}

impl<T> fmt::Debug for Task<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.body.id)
			.field("state", &self.body.state())
			.finish()
	}
}

/// Producer side of a [`Task`].
///
/// Dropping it without completing fails the task with
/// [`ErrorKind::Abandoned`] so that waiters never hang.
pub struct Completer<T> {
	body: Option<Arc<TaskBody<T>>>,
}

impl<T> Completer<T> {
	pub fn id(&self) -> Option<TaskId> {
		self.body.as_ref().map(|b| b.id)
	}

	pub fn is_cancelled(&self) -> bool {
		self.body
			.as_ref()
			.map_or(true, |b| b.state() == TaskState::Cancelled)
	}

	pub fn complete(mut self, result: Result<T, TaskError>) {
		if let Some(body) = self.body.take() {
			body.complete(result);
		}
	}

	/// Runs `func` as the task body. A panic inside it fails the task with
	/// [`ErrorKind::Panicked`].
	pub fn run<F>(self, func: F)
	where
		F: FnOnce(&TaskContext) -> Result<T, TaskError>,
	{
		let Some(body) = self.body.as_ref() else {
			return;
		};
		if !body.begin() {
			tracing::trace!(task = %body.id, "task cancelled before it started");
			return;
		}

		let cx = TaskContext {
			token: body.token.clone(),
		};
		let result = match catch_unwind(AssertUnwindSafe(|| func(&cx))) {
			Ok(result) => result,
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				tracing::error!(task = %body.id, %message, "task body panicked");
				Err(TaskError::new(ErrorKind::Panicked, message))
			}
		};
		self.complete(result);
	}
}

impl<T> Drop for Completer<T> {
	fn drop(&mut self) {
		if let Some(body) = self.body.take() {
			body.complete(Err(TaskError::new(
				ErrorKind::Abandoned,
				"task was dropped without completing",
			)));
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_owned()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"task body panicked".to_owned()
	}
}

/// Handed to a task body so it can notice cancellation.
#[derive(Clone)]
pub struct TaskContext {
	token: CancellationToken,
}

impl TaskContext {
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// `Err` with [`ErrorKind::Interrupted`] once cancellation was requested.
	pub fn ensure_active(&self) -> Result<(), TaskError> {
		if self.is_cancelled() {
			return Err(TaskError::new(ErrorKind::Interrupted, "task was cancelled"));
		}
		Ok(())
	}

	/// Sleeps for `duration`, returning early if the task gets cancelled.
	pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
		let deadline = Instant::now() + duration;
		loop {
			self.ensure_active()?;
			let now = Instant::now();
			if now >= deadline {
				return Ok(());
			}
			std::thread::sleep((deadline - now).min(SLEEP_POLL));
		}
	}

	/// Blocks on a nested task. Once this context is cancelled the nested
	/// task is cancelled as well and `Interrupted` is returned.
	pub fn join<U>(&self, task: &Task<U>) -> Result<U, TaskError>
	where
		U: Clone + Send + 'static,
	{
		task.wait_within(Some(self)).map_err(TaskError::from)
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;
	use std::thread;

	use super::*;

	type Seen<T> = Rc<RefCell<Vec<Result<T, TaskError>>>>;

	fn spy<T: 'static>() -> (Seen<T>, impl FnOnce(Result<T, TaskError>)) {
		let seen = Rc::new(RefCell::new(Vec::new()));
		let sink = seen.clone();
		(seen, move |r| sink.borrow_mut().push(r))
	}

	#[test]
	fn wait_returns_worker_value() {
		let (task, completer) = Task::pending();
		let worker = thread::spawn(move || completer.run(|_| Ok(41 + 1)));
		assert_eq!(task.wait().unwrap(), 42);
		worker.join().unwrap();
		assert_eq!(task.state(), TaskState::Completed);
	}

	#[test]
	fn wait_propagates_error() {
		let task: Task<()> = Task::ready(Err(TaskError::new(ErrorKind::NotFound, "nope")));
		match task.wait() {
			Err(AwaitError::Failed(error)) => assert_eq!(error.kind(), ErrorKind::NotFound),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn cancel_unblocks_waiter() {
		let (task, completer) = Task::<u32>::pending();
		let waiter = thread::spawn({
			let task = task.clone();
			move || task.wait()
		});
		thread::sleep(Duration::from_millis(20));
		assert!(task.cancel());
		assert!(waiter.join().unwrap().unwrap_err().is_cancelled());

		assert!(!task.cancel());
		completer.complete(Ok(1));
		assert!(task.wait().unwrap_err().is_cancelled());
	}

	#[test]
	fn cancel_before_completion_suppresses_callback() {
		let dispatcher = Dispatcher::new();
		let (task, completer) = Task::pending();
		let (seen, callback) = spy::<u32>();
		task.enqueue(&dispatcher, callback);

		assert!(task.cancel());
		completer.complete(Ok(5));
		dispatcher.run_pending();

		assert!(seen.borrow().is_empty());
		assert_eq!(dispatcher.parked(), 0);
	}

	#[test]
	fn cancel_withdraws_delivery_in_flight() {
		let dispatcher = Dispatcher::new();
		let (task, completer) = Task::pending();
		let (seen, callback) = spy::<u32>();
		task.enqueue(&dispatcher, callback);

		completer.complete(Ok(5));
		assert!(!task.cancel());
		dispatcher.run_pending();

		assert!(seen.borrow().is_empty());
		assert_eq!(dispatcher.parked(), 0);
		assert_eq!(task.state(), TaskState::Completed);

		let (seen, callback) = spy::<u32>();
		task.enqueue(&dispatcher, callback);
		dispatcher.run_pending();
		assert_eq!(*seen.borrow()[0].as_ref().unwrap(), 5);
	}

	#[test]
	fn cancel_after_completion_keeps_outcome() {
		let task = Task::ready(Ok(5u32));
		assert!(!task.cancel());
		assert!(!task.is_cancelled());
		assert_eq!(task.wait().unwrap(), 5);

		let failed: Task<u32> = Task::ready(Err(TaskError::other("broken")));
		assert!(!failed.cancel());
		match failed.wait() {
			Err(AwaitError::Failed(error)) => assert_eq!(error.message(), "broken"),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn join_cancels_nested_task_with_its_parent() {
		let (inner, _inner_completer) = Task::<u32>::pending();
		let (outer, completer) = Task::<u32>::pending();
		let worker = thread::spawn({
			let inner = inner.clone();
			move || completer.run(move |cx| cx.join(&inner))
		});

		while outer.state() != TaskState::Running {
			thread::yield_now();
		}
		assert!(outer.cancel());
		worker.join().unwrap();

		assert!(inner.is_cancelled());
		assert!(outer.wait().unwrap_err().is_cancelled());
	}

	#[test]
	fn join_returns_nested_outcome() {
		let (outer, completer) = Task::<u32>::pending();
		let inner = Task::ready(Ok(20));
		completer.run(|cx| Ok(cx.join(&inner)? + 1));
		assert_eq!(outer.wait().unwrap(), 21);
	}

	#[test]
	fn callback_fires_once_on_dispatcher() {
		let dispatcher = Dispatcher::new();
		let (task, completer) = Task::pending();
		let (seen, callback) = spy::<&'static str>();
		task.enqueue(&dispatcher, callback);

		thread::spawn(move || completer.run(|_| Ok("done")))
			.join()
			.unwrap();
		assert!(seen.borrow().is_empty());

		dispatcher.run_pending();
		dispatcher.run_pending();
		assert_eq!(seen.borrow().len(), 1);
		assert_eq!(*seen.borrow()[0].as_ref().unwrap(), "done");
		assert!(!task.cancel());
	}

	#[test]
	fn enqueue_after_wait_replays_outcome() {
		let (task, completer) = Task::pending();
		let waited = thread::spawn({
			let task = task.clone();
			move || {
				completer.run(|_| Ok(vec![1, 2]));
				task.wait()
			}
		})
		.join()
		.unwrap();
		assert_eq!(waited.unwrap(), vec![1, 2]);

		let dispatcher = Dispatcher::new();
		assert!(!task.cancel());
		let (seen, callback) = spy::<Vec<i32>>();
		task.enqueue(&dispatcher, callback);
		dispatcher.run_pending();
		assert_eq!(*seen.borrow()[0].as_ref().unwrap(), vec![1, 2]);
	}

	#[test]
	fn enqueue_on_cancelled_task_is_silent() {
		let dispatcher = Dispatcher::new();
		let (task, _completer) = Task::<u8>::pending();
		task.cancel();
		let (seen, callback) = spy::<u8>();
		task.enqueue(&dispatcher, callback);
		assert_eq!(dispatcher.parked(), 0);
		dispatcher.run_pending();
		assert!(seen.borrow().is_empty());
	}

	#[test]
	fn panics_and_abandonment_become_errors() {
		let (task, completer) = Task::<u8>::pending();
		completer.run(|_| panic!("kaboom"));
		let error = TaskError::from(task.wait().unwrap_err());
		assert_eq!(error.kind(), ErrorKind::Panicked);
		assert_eq!(error.message(), "kaboom");

		let (task, completer) = Task::<u8>::pending();
		std::mem::drop(completer);
		let error = TaskError::from(task.wait().unwrap_err());
		assert_eq!(error.kind(), ErrorKind::Abandoned);
	}

	#[test]
	fn body_observes_cancellation() {
		let (task, completer) = Task::<()>::pending();
		let worker = thread::spawn(move || {
			completer.run(|cx| {
				cx.sleep(Duration::from_secs(30))?;
				Ok(())
			})
		});
		thread::sleep(Duration::from_millis(20));
		task.cancel();
		worker.join().unwrap();
		assert!(task.wait().unwrap_err().is_cancelled());
	}

	#[test]
	#[should_panic(expected = "dispatcher thread")]
	fn wait_on_dispatcher_thread_panics() {
		let _dispatcher = Dispatcher::new();
		let task = Task::ready(Ok(1));
		let _ = task.wait();
	}
}
