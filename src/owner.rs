use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use crate::addr::ArcAddr;
use crate::{Dispatcher, Task, TaskError, TaskId, TaskResult, Var};

/// Type-erased view of a task, enough to sweep it on teardown.
pub(crate) trait Cancel: Send + Sync {
	fn id(&self) -> TaskId;
	fn cancel(&self) -> bool;
}

/// Tracks the tasks started on behalf of one bounded lifetime (a screen, a
/// session) and cancels whatever is still running when that lifetime ends.
///
/// Dropping the owner is the same as calling [`retire_all`](Self::retire_all).
/// Tracking a task after retirement does not register it: the task is
/// cancelled on the spot and a warning is logged.
pub struct TaskOwner {
	body: Rc<OwnerBody>,
}

struct OwnerBody {
	dispatcher: Dispatcher,
	tasks: RefCell<BTreeSet<ArcAddr<dyn Cancel>>>,
	retired: Cell<bool>,
}

impl Drop for OwnerBody {
	fn drop(&mut self) {
		self.retire_all();
	}
}

impl TaskOwner {
	pub fn new(dispatcher: &Dispatcher) -> Self {
		TaskOwner {
			body: Rc::new(OwnerBody {
				dispatcher: dispatcher.clone(),
				tasks: RefCell::new(BTreeSet::new()),
				retired: Cell::new(false),
			}),
		}
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.body.dispatcher
	}

	/// Registers `task` and delivers its outcome to `listener` on the
	/// dispatcher. The task leaves the set before `listener` runs.
	pub fn track<T>(&self, task: &Task<T>, listener: impl FnOnce(Result<T, TaskError>) + 'static)
	where
		T: Clone + Send + 'static,
	{
		if !self.accepts(task) {
			return;
		}

		let entry = task.body.clone() as Arc<dyn Cancel>;
		self.body
			.tasks
			.borrow_mut()
			.insert(ArcAddr::new(entry.clone()));

		let owner = Rc::downgrade(&self.body);
		task.enqueue(&self.body.dispatcher, move |result| {
			if let Some(owner) = owner.upgrade() {
				owner.tasks.borrow_mut().remove(&ArcAddr::new(entry));
			}
			listener(result);
		});
	}

	/// Publishes `Pending` into `into` right away, then the task's final
	/// outcome once it arrives.
	pub fn track_into<T>(&self, task: &Task<T>, into: &Var<TaskResult<T>>)
	where
		T: Clone + Send + 'static,
	{
		if !self.accepts(task) {
			return;
		}

		into.set(TaskResult::Pending);
		let into = into.clone();
		self.track(task, move |result| into.set(result.into()));
	}

	/// Cancels every tracked task and empties the set. Safe to call more than
	/// once.
	pub fn retire_all(&self) {
		self.body.retire_all()
	}

	pub fn is_retired(&self) -> bool {
		self.body.retired.get()
	}

	pub fn len(&self) -> usize {
		self.body.tasks.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.body.tasks.borrow().is_empty()
	}

	pub fn contains<T>(&self, task: &Task<T>) -> bool
	where
		T: Send + 'static,
	{
		let entry = task.body.clone() as Arc<dyn Cancel>;
		self.body.tasks.borrow().contains(&ArcAddr::new(entry))
	}

	fn accepts<T>(&self, task: &Task<T>) -> bool
	where
		T: Clone + Send + 'static,
	{
		if self.body.retired.get() {
			tracing::warn!(task = %task.id(), "tracked after the owner retired, cancelling");
			task.cancel();
			return false;
		}
		if task.is_cancelled() {
			tracing::trace!(task = %task.id(), "cancelled task not tracked");
			return false;
		}
		true
	}
}

impl OwnerBody {
	fn retire_all(&self) {
		self.retired.set(true);

		let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
		if tasks.is_empty() {
			return;
		}

		let mut cancelled = 0usize;
		for task in &tasks {
			if task.cancel() {
				cancelled += 1;
			} else {
				tracing::trace!(task = %task.id(), "already finished at teardown");
			}
		}
		tracing::debug!(tracked = tasks.len(), cancelled, "task owner retired");
	}
}

impl std::fmt::Debug for TaskOwner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskOwner")
			.field("tracked", &self.len())
			.field("retired", &self.is_retired())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;
	use crate::{ErrorKind, TaskState};

	#[test]
	fn task_leaves_set_before_listener_runs() {
		let dispatcher = Dispatcher::new();
		let owner = Rc::new(TaskOwner::new(&dispatcher));
		let (task, completer) = Task::<u32>::pending();

		let observed = Rc::new(RefCell::new(None));
		owner.track(&task, {
			let owner = Rc::downgrade(&owner);
			let task = task.clone();
			let observed = observed.clone();
			move |result| {
				let owner = owner.upgrade().unwrap();
				*observed.borrow_mut() = Some((owner.contains(&task), owner.len(), result.ok()));
			}
		});
		assert!(owner.contains(&task));

		completer.complete(Ok(3));
		dispatcher.run_pending();
		assert_eq!(*observed.borrow(), Some((false, 0, Some(3))));
	}

	#[test]
	fn retire_all_cancels_everything() {
		let dispatcher = Dispatcher::new();
		let owner = TaskOwner::new(&dispatcher);
		let calls = Rc::new(RefCell::new(0));

		let mut completers = Vec::new();
		let mut tasks = Vec::new();
		for _ in 0..3 {
			let (task, completer) = Task::<u8>::pending();
			let calls = calls.clone();
			owner.track(&task, move |_| *calls.borrow_mut() += 1);
			tasks.push(task);
			completers.push(completer);
		}
		assert_eq!(owner.len(), 3);

		owner.retire_all();
		assert!(owner.is_empty());
		assert!(tasks.iter().all(|t| t.state() == TaskState::Cancelled));

		for completer in completers {
			completer.complete(Ok(1));
		}
		dispatcher.run_pending();
		assert_eq!(*calls.borrow(), 0);
		assert_eq!(dispatcher.parked(), 0);

		owner.retire_all();
	}

	#[test]
	fn track_after_retire_cancels_task() {
		let dispatcher = Dispatcher::new();
		let owner = TaskOwner::new(&dispatcher);
		owner.retire_all();

		let (task, completer) = Task::<u8>::pending();
		let var = Var::new(TaskResult::Success(9));
		owner.track_into(&task, &var);

		assert!(task.is_cancelled());
		assert!(owner.is_empty());
		assert_eq!(var.get(), Some(TaskResult::Success(9)));

		completer.complete(Ok(1));
		dispatcher.run_pending();
		assert_eq!(var.get(), Some(TaskResult::Success(9)));
	}

	#[test]
	fn track_into_publishes_pending_then_one_terminal() {
		let dispatcher = Dispatcher::new();
		let owner = TaskOwner::new(&dispatcher);
		let var: Var<TaskResult<u8>> = Var::empty();

		let seen = Rc::new(RefCell::new(Vec::new()));
		var.observe({
			let seen = seen.clone();
			move |v: &TaskResult<u8>| seen.borrow_mut().push(v.clone())
		});

		let task = Task::ready(Err(TaskError::new(ErrorKind::Unavailable, "offline")));
		owner.track_into(&task, &var);
		assert_eq!(*seen.borrow(), vec![TaskResult::Pending]);

		dispatcher.run_pending();
		dispatcher.run_pending();
		let seen = seen.borrow();
		assert_eq!(seen.len(), 2);
		assert!(seen[1].is_error());
		assert!(owner.is_empty());
	}

	#[test]
	fn dropping_owner_retires() {
		let dispatcher = Dispatcher::new();
		let (task, _completer) = Task::<u8>::pending();
		{
			let owner = TaskOwner::new(&dispatcher);
			owner.track(&task, |_| {});
		}
		assert!(task.is_cancelled());
	}
}
