pub mod colors;
pub mod macros;

mod addr;
mod dispatcher;
mod error;
mod factory;
mod merged;
mod owner;
mod result;
mod task;
mod var;

use std::rc::Rc;

pub use dispatcher::{DispatchHandle, Dispatcher, Sink};
pub use error::{AwaitError, ErrorKind, TaskError};
pub use factory::{ThreadTasksFactory, TasksFactory, TokioTasksFactory, WorkerConfig};
pub use merged::{Inputs, Merged};
pub use owner::TaskOwner;
pub use result::TaskResult;
pub use task::{Completer, Task, TaskContext, TaskId, TaskState};
pub use var::Var;

/// Identifies one registration made with `observe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// A value holder that can be read and watched from the dispatcher thread.
pub trait Observable: 'static {
	type Value: Clone + 'static;

	/// Latest value, or `None` if nothing was published yet.
	fn get(&self) -> Option<Self::Value>;

	/// Registers `observer`. It is invoked at once with the current value,
	/// if there is one, and then for every later transition.
	fn subscribe(&self, observer: Rc<dyn Fn(&Self::Value)>) -> ObserverId;

	/// Stops notifying the observer registered as `id`.
	fn unsubscribe(&self, id: ObserverId) -> bool;
}
