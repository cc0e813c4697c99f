use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::{Task, TaskContext, TaskError};

/// Produces [`Task`]s whose bodies run away from the dispatcher thread.
pub trait TasksFactory: Send + Sync + 'static {
	fn spawn<T, F>(&self, body: F) -> Task<T>
	where
		T: Clone + Send + 'static,
		F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static;
}

/// Settings for [`ThreadTasksFactory`] workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
	name_prefix: String,
	stack_size: Option<usize>,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		WorkerConfig {
			name_prefix: "task-worker".to_owned(),
			stack_size: None,
		}
	}
}

impl WorkerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Worker threads are named `<prefix>-<n>`.
	pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.name_prefix = prefix.into();
		self
	}

	pub fn stack_size(mut self, bytes: usize) -> Self {
		self.stack_size = Some(bytes);
		self
	}
}

/// Runs every task on its own OS thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadTasksFactory {
	config: Arc<WorkerConfig>,
	spawned: Arc<AtomicU64>,
}

impl ThreadTasksFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(config: WorkerConfig) -> Self {
		ThreadTasksFactory {
			config: Arc::new(config),
			spawned: Arc::default(),
		}
	}
}

impl TasksFactory for ThreadTasksFactory {
	fn spawn<T, F>(&self, body: F) -> Task<T>
	where
		T: Clone + Send + 'static,
		F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
	{
		let (task, completer) = Task::pending();
		let n = self.spawned.fetch_add(1, Ordering::Relaxed);

		let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.name_prefix, n));
		if let Some(bytes) = self.config.stack_size {
			builder = builder.stack_size(bytes);
		}

		// On failure the closure is dropped together with the completer,
		// which fails the task as abandoned.
		match builder.spawn(move || completer.run(body)) {
			Ok(_) => tracing::trace!(task = %task.id(), "task spawned on a worker thread"),
			Err(error) => {
				tracing::error!(task = %task.id(), %error, "failed to spawn worker thread")
			}
		}
		task
	}
}

/// Runs task bodies on a tokio runtime's blocking pool, so they may block on
/// other tasks with [`Task::wait`].
#[derive(Debug, Clone)]
pub struct TokioTasksFactory {
	handle: tokio::runtime::Handle,
}

impl TokioTasksFactory {
	pub fn new(handle: tokio::runtime::Handle) -> Self {
		TokioTasksFactory { handle }
	}

	/// Uses the runtime the caller is running in.
	pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
		tokio::runtime::Handle::try_current().map(Self::new)
	}
}

impl TasksFactory for TokioTasksFactory {
	fn spawn<T, F>(&self, body: F) -> Task<T>
	where
		T: Clone + Send + 'static,
		F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
	{
		let (task, completer) = Task::pending();
		tracing::trace!(task = %task.id(), "task spawned on the blocking pool");
		let _detached = self.handle.spawn_blocking(move || completer.run(body));
		task
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::ErrorKind;

	#[test]
	fn thread_factory_names_workers() {
		let factory = ThreadTasksFactory::with_config(WorkerConfig::new().name_prefix("colors"));
		let task = factory.spawn(|_| Ok(thread::current().name().map(str::to_owned)));
		assert_eq!(task.wait().unwrap().as_deref(), Some("colors-0"));

		let second = factory.spawn(|_| Ok(thread::current().name().map(str::to_owned)));
		assert_eq!(second.wait().unwrap().as_deref(), Some("colors-1"));
	}

	#[test]
	fn thread_factory_reports_body_errors() {
		let factory = ThreadTasksFactory::new();
		let task: Task<()> =
			factory.spawn(|_| Err(TaskError::new(ErrorKind::InvalidInput, "bad id")));
		let error = TaskError::from(task.wait().unwrap_err());
		assert_eq!(error.kind(), ErrorKind::InvalidInput);
	}

	#[test]
	fn tokio_factory_allows_nested_waits() {
		let runtime = tokio::runtime::Runtime::new().unwrap();
		let factory = TokioTasksFactory::new(runtime.handle().clone());

		let inner = factory.spawn(|cx| {
			cx.sleep(Duration::from_millis(10))?;
			Ok(20)
		});
		let outer = factory.spawn(move |_| Ok(inner.wait()? + 1));
		assert_eq!(outer.wait().unwrap(), 21);
	}
}
