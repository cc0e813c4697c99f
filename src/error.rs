use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Coarse classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	NotFound,
	InvalidInput,
	Unavailable,
	/// A task body stopped because its cancellation signal was raised.
	Interrupted,
	/// A task body panicked.
	Panicked,
	/// The producer of a task went away without completing it.
	Abandoned,
	Other,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorKind::NotFound => "not found",
			ErrorKind::InvalidInput => "invalid input",
			ErrorKind::Unavailable => "unavailable",
			ErrorKind::Interrupted => "interrupted",
			ErrorKind::Panicked => "panicked",
			ErrorKind::Abandoned => "abandoned",
			ErrorKind::Other => "failed",
		};
		f.write_str(name)
	}
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure cause carried by [`TaskResult::Error`](crate::TaskResult::Error).
///
/// Cheap to clone so the same failure can be handed to every observer.
#[derive(Clone, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
	kind: ErrorKind,
	message: String,
	#[source]
	source: Option<Cause>,
}

impl TaskError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		TaskError {
			kind,
			message: message.into(),
			source: None,
		}
	}

	pub fn other(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Other, message)
	}

	pub fn with_source<E>(mut self, source: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		self.source = Some(Arc::new(source));
		self
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

impl fmt::Debug for TaskError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut s = f.debug_struct("TaskError");
		s.field("kind", &self.kind).field("message", &self.message);
		if let Some(source) = &self.source {
			s.field("source", &source.to_string());
		}
		s.finish()
	}
}

/// Outcome of a blocking [`Task::wait`](crate::Task::wait) that did not
/// produce a value.
#[derive(Debug, Clone, Error)]
pub enum AwaitError {
	#[error("task was cancelled")]
	Cancelled,
	#[error(transparent)]
	Failed(#[from] TaskError),
}

impl AwaitError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, AwaitError::Cancelled)
	}
}

impl From<AwaitError> for TaskError {
	fn from(error: AwaitError) -> Self {
		match error {
			AwaitError::Failed(error) => error,
			AwaitError::Cancelled => {
				TaskError::new(ErrorKind::Interrupted, "awaited task was cancelled")
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::error::Error as _;

	use super::*;

	#[test]
	fn display_and_chain() {
		let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
		let error = TaskError::new(ErrorKind::Unavailable, "storage").with_source(io);

		assert_eq!(error.to_string(), "unavailable: storage");
		assert_eq!(error.source().map(|s| s.to_string()).as_deref(), Some("disk on fire"));
		assert_eq!(error.clone().kind(), ErrorKind::Unavailable);
	}

	#[test]
	fn nested_cancellation_becomes_interrupted() {
		let error: TaskError = AwaitError::Cancelled.into();
		assert_eq!(error.kind(), ErrorKind::Interrupted);

		let failed = TaskError::other("boom");
		let round: TaskError = AwaitError::from(failed).into();
		assert_eq!(round.message(), "boom");
	}
}
