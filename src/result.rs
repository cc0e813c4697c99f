use crate::TaskError;

/// Status of an asynchronously produced value.
///
/// Values are never mutated in place: a holder moves from `Pending` to a
/// terminal variant by replacing the whole `TaskResult`.
#[derive(Debug, Clone)]
pub enum TaskResult<T> {
	Pending,
	Success(T),
	Error(TaskError),
}

impl<T> Default for TaskResult<T> {
	fn default() -> Self {
		TaskResult::Pending
	}
}

impl<T> TaskResult<T> {
	pub fn is_pending(&self) -> bool {
		matches!(self, TaskResult::Pending)
	}

	pub fn is_success(&self) -> bool {
		matches!(self, TaskResult::Success(_))
	}

	pub fn is_error(&self) -> bool {
		matches!(self, TaskResult::Error(_))
	}

	pub fn success(&self) -> Option<&T> {
		match self {
			TaskResult::Success(value) => Some(value),
			TaskResult::Pending | TaskResult::Error(_) => None,
		}
	}

	pub fn error(&self) -> Option<&TaskError> {
		match self {
			TaskResult::Error(error) => Some(error),
			TaskResult::Pending | TaskResult::Success(_) => None,
		}
	}

	pub fn as_ref(&self) -> TaskResult<&T> {
		match self {
			TaskResult::Pending => TaskResult::Pending,
			TaskResult::Success(value) => TaskResult::Success(value),
			TaskResult::Error(error) => TaskResult::Error(error.clone()),
		}
	}

	/// Maps the success payload, keeping `Pending` and `Error` as they are.
	pub fn map<R>(self, func: impl FnOnce(T) -> R) -> TaskResult<R> {
		match self {
			TaskResult::Pending => TaskResult::Pending,
			TaskResult::Success(value) => TaskResult::Success(func(value)),
			TaskResult::Error(error) => TaskResult::Error(error),
		}
	}

	/// Returns the terminal outcome, or `None` while pending.
	pub fn into_final(self) -> Option<Result<T, TaskError>> {
		match self {
			TaskResult::Pending => None,
			TaskResult::Success(value) => Some(Ok(value)),
			TaskResult::Error(error) => Some(Err(error)),
		}
	}
}

impl<T> From<Result<T, TaskError>> for TaskResult<T> {
	fn from(result: Result<T, TaskError>) -> Self {
		match result {
			Ok(value) => TaskResult::Success(value),
			Err(error) => TaskResult::Error(error),
		}
	}
}

impl<T: PartialEq> PartialEq for TaskResult<T> {
	/// Errors compare by kind and message; the cause chain is ignored.
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(TaskResult::Pending, TaskResult::Pending) => true,
			(TaskResult::Success(a), TaskResult::Success(b)) => a == b,
			(TaskResult::Error(a), TaskResult::Error(b)) => {
				a.kind() == b.kind() && a.message() == b.message()
			}
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ErrorKind;

	#[test]
	fn map_keeps_non_success() {
		let pending: TaskResult<i32> = TaskResult::Pending;
		assert!(pending.map(|v| v + 1).is_pending());

		let failed: TaskResult<i32> = TaskResult::Error(TaskError::new(ErrorKind::NotFound, "x"));
		let mapped = failed.map(|v| v.to_string());
		assert_eq!(mapped.error().map(TaskError::kind), Some(ErrorKind::NotFound));

		assert_eq!(TaskResult::Success(2).map(|v| v * 10), TaskResult::Success(20));
	}

	#[test]
	fn from_final() {
		let ok: TaskResult<&str> = Ok("a").into();
		assert_eq!(ok.success(), Some(&"a"));

		let err: TaskResult<()> = Err(TaskError::other("b")).into();
		assert!(err.is_error());
		assert!(err.into_final().is_some_and(|r| r.is_err()));
	}
}
