use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::NamedColor;
use crate::{ErrorKind, Task, TaskError, TasksFactory};

pub type ColorListener = Arc<dyn Fn(&NamedColor) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Access to the available colors and the current selection.
pub trait ColorsRepository: Send + Sync + 'static {
	fn available_colors(&self) -> Task<Vec<NamedColor>>;

	fn get_by_id(&self, id: u64) -> Task<NamedColor>;

	fn current_color(&self) -> Task<NamedColor>;

	fn set_current_color(&self, color: NamedColor) -> Task<()>;

	/// Listens for changes of the current color. The listener fires once
	/// right away with the current value, then on the thread of every writer.
	fn add_listener(&self, listener: ColorListener) -> ListenerId;

	fn remove_listener(&self, id: ListenerId) -> bool;
}

pub fn palette() -> Vec<NamedColor> {
	[
		("Red", 0xFFFF0000),
		("Green", 0xFF00FF00),
		("Blue", 0xFF0000FF),
		("Yellow", 0xFFFFFF00),
		("Magenta", 0xFFFF00FF),
		("Cyan", 0xFF00FFFF),
		("Gray", 0xFF888888),
		("Navy", 0xFF000080),
		("Pink", 0xFFFFC0CB),
		("Sparkling Red", 0xFFE30B5C),
		("Fake Black", 0xFF101010),
		("Meet Chocolate", 0xFF8B4513),
	]
	.into_iter()
	.enumerate()
	.map(|(i, (name, value))| NamedColor::new(i as u64 + 1, name, value))
	.collect()
}

/// Keeps colors in memory and simulates storage latency on every operation.
pub struct InMemoryColorsRepository<F> {
	factory: F,
	latency: Duration,
	state: Arc<Mutex<RepositoryState>>,
}

struct RepositoryState {
	colors: Vec<NamedColor>,
	current: NamedColor,
	failing: bool,
	next_listener: u64,
	listeners: Vec<(ListenerId, ColorListener)>,
}

impl<F> InMemoryColorsRepository<F>
where
	F: TasksFactory,
{
	pub fn new(factory: F, latency: Duration) -> Self {
		let colors = palette();
		let current = colors[0].clone();
		Self::from_parts(factory, latency, colors, current)
	}

	/// Fails with [`ErrorKind::InvalidInput`] when `colors` is empty.
	pub fn with_colors(
		factory: F,
		latency: Duration,
		colors: Vec<NamedColor>,
	) -> Result<Self, TaskError> {
		let Some(current) = colors.first().cloned() else {
			return Err(TaskError::new(
				ErrorKind::InvalidInput,
				"a repository needs at least one color",
			));
		};
		Ok(Self::from_parts(factory, latency, colors, current))
	}

	fn from_parts(
		factory: F,
		latency: Duration,
		colors: Vec<NamedColor>,
		current: NamedColor,
	) -> Self {
		InMemoryColorsRepository {
			factory,
			latency,
			state: Arc::new(Mutex::new(RepositoryState {
				colors,
				current,
				failing: false,
				next_listener: 0,
				listeners: Vec::new(),
			})),
		}
	}

	/// While set, listing the colors fails with [`ErrorKind::Unavailable`].
	pub fn set_failing(&self, failing: bool) {
		self.state.lock().failing = failing;
	}

	pub fn listener_count(&self) -> usize {
		self.state.lock().listeners.len()
	}
}

impl<F> ColorsRepository for InMemoryColorsRepository<F>
where
	F: TasksFactory,
{
	fn available_colors(&self) -> Task<Vec<NamedColor>> {
		let state = self.state.clone();
		let latency = self.latency;
		self.factory.spawn(move |cx| {
			cx.sleep(latency)?;
			let state = state.lock();
			if state.failing {
				return Err(TaskError::new(ErrorKind::Unavailable, "colors storage is unavailable"));
			}
			Ok(state.colors.clone())
		})
	}

	fn get_by_id(&self, id: u64) -> Task<NamedColor> {
		let state = self.state.clone();
		let latency = self.latency;
		self.factory.spawn(move |cx| {
			cx.sleep(latency)?;
			state
				.lock()
				.colors
				.iter()
				.find(|c| c.id == id)
				.cloned()
				.ok_or_else(|| {
					TaskError::new(ErrorKind::NotFound, format!("no color with id {id}"))
				})
		})
	}

	fn current_color(&self) -> Task<NamedColor> {
		let state = self.state.clone();
		let latency = self.latency;
		self.factory.spawn(move |cx| {
			cx.sleep(latency)?;
			Ok(state.lock().current.clone())
		})
	}

	fn set_current_color(&self, color: NamedColor) -> Task<()> {
		let state = self.state.clone();
		let latency = self.latency;
		self.factory.spawn(move |cx| {
			cx.sleep(latency)?;
			let listeners = {
				let mut state = state.lock();
				if !state.colors.contains(&color) {
					return Err(TaskError::new(
						ErrorKind::NotFound,
						format!("unknown color {}", color.name),
					));
				}
				state.current = color.clone();
				state
					.listeners
					.iter()
					.map(|(_, listener)| listener.clone())
					.collect::<Vec<_>>()
			};

			let count = listeners.len();
			tracing::debug!(color = %color.name, listeners = count, "current color changed");
			for listener in listeners {
				listener(&color);
			}
			Ok(())
		})
	}

	fn add_listener(&self, listener: ColorListener) -> ListenerId {
		let (id, current) = {
			let mut state = self.state.lock();
			let id = ListenerId(state.next_listener);
			state.next_listener += 1;
			state.listeners.push((id, listener.clone()));
			(id, state.current.clone())
		};
		listener(&current);
		id
	}

	fn remove_listener(&self, id: ListenerId) -> bool {
		let mut state = self.state.lock();
		let before = state.listeners.len();
		state.listeners.retain(|(l, _)| *l != id);
		state.listeners.len() != before
	}
}
