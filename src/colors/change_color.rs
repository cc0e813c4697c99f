use std::rc::Rc;
use std::sync::Arc;

use super::{ColorsRepository, NamedColor};
use crate::macros::enclose;
use crate::{merged, Dispatcher, Merged, TaskOwner, TaskResult, TasksFactory, Var};

pub const TITLE_SIMPLE: &str = "Change color";
pub const SAVE_FAILED: &str = "An error happened while saving the color";

/// Screen-level navigation and notifications, provided by the host.
pub trait Navigator {
	/// Leaves the screen, optionally handing a result to the previous one.
	fn go_back(&self, result: Option<NamedColor>);

	fn toast(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedColorListItem {
	pub color: NamedColor,
	pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewState {
	pub colors: Vec<NamedColorListItem>,
	pub show_save_button: bool,
	pub show_cancel_button: bool,
	pub show_save_progress: bool,
}

impl ViewState {
	pub fn new(colors: Vec<NamedColor>, current_color_id: u64, save_in_progress: bool) -> Self {
		ViewState {
			colors: colors
				.into_iter()
				.map(|color| NamedColorListItem {
					selected: color.id == current_color_id,
					color,
				})
				.collect(),
			show_save_button: !save_in_progress,
			show_cancel_button: !save_in_progress,
			show_save_progress: save_in_progress,
		}
	}

	pub fn selected(&self) -> Option<&NamedColor> {
		self.colors.iter().find(|item| item.selected).map(|item| &item.color)
	}
}

/// State holder for the "change color" screen.
///
/// Three inputs (the loaded list, the chosen id, whether a save runs) are
/// merged into one [`ViewState`]. Every task it starts is owned by the model
/// and cancelled when the model is dropped.
pub struct ChangeColorModel<R, F> {
	owner: TaskOwner,
	repository: Arc<R>,
	factory: F,
	navigator: Rc<dyn Navigator>,

	available_colors: Var<TaskResult<Vec<NamedColor>>>,
	current_color_id: Var<u64>,
	save_in_progress: Var<bool>,

	view_state: Merged<TaskResult<ViewState>>,
	screen_title: Merged<String>,
}

impl<R, F> ChangeColorModel<R, F>
where
	R: ColorsRepository,
	F: TasksFactory,
{
	pub fn new(
		dispatcher: &Dispatcher,
		repository: Arc<R>,
		factory: F,
		navigator: Rc<dyn Navigator>,
		current_color_id: u64,
	) -> Self {
		let available_colors = Var::new(TaskResult::Pending);
		let current_color_id = Var::new(current_color_id);
		let save_in_progress = Var::new(false);

		let view_state = merged!(
			(available_colors, current_color_id, save_in_progress) =>
			|(colors, current_id, saving): (TaskResult<Vec<NamedColor>>, u64, bool)| {
				colors.map(|colors| ViewState::new(colors, current_id, saving))
			}
		);

		let screen_title = merged!((view_state) => |(state,): (TaskResult<ViewState>,)| {
			match state {
				TaskResult::Success(state) => match state.selected() {
					Some(color) => format!("{}: {}", TITLE_SIMPLE, color.name),
					None => TITLE_SIMPLE.to_owned(),
				},
				TaskResult::Pending | TaskResult::Error(_) => TITLE_SIMPLE.to_owned(),
			}
		});

		let model = ChangeColorModel {
			owner: TaskOwner::new(dispatcher),
			repository,
			factory,
			navigator,
			available_colors,
			current_color_id,
			save_in_progress,
			view_state,
			screen_title,
		};
		model.load();
		model
	}

	pub fn view_state(&self) -> &Merged<TaskResult<ViewState>> {
		&self.view_state
	}

	pub fn screen_title(&self) -> &Merged<String> {
		&self.screen_title
	}

	pub fn current_color_id(&self) -> Option<u64> {
		self.current_color_id.get()
	}

	pub fn is_saving(&self) -> bool {
		self.save_in_progress.get().unwrap_or(false)
	}

	pub fn owner(&self) -> &TaskOwner {
		&self.owner
	}

	/// Selection changes are ignored while a save is running.
	pub fn on_color_chosen(&self, color: &NamedColor) {
		if self.is_saving() {
			return;
		}
		self.current_color_id.set(color.id);
	}

	pub fn on_save_pressed(&self) {
		if self.is_saving() {
			return;
		}
		let Some(color_id) = self.current_color_id.get() else {
			return;
		};
		self.save_in_progress.set(true);

		let repository = self.repository.clone();
		let task = self.factory.spawn(move |cx| {
			let color = cx.join(&repository.get_by_id(color_id))?;
			cx.join(&repository.set_current_color(color.clone()))?;
			Ok(color)
		});

		let saving = &self.save_in_progress;
		let navigator = &self.navigator;
		self.owner.track(&task, enclose!((saving, navigator) move |result| {
			saving.set(false);
			match result {
				Ok(color) => navigator.go_back(Some(color)),
				Err(error) => {
					tracing::warn!(%error, "saving the current color failed");
					navigator.toast(SAVE_FAILED);
				}
			}
		}));
	}

	pub fn on_cancel_pressed(&self) {
		self.navigator.go_back(None);
	}

	pub fn try_again(&self) {
		self.load();
	}

	fn load(&self) {
		let task = self.repository.available_colors();
		self.owner.track_into(&task, &self.available_colors);
	}
}
