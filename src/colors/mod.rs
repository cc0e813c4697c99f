//! Sample screen built on the core: choosing the current color from a list.

mod change_color;
mod repository;

pub use change_color::{ChangeColorModel, NamedColorListItem, Navigator, ViewState};
pub use repository::{
	palette, ColorListener, ColorsRepository, InMemoryColorsRepository, ListenerId,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedColor {
	pub id: u64,
	pub name: String,
	/// Packed `0xAARRGGBB`.
	pub value: u32,
}

impl NamedColor {
	pub fn new(id: u64, name: impl Into<String>, value: u32) -> Self {
		NamedColor {
			id,
			name: name.into(),
			value,
		}
	}
}
