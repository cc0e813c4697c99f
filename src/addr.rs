use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::Arc;

/// Orders and compares an `Arc` by the address it points to, so two handles
/// are equal only when they share an allocation.
pub struct ArcAddr<T: ?Sized> {
	ptr: Arc<T>,
}

impl<T: ?Sized> ArcAddr<T> {
	pub fn new(ptr: Arc<T>) -> Self {
		ArcAddr { ptr }
	}

	fn addr(&self) -> *const () {
		Arc::as_ptr(&self.ptr) as *const ()
	}
}

impl<T: ?Sized> Deref for ArcAddr<T> {
	type Target = Arc<T>;
	fn deref(&self) -> &Self::Target {
		&self.ptr
	}
}

impl<T: ?Sized> PartialEq for ArcAddr<T> {
	fn eq(&self, other: &Self) -> bool {
		self.addr().eq(&other.addr())
	}
}

impl<T: ?Sized> Eq for ArcAddr<T> {}

impl<T: ?Sized> Ord for ArcAddr<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.addr().cmp(&other.addr())
	}
}

impl<T: ?Sized> PartialOrd for ArcAddr<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
