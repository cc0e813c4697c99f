pub use enclose::*;

/// Builds a [`Merged`](crate::Merged) from a list of observables, cloning
/// each handle.
///
/// ```ignore
/// let total = merged!((price, quantity) => |(price, quantity)| price * quantity);
/// ```
#[macro_export]
macro_rules! merged {
	(( $($input:expr),+ $(,)? ) => $combine:expr) => {
		$crate::Merged::new(( $( ::std::clone::Clone::clone(&$input), )+ ), $combine)
	};
}
