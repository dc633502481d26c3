use portable_atomic::{AtomicUsize, Ordering};

/// The counting capability every ring slot carries.
///
/// The [`Ring`] gates slot reuse on these counts: a reader increments the
/// count of the slot it borrows and decrements it when done, and the
/// publisher only overwrites a slot whose count it has observed at zero.
///
/// Implementations must be atomic. [`acquire`] and [`release`] must order
/// with at least `Release`, [`count`] with at least `Acquire`, so that a
/// "this slot is free" observation by the publisher happens-after the last
/// reader's release. None of the operations can fail; wrapping the count in
/// either direction is a bug in the embedding code and panics.
///
/// [`Ring`]: crate::Ring
/// [`acquire`]: Self::acquire
/// [`release`]: Self::release
/// [`count`]: Self::count
pub trait RefCounted {
	/// Create a fresh, unreferenced counter.
	fn new() -> Self;

	/// Increment the count by one.
	fn acquire(&self);

	/// Decrement the count by one.
	fn release(&self);

	/// Get the current count.
	fn count(&self) -> usize;
}

/// The ready-made [`RefCounted`] implementation used by default.
#[derive(Debug)]
pub struct RefCount {
	count: AtomicUsize,
}

impl RefCount {
	/// Create a new counter with a count of zero.
	#[must_use]
	pub const fn new() -> Self {
		Self { count: AtomicUsize::new(0) }
	}
}

impl RefCounted for RefCount {
	fn new() -> Self {
		Self { count: AtomicUsize::new(0) }
	}

	fn acquire(&self) {
		let c = self.count.fetch_add(1, Ordering::Release);

		if c == usize::MAX {
			panic_count_overflow();
		}
	}

	fn release(&self) {
		let c = self.count.fetch_sub(1, Ordering::Release);

		if c == 0 {
			panic_count_underflow();
		}
	}

	fn count(&self) -> usize {
		self.count.load(Ordering::Acquire)
	}
}

impl Clone for RefCount {
	/* A count describes references to one physical slot, never to the
	 * logical value, so it does not travel with a copy.
	 */
	fn clone(&self) -> Self {
		Self::new()
	}
}

impl Default for RefCount {
	fn default() -> Self {
		Self::new()
	}
}

/// A [`RefCount`] alone on its cache line.
///
/// Slot counters are written by every reader. With the plain [`RefCount`]
/// two neighbouring slots can end up with their counters on the same cache
/// line and readers of unrelated slots then invalidate each other. Rings
/// under heavy read traffic can use this variant as their counter type
/// instead.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct PaddedRefCount {
	inner: RefCount,
}

impl RefCounted for PaddedRefCount {
	fn new() -> Self {
		Self { inner: RefCount::new() }
	}

	fn acquire(&self) {
		self.inner.acquire();
	}

	fn release(&self) {
		self.inner.release();
	}

	fn count(&self) -> usize {
		self.inner.count()
	}
}

#[cold]
#[inline(never)]
fn panic_count_overflow() -> ! {
	panic!("slot reference count overflowed")
}

#[cold]
#[inline(never)]
fn panic_count_underflow() -> ! {
	panic!("slot reference count underflowed")
}

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;

	#[test]
	fn count_tracks_acquires_and_releases() {
		let count = RefCount::new();
		assert_eq!(count.count(), 0);

		count.acquire();
		count.acquire();
		assert_eq!(count.count(), 2);

		count.release();
		assert_eq!(count.count(), 1);

		count.release();
		assert_eq!(count.count(), 0);
	}

	#[test]
	fn clone_starts_unreferenced() {
		let count = RefCount::new();
		count.acquire();

		let copy = count.clone();
		assert_eq!(copy.count(), 0);
		assert_eq!(count.count(), 1);

		count.release();
	}

	#[test]
	#[should_panic = "underflowed"]
	fn release_without_acquire_panics() {
		let count = RefCount::new();
		count.release();
	}

	#[test]
	fn padded_counter_counts() {
		let count = PaddedRefCount::new();
		count.acquire();
		assert_eq!(count.count(), 1);
		count.release();
		assert_eq!(count.count(), 0);
	}
}
