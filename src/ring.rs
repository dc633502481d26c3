extern crate alloc;

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use alloc::boxed::Box;
use alloc::sync::Arc;

use portable_atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use crate::refcount::{RefCount, RefCounted};
use crate::relax::{Relax, Spin};

/// One storage position of the ring: the payload plus the counter that
/// gates its reuse. The counter lives _next to_ the payload, not inside it,
/// because readers racing a stale head may touch the counter of a slot the
/// publisher is concurrently overwriting.
struct Slot<T, C> {
	refs: C,
	data: UnsafeCell<T>,
}

impl<T, C> Slot<T, C>
where
	C: RefCounted,
{
	fn new(value: T) -> Self {
		Self { refs: C::new(), data: UnsafeCell::new(value) }
	}
}

/// The publish ring.
///
/// `N` slots of `T`, counted by `C`, waited on with `R`. `N` must be a power
/// of two (positions are mapped with a mask, not a division) of at least 2,
/// and at least two larger than the maximum number of concurrently held
/// [`Guard`]s. Both constraints are the caller's: the first is checked at
/// compile time, the second cannot be and an undersized ring makes the
/// publisher wait in [`Publisher::begin_update`] until a reader lets go.
///
/// A `Ring` is constructed from its `N` initial values and then [`split`]
/// into the single [`Publisher`] and a clonable [`Reader`].
///
/// [`split`]: Self::split
pub struct Ring<T, const N: usize, C = RefCount, R = Spin> {
	slots: [AtomicPtr<Slot<T, C>>; N],
	/// Monotonically increasing; `head & (N - 1)` is the published position.
	head: AtomicUsize,
	_marker: PhantomData<(Slot<T, C>, fn() -> R)>,
}

impl<T, const N: usize, C, R> Ring<T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	/// Create a ring over `values`, publishing `values[0]`.
	pub fn new(values: [T; N]) -> Self {
		const {
			assert!(
				N >= 2 && N.is_power_of_two(),
				"ring capacity must be a power of two and at least 2",
			);
		}

		let slots = values
			.map(|value| AtomicPtr::new(Box::into_raw(Box::new(Slot::new(value)))));

		Self {
			slots,
			head: AtomicUsize::new(0),
			_marker: PhantomData,
		}
	}

	/// Split the ring into its two roles.
	///
	/// The [`Publisher`] is the only handle that can stage and commit new
	/// values and it cannot be cloned, so exactly one thread at a time holds
	/// the publisher role. The [`Reader`] clones freely.
	#[must_use]
	pub fn split(self) -> (Publisher<T, N, C, R>, Reader<T, N, C, R>) {
		let ring = Arc::new(self);

		(Publisher { ring: Arc::clone(&ring) }, Reader { ring })
	}

	fn read(&self) -> Guard<'_, T, C> {
		let mut head = self.head.load(Ordering::Acquire);
		let mut relax = R::new();

		loop {
			let slot =
				unsafe { &*self.slots[head & (N - 1)].load(Ordering::Acquire) };
			slot.refs.acquire();

			/* Order the count increment before the head re-read. Paired
			 * with the fence in `Publisher::begin_update`: if the
			 * publisher's reuse scan missed this increment, this re-read
			 * sees the advanced head and the reference is discarded.
			 */
			fence(Ordering::SeqCst);

			let current = self.head.load(Ordering::Acquire);
			if current == head {
				return Guard { slot };
			}

			// Raced a commit; the slot may be the publisher's next reuse
			// target. Drop the candidate and retry against the new head.
			slot.refs.release();
			head = current;
			relax.relax();
		}
	}
}

impl<T, const N: usize, C, R> Drop for Ring<T, N, C, R> {
	fn drop(&mut self) {
		// Guards and updates borrow the handles, which keep the ring alive,
		// so every slot is unreferenced by now.
		for slot in &self.slots {
			drop(unsafe { Box::from_raw(slot.load(Ordering::Relaxed)) });
		}
	}
}

unsafe impl<T, const N: usize, C, R> Send for Ring<T, N, C, R>
where
	T: Send,
	C: Send,
{
}

unsafe impl<T, const N: usize, C, R> Sync for Ring<T, N, C, R>
where
	T: Send + Sync,
	C: Sync,
{
}

/// The writing half of a [`Ring`].
///
/// There is exactly one. Staging operations take `&mut self`, so one update
/// is in flight at a time and a second publisher cannot exist in safe code.
pub struct Publisher<T, const N: usize, C = RefCount, R = Spin> {
	ring: Arc<Ring<T, N, C, R>>,
}

impl<T, const N: usize, C, R> Publisher<T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	/// Get the currently published value, as the starting point to copy the
	/// next version from.
	///
	/// Only the publisher advances the head, so unlike [`Reader::read`] this
	/// needs no counted reference and no retry; relaxed reads are enough on
	/// this side.
	pub fn current(&self) -> &T {
		let head = self.ring.head.load(Ordering::Relaxed);
		let slot = unsafe {
			&*self.ring.slots[head & (N - 1)].load(Ordering::Relaxed)
		};

		unsafe { &*slot.data.get() }
	}

	/// Claim a free slot to stage the next value in.
	///
	/// Scans forward from the slot after the head for one with a count of
	/// zero; the published slot itself is never a candidate. If the free
	/// slot is found further out, the two slot pointers are swapped so the
	/// free slot sits right after the head and [`Update::commit`] is a plain
	/// head increment.
	///
	/// This is the one operation that can wait: while every reusable slot is
	/// still referenced it relaxes and rescans until a reader lets go. Size
	/// the ring with `N >= max concurrent readers + 2` to keep that wait
	/// bounded in practice.
	///
	/// Dropping the returned [`Update`] without committing abandons the
	/// staged write.
	pub fn begin_update(&mut self) -> Update<'_, T, N, C, R> {
		let ring = &*self.ring;
		let head = ring.head.load(Ordering::Relaxed);
		let next = head.wrapping_add(1) & (N - 1);

		/* Order the head advance of the previous commit before this scan's
		 * count reads. Paired with the fence in `Ring::read`: a reader whose
		 * increment this scan misses is guaranteed to re-read the advanced
		 * head and discard its reference, so it never dereferences a slot
		 * picked here.
		 */
		fence(Ordering::SeqCst);

		let first = ring.slots[next].load(Ordering::Relaxed);

		if unsafe { &*first }.refs.count() != 0 {
			let (offset, free) = 'found: {
				let mut relax = R::new();

				loop {
					for offset in 1..N {
						let pos = head.wrapping_add(offset) & (N - 1);
						let ptr = ring.slots[pos].load(Ordering::Relaxed);

						if unsafe { &*ptr }.refs.count() == 0 {
							break 'found (offset, ptr);
						}
					}

					relax.relax();
				}
			};

			if offset != 1 {
				// Relocate the free slot to the position after the head.
				// Pointers move, payloads stay put under their readers.
				let pos = head.wrapping_add(offset) & (N - 1);
				ring.slots[pos].store(first, Ordering::Release);
				ring.slots[next].store(free, Ordering::Release);
			}
		}

		let slot = unsafe { &*ring.slots[next].load(Ordering::Relaxed) };

		Update { ring, slot }
	}

	/// Run one whole update cycle: claim a slot, let `f` derive the next
	/// value from the current one, commit.
	///
	/// `f` gets the currently published value and the staged slot. The slot
	/// holds whatever stale version was in it last, so `f` must fully
	/// overwrite it.
	pub fn publish_with<F>(&mut self, f: F)
	where
		F: FnOnce(&T, &mut T),
	{
		let mut update = self.begin_update();
		update.stage_with(f);
		update.commit();
	}
}

/// An in-flight update, returned by [`Publisher::begin_update`].
///
/// Dereferences to the staged value. Nothing is visible to readers until
/// [`commit`] is called.
///
/// [`commit`]: Self::commit
pub struct Update<'a, T, const N: usize, C = RefCount, R = Spin> {
	ring: &'a Ring<T, N, C, R>,
	slot: &'a Slot<T, C>,
}

impl<'a, T, const N: usize, C, R> Update<'a, T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	/// Get the currently published value.
	///
	/// The head cannot move while an `Update` exists, so this is stable for
	/// the whole staging.
	pub fn current(&self) -> &T {
		let head = self.ring.head.load(Ordering::Relaxed);
		let slot = unsafe {
			&*self.ring.slots[head & (N - 1)].load(Ordering::Relaxed)
		};

		unsafe { &*slot.data.get() }
	}

	/// Write the staged value as a function of the published one.
	pub fn stage_with<F>(&mut self, f: F)
	where
		F: FnOnce(&T, &mut T),
	{
		let staged = self.slot.data.get();
		let current: *const T = self.current();

		// The staged slot and the published slot are distinct: capacity is
		// at least 2 and the scan never picks the published slot.
		unsafe { f(&*current, &mut *staged) };
	}

	/// Publish the staged value.
	///
	/// The release ordering on the head increment makes every write staged
	/// through this `Update` visible to any reader that observes the new
	/// head.
	pub fn commit(self) {
		self.ring.head.fetch_add(1, Ordering::Release);
	}
}

impl<'a, T, const N: usize, C, R> Deref for Update<'a, T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.slot.data.get() }
	}
}

impl<'a, T, const N: usize, C, R> DerefMut for Update<'a, T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	fn deref_mut(&mut self) -> &mut Self::Target {
		// The `Update` mutably borrows the sole `Publisher`, so this is the
		// only live path to the staged slot, and its count was zero when it
		// was claimed.
		unsafe { &mut *self.slot.data.get() }
	}
}

/// The reading half of a [`Ring`]. Clone one per reader thread.
pub struct Reader<T, const N: usize, C = RefCount, R = Spin> {
	ring: Arc<Ring<T, N, C, R>>,
}

impl<T, const N: usize, C, R> Reader<T, N, C, R>
where
	C: RefCounted,
	R: Relax,
{
	/// Get the value that is current at some instant during this call.
	///
	/// The returned [`Guard`] keeps its slot's count raised, which keeps the
	/// publisher from reusing the slot; a later commit does _not_ change the
	/// value behind a live guard. Hold guards briefly: every held guard is
	/// one slot the publisher cannot reclaim.
	///
	/// This never blocks. It retries only when it races a commit, so it is
	/// wait-free for any publisher that is not infinitely fast.
	pub fn read(&self) -> Guard<'_, T, C> {
		self.ring.read()
	}
}

impl<T, const N: usize, C, R> Clone for Reader<T, N, C, R> {
	fn clone(&self) -> Self {
		Self { ring: Arc::clone(&self.ring) }
	}
}

/// The RAII guard returned by [`Reader::read`].
///
/// Holds one counted reference to its slot and releases it exactly once, on
/// drop.
pub struct Guard<'a, T, C: RefCounted = RefCount> {
	slot: &'a Slot<T, C>,
}

impl<'a, T, C> Deref for Guard<'a, T, C>
where
	C: RefCounted,
{
	type Target = T;

	fn deref(&self) -> &Self::Target {
		// The publisher re-checks this slot's count against zero before
		// every overwrite, so the payload is stable while the guard lives.
		unsafe { &*self.slot.data.get() }
	}
}

impl<'a, T, C> Drop for Guard<'a, T, C>
where
	C: RefCounted,
{
	fn drop(&mut self) {
		self.slot.refs.release();
	}
}

unsafe impl<T: Sync, C: RefCounted + Sync> Send for Guard<'_, T, C> {}
unsafe impl<T: Sync, C: RefCounted + Sync> Sync for Guard<'_, T, C> {}

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;

	use std::sync::atomic::AtomicBool;
	use std::thread::{scope, sleep};
	use std::time::Duration;

	use proptest::prelude::*;

	use crate::refcount::PaddedRefCount;
	use crate::relax::Yield;

	fn slot_counts<T, const N: usize, C, R>(ring: &Ring<T, N, C, R>) -> Vec<usize>
	where
		C: RefCounted,
	{
		ring.slots
			.iter()
			.map(|slot| unsafe { &*slot.load(Ordering::Relaxed) }.refs.count())
			.collect()
	}

	#[test]
	fn reads_observe_every_commit_in_order() {
		let ring: Ring<u64, 4> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		assert_eq!(*reader.read(), 0);

		for i in 1..=20 {
			publisher.publish_with(|_, next| *next = i);

			assert_eq!(*reader.read(), i);
			assert_eq!(*publisher.current(), i);
		}
	}

	#[test]
	fn updates_start_from_the_published_value() {
		let ring: Ring<Vec<u64>, 4> =
			Ring::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()]);
		let (mut publisher, reader) = ring.split();

		for i in 0..10 {
			publisher.publish_with(|current, next| {
				next.clone_from(current);
				next.push(i);
			});
		}

		let history = reader.read();
		assert_eq!(*history, (0..10).collect::<Vec<u64>>());
	}

	#[test]
	fn held_guard_is_stable_across_updates() {
		let ring: Ring<u64, 4> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		let held = reader.read();
		assert_eq!(*held, 0);

		// Far more commits than slots: the guard's slot must be skipped on
		// every reuse scan.
		for i in 1..=100 {
			publisher.publish_with(|_, next| *next = i);
			assert_eq!(*held, 0);
		}

		assert_eq!(*reader.read(), 100);
	}

	#[test]
	fn counts_return_to_zero() {
		let ring: Ring<u64, 4> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		let a = reader.read();
		let b = reader.read();
		publisher.publish_with(|_, next| *next = 1);
		let c = reader.read();

		assert_eq!(slot_counts(&reader.ring).iter().sum::<usize>(), 3);

		drop(a);
		drop(b);
		drop(c);

		assert_eq!(slot_counts(&reader.ring), [0; 4]);
	}

	// The walkthrough: capacity 4, one reader pinning the old head while a
	// full update cycle runs.
	#[test]
	fn staging_uses_the_slot_after_the_head() {
		let ring: Ring<&str, 4> = Ring::new(["A", "B", "C", "D"]);
		let (mut publisher, reader) = ring.split();

		let r1 = reader.read();
		assert_eq!(*r1, "A");

		let mut update = publisher.begin_update();
		assert_eq!(*update.current(), "A");
		*update = "A'";
		update.commit();

		assert_eq!(*reader.read(), "A'");
		// The pinned slot was not the one reused.
		assert_eq!(*r1, "A");

		drop(r1);
		assert_eq!(slot_counts(&reader.ring).iter().sum::<usize>(), 0);
	}

	#[test]
	fn scan_relocates_past_pinned_slots() {
		let ring: Ring<u64, 4> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		let g0 = reader.read();
		publisher.publish_with(|_, next| *next = 1);
		let g1 = reader.read();
		publisher.publish_with(|_, next| *next = 2);
		publisher.publish_with(|_, next| *next = 3);

		// The position after the head now holds the slot pinned by `g0`;
		// the update must swap a free slot into place instead of waiting.
		publisher.publish_with(|current, next| *next = current + 1);

		assert_eq!(*reader.read(), 4);
		assert_eq!(*g0, 0);
		assert_eq!(*g1, 1);
	}

	#[test]
	fn begin_update_waits_for_a_free_slot() {
		let ring: Ring<u64, 4, RefCount, Yield> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		let g0 = reader.read();
		publisher.publish_with(|_, next| *next = 1);
		let g1 = reader.read();
		publisher.publish_with(|_, next| *next = 2);
		let g2 = reader.read();
		// N - 2 held guards plus the published slot: this one must still
		// find the last free slot without waiting.
		publisher.publish_with(|_, next| *next = 3);
		let g3 = reader.read();

		// Now every slot is referenced.
		let committed = AtomicBool::new(false);

		scope(|s| {
			s.spawn(|| {
				publisher.publish_with(|_, next| *next = 4);
				committed.store(true, Ordering::SeqCst);
			});

			sleep(Duration::from_millis(200));
			assert!(!committed.load(Ordering::SeqCst));

			drop(g0);

			sleep(Duration::from_millis(200));
			assert!(committed.load(Ordering::SeqCst));
		});

		assert_eq!(*reader.read(), 4);
		assert_eq!((*g1, *g2, *g3), (1, 2, 3));
	}

	#[test]
	fn concurrent_readers_see_monotonic_values() {
		const UPDATES: u64 = 10_000;

		let ring: Ring<u64, 16, RefCount, Yield> = Ring::new([0; 16]);
		let (mut publisher, reader) = ring.split();

		scope(|s| {
			for _ in 0..4 {
				let reader = reader.clone();

				s.spawn(move || {
					let mut last = 0;

					loop {
						let value = reader.read();
						assert!(*value >= last);

						if *value == UPDATES {
							break;
						}
						last = *value;
					}
				});
			}

			for _ in 0..UPDATES {
				publisher.publish_with(|current, next| *next = current + 1);
			}
		});

		assert_eq!(slot_counts(&reader.ring).iter().sum::<usize>(), 0);
	}

	#[test]
	fn custom_counter_type() {
		let ring: Ring<u64, 4, PaddedRefCount> = Ring::new([0; 4]);
		let (mut publisher, reader) = ring.split();

		let held = reader.read();
		publisher.publish_with(|current, next| *next = current + 7);

		assert_eq!(*held, 0);
		assert_eq!(*reader.read(), 7);
	}

	proptest! {
		// Model check: arbitrary interleavings of publishes, held reads and
		// releases. Held guards must keep the value they pinned, fresh reads
		// must see the latest commit, and all counts must drain to zero.
		#[test]
		fn random_interleavings_hold_their_values(
			ops in proptest::collection::vec(0u8..=2, 1..256),
		) {
			let ring: Ring<u64, 8> = Ring::new([0; 8]);
			let (mut publisher, reader) = ring.split();

			let mut published = 0u64;
			let mut held: Vec<(Guard<'_, u64>, u64)> = Vec::new();

			for op in ops {
				match op {
					0 => {
						published += 1;
						publisher.publish_with(|_, next| *next = published);
					}
					// Cap held guards at N - 2 so a publish never waits.
					1 if held.len() < 6 => {
						held.push((reader.read(), published));
					}
					2 => {
						if let Some((guard, pinned)) = held.pop() {
							prop_assert_eq!(*guard, pinned);
						}
					}
					_ => {}
				}

				prop_assert_eq!(*reader.read(), published);

				for (guard, pinned) in &held {
					prop_assert_eq!(**guard, *pinned);
				}
			}

			drop(held);
			prop_assert_eq!(slot_counts(&reader.ring).iter().sum::<usize>(), 0);
		}
	}
}
