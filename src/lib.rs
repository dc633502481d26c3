//! A [`Ring`] is a Read-Copy-Update variant with the grace period traded
//! away. Classical RCU lets a writer atomically swap in a new version of some
//! shared data while readers keep using whatever version they already hold,
//! and then makes the writer _wait_ until every reader of the old version has
//! provably finished before the old storage may be reclaimed. That wait (the
//! "grace period") is exactly what some publishing threads cannot afford.
//!
//! This crate removes it. Instead of waiting for readers to quiesce, the ring
//! keeps a fixed, power-of-two number of storage slots and an explicit
//! reference count per slot. Readers take a counted, scoped reference to the
//! slot at the head of the ring; the publisher stages the next version in a
//! slot whose count is zero and then publishes it by bumping the head index.
//! A slot is only ever overwritten once its count has been observed at zero,
//! so a reader holding a [`Guard`] can never have the value change under it.
//! The compromise runs the other way: if every reusable slot is still
//! referenced, it is the _publisher_ that waits in [`Publisher::begin_update`]
//! until a
//! reader lets go. Sizing the ring with at least two slots more than the
//! maximum number of concurrent readers keeps that wait practically bounded;
//! an undersized ring shows up as the publisher spinning, not as a crash.
//!
//! There is exactly one publisher. [`Ring::split`] hands out one non-clonable
//! [`Publisher`] whose staging operations take `&mut self`, so a second
//! concurrent publisher cannot be constructed in safe code, and any number of
//! clonable [`Reader`]s.
//!
//! Both waits in the system (the reader's retry after racing a commit and the
//! publisher's search for a free slot) back off through a pluggable [`Relax`]
//! policy: [`Spin`] by default, [`Yield`] or [`Backoff`] with the `std`
//! feature.
//!
//! # Example
//!
//! ```rust
//! use ringcu::Ring;
//!
//! // 8 slots supports up to 6 concurrent readers.
//! let ring: Ring<u64, 8> = Ring::new([0; 8]);
//! let (mut publisher, reader) = ring.split();
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         for _ in 0..1000 {
//!             publisher.publish_with(|current, next| *next = current + 1);
//!         }
//!     });
//!
//!     s.spawn(|| {
//!         let mut last = 0;
//!         while last < 1000 {
//!             let value = reader.read();
//!             // A single publisher only ever moves the value forward.
//!             assert!(*value >= last);
//!             last = *value;
//!         }
//!     });
//! });
//! ```
#![deny(missing_docs)]
#![warn(
	clippy::all,
	clippy::correctness,
	clippy::cargo,
	clippy::pedantic,
	clippy::nursery,
	clippy::perf,
	clippy::style
)]
#![allow(
	clippy::missing_panics_doc,
	clippy::significant_drop_tightening,
	clippy::needless_lifetimes
)]
#![cfg_attr(not(feature = "std"), no_std)]

mod cfg;

mod refcount;
mod relax;
mod ring;

#[doc(inline)]
pub use self::refcount::{PaddedRefCount, RefCount, RefCounted};

#[doc(inline)]
pub use self::relax::*;

#[doc(inline)]
pub use self::ring::{Guard, Publisher, Reader, Ring, Update};
