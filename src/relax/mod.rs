use crate::cfg::cfg_std;

/// An interface for wait policies.
///
/// The ring never sleeps on a lock; both of its waits are retry loops. The
/// reader retries when it races a concurrent commit and the publisher
/// rescans the slots while none of them is free. What a thread does between
/// retries is this policy.
///
/// State is per wait: a fresh value is created with [`new`] at the start of
/// each loop, and [`relax`] is called once per failed attempt, which lets a
/// policy escalate the longer the wait lasts.
///
/// [`new`]: Self::new
/// [`relax`]: Self::relax
pub trait Relax {
	/// Create the state for one wait loop.
	fn new() -> Self;

	/// Back off once before the next retry.
	fn relax(&mut self);
}

mod spin;
cfg_std! {
	mod backoff;
	mod r#yield;
}

pub use self::spin::Spin;
cfg_std! {
	pub use self::backoff::Backoff;
	pub use self::r#yield::Yield;
}
