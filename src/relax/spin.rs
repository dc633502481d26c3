use super::Relax;

/// A [`Relax`] policy that spins in place.
pub struct Spin;

impl Relax for Spin {
	fn new() -> Self {
		Self
	}

	fn relax(&mut self) {
		core::hint::spin_loop();
	}
}
