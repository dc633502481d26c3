use super::Relax;

/// A [`Relax`] policy that yields to the OS scheduler.
pub struct Yield;

impl Relax for Yield {
	fn new() -> Self {
		Self
	}

	fn relax(&mut self) {
		std::thread::yield_now();
	}
}
