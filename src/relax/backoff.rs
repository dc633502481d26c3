use super::Relax;

/// A [`Relax`] policy that spins exponentially, then yields.
///
/// Short waits stay on the CPU, long ones give the timeslice back so the
/// reader the publisher is waiting on can actually run.
pub struct Backoff {
	step: u32,
}

const SPIN_LIMIT: u32 = 6;

impl Relax for Backoff {
	fn new() -> Self {
		Self { step: 0 }
	}

	fn relax(&mut self) {
		if self.step <= SPIN_LIMIT {
			for _ in 0..1u32 << self.step {
				core::hint::spin_loop();
			}
			self.step += 1;
		} else {
			std::thread::yield_now();
		}
	}
}
