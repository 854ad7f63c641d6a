/*
 * Copyright 2018 Ian Johnson
 *
 * This is free software, distributed under the MIT license.  A copy of the
 * license can be found in the LICENSE file in the project root, or at
 * https://opensource.org/licenses/MIT.
 */

//! A pacing clock for front-ends.
//!
//! The interpreter ticks its delay and sound timers once per executed
//! instruction, so the rate at which a front-end calls `Interpreter::step`
//! decides how fast those timers run.  This clock converts elapsed wall time
//! into a number of ticks at a fixed frequency, which a front-end can use as
//! the number of steps to run.

use std::num::Wrapping;

use time;

/// A basic timer.
#[derive(Debug)]
pub struct Timer {
    /// The frequency at which to run the timer, in Hz.
    frequency: u32,
    /// An internal number of ticks.
    ticks: Wrapping<u32>,
}

impl Timer {
    /// Returns a new timer running at the given frequency.
    pub fn new(frequency: u32) -> Self {
        let mut timer = Timer {
            frequency,
            ticks: Wrapping(0),
        };
        timer.update();
        timer
    }

    /// Returns the number of ticks which have elapsed since the last call to
    /// this method (or the creation of the timer).
    pub fn lap(&mut self) -> u32 {
        let old = self.ticks;
        self.update();
        (self.ticks - old).0
    }

    /// Updates the internal tick count from the monotonic clock.
    fn update(&mut self) {
        let ns = time::precise_time_ns() as u128;
        self.ticks = Wrapping((ns * self.frequency as u128 / 1_000_000_000) as u32);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn lap_counts_elapsed_ticks() {
        let mut timer = Timer::new(1000);
        thread::sleep(Duration::from_millis(20));
        let ticks = timer.lap();
        assert!(ticks >= 19, "only {} ticks elapsed", ticks);
    }

    #[test]
    fn zero_frequency_never_ticks() {
        let mut timer = Timer::new(0);
        thread::sleep(Duration::from_millis(2));
        assert_eq!(timer.lap(), 0);
    }
}
