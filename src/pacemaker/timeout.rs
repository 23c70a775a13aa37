/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! View timeout calculation.

use std::time::Duration;

/// Computes how long the pacemaker waits in a view before timing out.
pub trait TimeoutCalculator: Send {
    /// The timeout of a view entered after `consecutive_timeouts` views in a row ended in a timeout.
    fn timeout(&self, consecutive_timeouts: u32) -> Duration;
}

/// `base * rate^min(consecutive_timeouts, max_exponent)`.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialTimeoutCalculator {
    base: Duration,
    rate: f64,
    max_exponent: u32,
}

impl ExponentialTimeoutCalculator {
    /// A `rate` below 1.0 (or NaN) is raised to 1.0, so that timeouts never shrink as views keep failing.
    pub fn new(base: Duration, rate: f64, max_exponent: u32) -> Self {
        let rate = if rate >= 1.0 {
            rate
        } else {
            log::warn!("Timeout rate {} is below 1.0, using 1.0", rate);
            1.0
        };
        Self {
            base,
            rate,
            max_exponent,
        }
    }

    /// The largest timeout this calculator ever returns.
    pub fn max_timeout(&self) -> Duration {
        self.timeout(self.max_exponent)
    }
}

impl TimeoutCalculator for ExponentialTimeoutCalculator {
    fn timeout(&self, consecutive_timeouts: u32) -> Duration {
        let exponent = consecutive_timeouts.min(self.max_exponent);
        let factor = self.rate.powi(exponent as i32);
        Duration::try_from_secs_f64(self.base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_then_saturates() {
        let calculator = ExponentialTimeoutCalculator::new(Duration::from_millis(1000), 2.0, 3);

        assert_eq!(calculator.timeout(0), Duration::from_millis(1000));
        assert_eq!(calculator.timeout(1), Duration::from_millis(2000));
        assert_eq!(calculator.timeout(3), Duration::from_millis(8000));
        assert_eq!(calculator.timeout(30), Duration::from_millis(8000));
        assert_eq!(calculator.max_timeout(), Duration::from_millis(8000));
    }

    #[test]
    fn shrinking_rate_is_raised_to_one() {
        let calculator = ExponentialTimeoutCalculator::new(Duration::from_secs(1), 0.5, 3);
        assert_eq!(calculator.timeout(0), Duration::from_secs(1));
        assert_eq!(calculator.timeout(3), Duration::from_secs(1));

        let calculator = ExponentialTimeoutCalculator::new(Duration::from_secs(1), f64::NAN, 3);
        assert_eq!(calculator.max_timeout(), Duration::from_secs(1));
    }
}
