//! A non-blocking timer that drives fixed-delay or exponential-backoff
//! retry, shared by [`crate::messaging_core`] and [`crate::mqttsn::client`].
//!
//! It does not contain the work to be retried -- only the bookkeeping for
//! "when should the next attempt happen, and how many are left".

use rand::{Rng, SeedableRng};

use crate::time::{Clock, Deadline, Millis};

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Strategy to employ when retrying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
  /// Pick a random initial delay in `[init_min, init_max]`, doubling after
  /// each failed attempt.
  Exponential {
    /// Minimum (inclusive) delay before the second attempt.
    init_min: Millis,
    /// Maximum (inclusive) delay before the second attempt.
    init_max: Millis,
  },
  /// Pick a random delay in `[min, max]` and use it, unscaled, between every
  /// attempt.
  Delay {
    /// Minimum (inclusive) delay.
    min: Millis,
    /// Maximum (inclusive) delay.
    max: Millis,
  },
}

impl Strategy {
  fn range(&self) -> (Millis, Millis) {
    match *self {
      | Self::Delay { min, max } => (min, max),
      | Self::Exponential { init_min, init_max } => (init_min, init_max),
    }
  }

  fn has_jitter(&self) -> bool {
    let (min, max) = self.range();
    min != max
  }

  /// Total delay since the first attempt once `attempt` attempts have been
  /// made, for the exponential strategy.
  const fn total_delay_exp(init: Millis, attempt: u16) -> Millis {
    // attempt 1 -> init, attempt 2 -> init*2, attempt 3 -> init*4, ...
    init * 2u64.pow((attempt - 1) as u32)
  }

  /// The worst-case total elapsed time if every one of `attempts` attempts
  /// fails.
  pub fn max_time(&self, attempts: Attempts) -> Millis {
    match self {
      | Self::Exponential { init_max, .. } => Self::total_delay_exp(*init_max, attempts.0),
      | Self::Delay { max, .. } => max * attempts.0 as u64,
    }
  }
}

/// Whether a retry should be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouShould {
  /// Attempts have been exhausted; the retried operation should be
  /// considered failed.
  Cry,
  /// A retry should be performed.
  Retry,
}

/// A retry timer bound to one in-flight operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Deadline,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  /// Create a new retry timer, starting now.
  pub fn new(clock: &impl Clock, strategy: Strategy, max_attempts: Attempts) -> Self {
    let start = clock.now_ms();
    let init = if strategy.has_jitter() {
      let (min, max) = strategy.range();
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(start ^ min ^ max);
      rng.gen_range(min..=max)
    } else {
      strategy.range().0
    };

    Self { start, init, strategy, max_attempts, attempts: Attempts(1) }
  }

  /// The initial (first) delay chosen for this timer, before any doubling.
  pub fn initial_delay(&self) -> Millis {
    self.init
  }

  /// How many attempts have been made (including the first send).
  pub fn attempts_made(&self) -> Attempts {
    self.attempts
  }

  fn is_ready(&self, elapsed: Millis, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => elapsed >= self.init * attempts as u64,
      | Strategy::Exponential { .. } => elapsed >= Strategy::total_delay_exp(self.init, attempts),
    }
  }

  /// Ask the timer what to do given the current time.
  ///
  /// Returns `None` when it is not yet time to retry (the caller should
  /// check again on a later tick).
  pub fn what_should_i_do(&mut self, now: Deadline) -> Option<YouShould> {
    if self.attempts >= self.max_attempts {
      return Some(YouShould::Cry);
    }

    let elapsed = now.saturating_sub(self.start);
    if self.is_ready(elapsed, self.attempts.0) {
      self.attempts.0 += 1;
      Some(YouShould::Retry)
    } else {
      None
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::time::test::FakeClock;

  #[test]
  fn delay_retrier() {
    let clock = FakeClock::new();
    let mut retry = RetryTimer::new(&clock,
                                    Strategy::Delay { min: 1000, max: 1000 },
                                    Attempts(5));

    clock.set(999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(1000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(1999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(2000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(10_000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Cry));
  }

  #[test]
  fn exponential_retrier() {
    let clock = FakeClock::new();
    let mut retry = RetryTimer::new(&clock,
                                    Strategy::Exponential { init_min: 1000, init_max: 1000 },
                                    Attempts(6));

    clock.set(999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(1000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(1999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(2000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(3999);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), None);

    clock.set(4000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(8_000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    clock.set(16_000);
    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Retry));

    assert_eq!(retry.what_should_i_do(clock.now_ms()), Some(YouShould::Cry));
  }

  #[test]
  fn exp_calculation() {
    assert_eq!(Strategy::total_delay_exp(100, 1), 100);
    assert_eq!(Strategy::total_delay_exp(100, 2), 200);
    assert_eq!(Strategy::total_delay_exp(100, 3), 400);
  }
}
