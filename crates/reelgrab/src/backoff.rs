// Pauses between engine reload tries.
//
// Only engine reloads back off. A failed fetch fails the attempt and the job
// queue decides whether the job gets another turn.

use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// How `TranscodeAdapter::restart` paces reloads of a failing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadBackoff {
    /// Reload tries after the first failed one.
    pub retries: u32,
    /// Pause after the first failed reload. Each later pause is twice the previous one.
    pub initial_delay: Duration,
    /// No pause is longer than this, spread included.
    pub max_delay: Duration,
    /// Random extra wait of up to this percentage of the pause.
    pub spread_percent: u8,
}

impl Default for ReloadBackoff {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            spread_percent: 20,
        }
    }
}

impl ReloadBackoff {
    /// One pause per permitted reload retry, in order.
    ///
    /// Running out of pauses means the engine stays down.
    pub fn pauses(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial_delay.min(self.max_delay);
        (0..self.retries).map(move |_| {
            let pause = next;
            next = next.saturating_mul(2).min(self.max_delay);
            self.spread(pause)
        })
    }

    fn spread(&self, pause: Duration) -> Duration {
        let percent = u32::from(self.spread_percent.min(100));
        let limit_ms = u64::try_from((pause.saturating_mul(percent) / 100).as_millis())
            .unwrap_or(u64::MAX);
        if limit_ms == 0 {
            return pause;
        }
        let extra = Duration::from_millis(rand::rng().random_range(0..=limit_ms));
        (pause + extra).min(self.max_delay)
    }
}
