use std::pin::Pin;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::time::{Sleep, sleep};

use super::config::ReconnectConfig;

/// Schedules at most one reconnect attempt at a time.
///
/// Every scheduled delay lies within `[min_delay, max_delay]`; the underlying interval
/// grows by [`super::config::BACKOFF_MULTIPLIER`] per scheduled attempt and falls back
/// to `min_delay` on [`ReconnectScheduler::reset`].
pub(crate) struct ReconnectScheduler {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            backoff: config.into(),
            timer: None,
        }
    }

    /// Arms the reconnect timer, replacing any pending one, and returns the chosen delay.
    pub(crate) fn schedule(&mut self) -> Duration {
        let delay = self.next_delay();
        self.timer = Some(Box::pin(sleep(delay)));
        delay
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        self.backoff
            .next_backoff()
            .unwrap_or(self.config.max_delay)
            .clamp(self.config.min_delay, self.config.max_delay)
    }

    pub(crate) fn cancel(&mut self) {
        self.timer = None;
    }

    pub(crate) fn reset(&mut self) {
        self.backoff.reset();
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    /// Applies new bounds; the next delay starts again from `min_delay`.
    pub(crate) fn reconfigure(&mut self, config: ReconnectConfig) {
        self.config = config;
        self.backoff = config.into();
    }

    /// Completes when the armed timer fires; never completes while nothing is scheduled.
    pub(crate) async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.await;
                self.timer = None;
            }
            None => std::future::pending().await,
        }
    }
}
