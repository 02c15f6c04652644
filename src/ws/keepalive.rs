use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// What the driver must do on a keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Heartbeat {
    /// Send a ping and wait for the pong
    Ping,
    /// The previous ping was never answered; the transport must be terminated
    Stalled,
}

/// Ping/pong liveness monitor.
///
/// Runs only while the connection is open. A ping left unanswered for a full interval
/// marks the connection as stalled, so detection takes at most two intervals.
pub(crate) struct Keepalive {
    period: Option<Duration>,
    ticker: Option<Interval>,
    awaiting_pong: bool,
}

impl Keepalive {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period: (!period.is_zero()).then_some(period),
            ticker: None,
            awaiting_pong: false,
        }
    }

    pub(crate) fn start(&mut self) {
        self.stop();
        if let Some(period) = self.period {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
    }

    pub(crate) fn stop(&mut self) {
        self.ticker = None;
        self.awaiting_pong = false;
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.period = (!period.is_zero()).then_some(period);
    }

    pub(crate) fn pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Decides the action for the current tick and records the outstanding ping.
    pub(crate) fn beat(&mut self) -> Heartbeat {
        if self.awaiting_pong {
            Heartbeat::Stalled
        } else {
            self.awaiting_pong = true;
            Heartbeat::Ping
        }
    }

    /// Completes on the next tick; never completes while stopped.
    pub(crate) async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unanswered_ping_is_stalled() {
        let mut keepalive = Keepalive::new(Duration::from_millis(50));
        keepalive.start();

        assert_eq!(keepalive.beat(), Heartbeat::Ping);
        assert_eq!(keepalive.beat(), Heartbeat::Stalled);
    }

    #[tokio::test]
    async fn pong_clears_outstanding_ping() {
        let mut keepalive = Keepalive::new(Duration::from_millis(50));
        keepalive.start();

        assert_eq!(keepalive.beat(), Heartbeat::Ping);
        keepalive.pong_received();
        assert_eq!(keepalive.beat(), Heartbeat::Ping);
    }

    #[tokio::test]
    async fn stop_resets_outstanding_ping() {
        let mut keepalive = Keepalive::new(Duration::from_millis(50));
        keepalive.start();
        keepalive.beat();

        keepalive.stop();
        keepalive.start();

        assert_eq!(keepalive.beat(), Heartbeat::Ping);
    }

    #[test]
    fn zero_period_never_runs() {
        let mut keepalive = Keepalive::new(Duration::ZERO);
        keepalive.start();

        assert!(!keepalive.is_running(), "keepalive should be disabled");
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let mut keepalive = Keepalive::new(Duration::from_millis(50));
        keepalive.start();
        let started = Instant::now();

        keepalive.tick().await;

        assert!(started.elapsed() >= Duration::from_millis(50), "ticked early");
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_keepalive_never_ticks() {
        let mut keepalive = Keepalive::new(Duration::from_millis(50));

        let ticked = tokio::time::timeout(Duration::from_secs(1), keepalive.tick()).await;

        assert!(ticked.is_err(), "stopped keepalive must not tick");
    }
}
