use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// What paces detection iterations.
#[derive(Debug, Clone)]
pub enum Pacing {
    /// Fixed period; used when no display drives the loop.
    Timer(Duration),
    /// One iteration per display refresh, signalled through `notify_one`.
    Display(Arc<Notify>),
}

/// Shortest timer period; `interval` rejects a zero period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl Pacing {
    /// Rates are clamped to 1 Hz ..= 1 kHz.
    pub fn from_refresh_hz(hz: f64) -> Self {
        Pacing::Timer(Duration::from_secs_f64(1.0 / hz.max(1.0)).max(MIN_PERIOD))
    }

    pub(crate) fn ticker(&self) -> Ticker {
        match self {
            Pacing::Timer(period) => {
                let mut ticker = interval((*period).max(MIN_PERIOD));
                // A slow detect postpones the next frame rather than bursting.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Ticker::Timer(ticker)
            }
            Pacing::Display(signal) => Ticker::Display(Arc::clone(signal)),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::from_refresh_hz(30.0)
    }
}

pub(crate) enum Ticker {
    Timer(Interval),
    Display(Arc<Notify>),
}

impl Ticker {
    pub(crate) async fn tick(&mut self) {
        match self {
            Ticker::Timer(interval) => {
                interval.tick().await;
            }
            Ticker::Display(signal) => signal.notified().await,
        }
    }
}
