//! Supervised feed consumption
//!
//! Every feed (candles, mark price, user events) runs inside [`FeedLoop`]:
//! subscribe, hand each event to the controller in arrival order, and on any
//! transport drop or watchdog expiry subscribe again after an exponential
//! backoff. Errors and panics raised by a handler are contained at this
//! boundary and followed by a cooldown, so one feed never takes down the
//! controller or its sibling feeds.
//!
//! Shutdown is cooperative: it is observed while waiting for the next event
//! or sleeping, never in the middle of a handler, so an order submission that
//! already started is allowed to finish.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::common::errors::Result;
use crate::config::types::AppSettings;

/// Exponential reconnect backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
        }
    }

    /// Delay to use after `current` failed again
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// Why a subscription stopped delivering events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Closed,
    Stale,
}

/// One supervised, reconnecting feed
pub struct FeedLoop {
    name: &'static str,
    policy: ReconnectPolicy,
    watchdog: Option<Duration>,
    cooldown: Duration,
    shutdown: watch::Receiver<bool>,
}

impl FeedLoop {
    pub fn new(name: &'static str, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            name,
            policy: ReconnectPolicy::default(),
            watchdog: None,
            cooldown: Duration::from_secs(5),
            shutdown,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Treat the feed as stale after this much silence
    pub fn with_watchdog(mut self, watchdog: Option<Duration>) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Pause after a handler failure
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Run until shutdown is signalled
    ///
    /// `subscribe` opens a fresh connection each time it is called; `handle`
    /// processes one event.
    pub async fn run<T, S, SF, H, HF>(self, mut subscribe: S, mut handle: H)
    where
        S: FnMut() -> SF,
        SF: Future<Output = Result<mpsc::Receiver<T>>>,
        H: FnMut(T) -> HF,
        HF: Future<Output = Result<()>>,
    {
        let FeedLoop {
            name,
            policy,
            watchdog,
            cooldown,
            mut shutdown,
        } = self;
        let mut delay = policy.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            let subscription = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                result = subscribe() => result,
            };

            match subscription {
                Ok(mut events) => {
                    info!(feed = name, "Feed subscribed");
                    attempt = 0;
                    delay = policy.initial_delay;

                    let end = consume(
                        name,
                        &mut events,
                        &mut handle,
                        watchdog,
                        cooldown,
                        &mut shutdown,
                    )
                    .await;
                    match end {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Closed => warn!(feed = name, "Feed connection closed"),
                        StreamEnd::Stale => warn!(
                            feed = name,
                            silence = ?watchdog,
                            "Feed silent past watchdog, forcing reconnect"
                        ),
                    }
                }
                Err(e) => {
                    attempt += 1;
                    warn!(feed = name, attempt, error = %e, "Feed subscription failed");
                }
            }

            debug!(feed = name, ?delay, "Reconnecting after backoff");
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = sleep(delay) => {}
            }
            if attempt > 0 {
                delay = policy.next_delay(delay);
            }
        }

        info!(feed = name, "Feed loop stopped");
    }
}

async fn consume<T, H, HF>(
    name: &'static str,
    events: &mut mpsc::Receiver<T>,
    handle: &mut H,
    watchdog: Option<Duration>,
    cooldown: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd
where
    H: FnMut(T) -> HF,
    HF: Future<Output = Result<()>>,
{
    loop {
        let next = tokio::select! {
            _ = shutdown_signalled(shutdown) => return StreamEnd::Shutdown,
            next = recv_with_watchdog(events, watchdog) => next,
        };

        let event = match next {
            Some(Some(event)) => event,
            Some(None) => return StreamEnd::Closed,
            None => return StreamEnd::Stale,
        };

        if !run_guarded(name, handle(event)).await {
            tokio::select! {
                _ = shutdown_signalled(shutdown) => return StreamEnd::Shutdown,
                _ = sleep(cooldown) => {}
            }
        }
    }
}

/// `None` when the watchdog fired, `Some(None)` when the stream closed
async fn recv_with_watchdog<T>(
    events: &mut mpsc::Receiver<T>,
    watchdog: Option<Duration>,
) -> Option<Option<T>> {
    match watchdog {
        Some(window) => timeout(window, events.recv()).await.ok(),
        None => Some(events.recv().await),
    }
}

/// Await a handler, containing errors and panics; returns false on failure
pub(crate) async fn run_guarded<F>(name: &'static str, work: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(feed = name, error = %e, kind = ?e.kind(), "Handler failed, cooling down");
            false
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(feed = name, panic = %message, "Handler panicked, cooling down");
            false
        }
    }
}

/// Resolves once shutdown is requested or the controller is gone
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Run `work` every `period` until shutdown, with the same failure handling
/// as feed handlers
pub async fn run_periodic<W, WF>(
    name: &'static str,
    period: Duration,
    cooldown: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut work: W,
) where
    W: FnMut() -> WF,
    WF: Future<Output = Result<()>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so work starts one period in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        if !run_guarded(name, work()).await {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = sleep(cooldown) => {}
            }
        }
    }

    info!(task = name, "Periodic task stopped");
}

/// Length of a candle interval such as `1m`, `4h` or `1d`
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let unit = timeframe.chars().last()?;
    let count: u64 = timeframe[..timeframe.len() - unit.len_utf8()].parse().ok()?;
    if count == 0 {
        return None;
    }
    let seconds = match unit {
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return None,
    };
    Some(Duration::from_secs(count * seconds))
}
