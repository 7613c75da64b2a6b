//! Limit operators.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

use super::operators::{spawn_timer, LimitOperator, PreparedLimit};
use super::signal::Signal;
use crate::channel::{ChannelRef, Subscriber, SubscriberRef, SubscriptionId};
use crate::gate::lock_unpoisoned;

/// Reaches the limit as soon as it is started.
#[derive(Debug, Default)]
pub struct ImmediateLimit {
    reached: Signal<()>,
}

impl ImmediateLimit {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LimitOperator for ImmediateLimit {
    fn prepare_limit(&mut self) -> PreparedLimit {
        PreparedLimit {
            start_limit: self.reached.slot(),
            limit_reached: self.reached.clone(),
            limit_updated: None,
            limit_max: 0,
        }
    }
}

/// Reached only on request, by [`ManualLimit::reach`] or by skipping the limit.
#[derive(Debug, Default)]
pub struct ManualLimit {
    reached: Signal<()>,
}

impl ManualLimit {
    /// Create the operator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the limit as reached.
    pub fn reach(&self) {
        self.reached.emit(());
    }

    /// A handle that reaches the limit, usable from other tasks.
    pub fn reacher(&self) -> Signal<()> {
        self.reached.clone()
    }
}

impl LimitOperator for ManualLimit {
    fn prepare_limit(&mut self) -> PreparedLimit {
        PreparedLimit {
            start_limit: Arc::new(|()| {}),
            limit_reached: self.reached.clone(),
            limit_updated: None,
            limit_max: 0,
        }
    }
}

/// Reaches the limit after a number of seconds, reporting elapsed seconds every second.
#[derive(Debug)]
pub struct TimeLimit {
    seconds: u64,
    reached: Signal<()>,
    updated: Signal<u64>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimeLimit {
    /// Reach the limit `seconds` after every start.
    pub fn new(seconds: u64) -> Self {
        Self {
            seconds,
            reached: Signal::new(),
            updated: Signal::new(),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    fn cancel(ticker: &Mutex<Option<JoinHandle<()>>>) {
        if let Some(task) = lock_unpoisoned(ticker).take() {
            task.abort();
        }
    }
}

impl LimitOperator for TimeLimit {
    fn prepare_limit(&mut self) -> PreparedLimit {
        // A skipped limit stops the ticker as well.
        let ticker = self.ticker.clone();
        self.reached.connect(move |()| TimeLimit::cancel(&ticker));

        let seconds = self.seconds;
        let reached = self.reached.clone();
        let updated = self.updated.clone();
        let ticker = self.ticker.clone();

        PreparedLimit {
            start_limit: Arc::new(move |()| {
                let reached = reached.clone();
                let updated = updated.clone();
                let task = spawn_timer("time_limit", async move {
                    let started = Instant::now();
                    let period = Duration::from_secs(1);
                    let mut ticks = interval_at(started + period, period);
                    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticks.tick().await;
                        let elapsed = started.elapsed().as_secs_f64().round() as u64;
                        updated.emit(elapsed);
                        if elapsed >= seconds {
                            reached.emit(());
                            break;
                        }
                    }
                });

                if let Some(previous) = std::mem::replace(&mut *lock_unpoisoned(&ticker), task) {
                    previous.abort();
                }
            }),
            limit_reached: self.reached.clone(),
            limit_updated: Some(self.updated.clone()),
            limit_max: self.seconds,
        }
    }

    fn finalize_limit(&mut self) {
        TimeLimit::cancel(&self.ticker);
    }
}

#[derive(Debug)]
struct RowCounter {
    rows: u64,
    armed: AtomicBool,
    counted: AtomicU64,
    reached: Signal<()>,
    updated: Signal<u64>,
}

impl Subscriber for Arc<RowCounter> {
    fn data_set(&mut self, _data: &[f64]) {}

    fn data_added(&mut self, data: &[f64]) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }

        let counted = self.counted.fetch_add(data.len() as u64, Ordering::SeqCst) + data.len() as u64;
        self.updated.emit(counted.min(self.rows));
        if counted >= self.rows {
            self.armed.store(false, Ordering::SeqCst);
            self.counted.store(0, Ordering::SeqCst);
            self.reached.emit(());
        }
    }

    fn data_cleared(&mut self) {
        self.counted.store(0, Ordering::SeqCst);
    }
}

/// Reaches the limit once a channel received a number of samples since the start.
#[derive(Debug)]
pub struct CountLimit {
    channel: ChannelRef,
    counter: Arc<RowCounter>,
    subscription: Option<SubscriptionId>,
}

impl CountLimit {
    /// Count samples added to `channel` until `rows` is reached.
    pub fn new(channel: ChannelRef, rows: u64) -> Self {
        Self {
            channel,
            counter: Arc::new(RowCounter {
                rows,
                armed: AtomicBool::new(false),
                counted: AtomicU64::new(0),
                reached: Signal::new(),
                updated: Signal::new(),
            }),
            subscription: None,
        }
    }
}

impl LimitOperator for CountLimit {
    fn prepare_limit(&mut self) -> PreparedLimit {
        let subscriber: SubscriberRef = Rc::new(RefCell::new(self.counter.clone()));
        let subscribed = self
            .channel
            .try_borrow_mut()
            .map_err(|err| err.to_string())
            .and_then(|mut channel| channel.subscribe(subscriber).map_err(|err| err.to_string()));
        match subscribed {
            Ok(id) => self.subscription = Some(id),
            Err(err) => warn!(error = %err, "count limit could not subscribe, limit will not be reached"),
        }

        let counter = self.counter.clone();
        PreparedLimit {
            start_limit: Arc::new(move |()| {
                counter.counted.store(0, Ordering::SeqCst);
                counter.armed.store(true, Ordering::SeqCst);
            }),
            limit_reached: self.counter.reached.clone(),
            limit_updated: Some(self.counter.updated.clone()),
            limit_max: self.counter.rows,
        }
    }

    fn finalize_limit(&mut self) {
        self.counter.armed.store(false, Ordering::SeqCst);
        let Some(id) = self.subscription.take() else {
            return;
        };
        match self.channel.try_borrow_mut() {
            Ok(mut channel) => {
                channel.unsubscribe(id);
            }
            Err(_) => warn!("channel busy, count limit subscription left in place"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelOptions, StreamChannel};
    use std::sync::atomic::AtomicUsize;

    fn counter(signal: &Signal<()>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        signal.connect(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn immediate_limit_is_reached_on_start() {
        let limit = ImmediateLimit::new().prepare_limit();
        let reached = counter(&limit.limit_reached);
        (limit.start_limit)(());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(limit.limit_max, 0);
    }

    #[test]
    fn manual_limit_waits_for_reach() {
        let mut op = ManualLimit::new();
        let limit = op.prepare_limit();
        let reached = counter(&limit.limit_reached);
        (limit.start_limit)(());
        assert_eq!(reached.load(Ordering::SeqCst), 0);
        op.reach();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_ticks_every_second() {
        let mut op = TimeLimit::new(3);
        let limit = op.prepare_limit();
        assert_eq!(limit.limit_max, 3);
        let reached = counter(&limit.limit_reached);
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        limit
            .limit_updated
            .as_ref()
            .unwrap()
            .connect(move |s| sink.lock().unwrap().push(s));

        (limit.start_limit)(());
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(*ticks.lock().unwrap(), [1, 2, 3]);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        op.finalize_limit();
    }

    #[tokio::test(start_paused = true)]
    async fn skipping_a_time_limit_stops_the_ticker() {
        let mut op = TimeLimit::new(10);
        let limit = op.prepare_limit();
        let reached = counter(&limit.limit_reached);

        (limit.start_limit)(());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        limit.limit_reached.emit(());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn count_limit_counts_only_while_armed() {
        let channel = StreamChannel::shared("det", ChannelOptions::default());
        let mut op = CountLimit::new(channel.clone(), 4);
        let limit = op.prepare_limit();
        let reached = counter(&limit.limit_reached);
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        limit
            .limit_updated
            .as_ref()
            .unwrap()
            .connect(move |n| sink.lock().unwrap().push(n));

        channel.borrow_mut().add_samples(&[1.0, 2.0]);
        assert!(progress.lock().unwrap().is_empty());

        (limit.start_limit)(());
        channel.borrow_mut().add_samples(&[1.0, 2.0, 3.0]);
        channel.borrow_mut().add_samples(&[4.0, 5.0]);
        channel.borrow_mut().add_data(6.0);

        assert_eq!(*progress.lock().unwrap(), [3, 4]);
        assert_eq!(reached.load(Ordering::SeqCst), 1);

        op.finalize_limit();
        (limit.start_limit)(());
        channel.borrow_mut().add_samples(&[0.0; 8]);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
