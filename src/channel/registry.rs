//! Table of open channels.
//!
//! Channel names are unique within a registry. Watchers are told about every open and
//! close so that consumers such as displays can attach to new streams as they appear.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::stream::{ChannelOptions, ChannelRef, StreamChannel};
use super::{Frequency, Hint, SharedChannel};
use crate::error::{AppResult, DaqError};

/// Change notification sent to registry watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A channel was opened.
    Opened {
        /// Channel name.
        name: String,
        /// Display hint at open time.
        hint: Hint,
        /// Sampling class at open time.
        frequency: Frequency,
    },
    /// A channel was closed.
    Closed {
        /// Channel name.
        name: String,
    },
}

/// Identifies a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

type Watcher = Rc<dyn Fn(&RegistryEvent)>;

#[derive(Default)]
struct RegistryInner {
    channels: BTreeMap<String, ChannelRef>,
    watchers: Vec<(WatchId, Watcher)>,
    next_watch: u64,
}

/// Shared table of named stream channels.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel under a unique name.
    ///
    /// # Errors
    ///
    /// [`DaqError::NameInUse`] if a channel with this name is already open.
    pub fn open(&self, name: &str, options: ChannelOptions) -> AppResult<ChannelRef> {
        let (hint, frequency) = (options.hint, options.frequency);
        let channel = {
            let mut inner = self.inner.borrow_mut();
            if inner.channels.contains_key(name) {
                return Err(DaqError::NameInUse(name.to_string()));
            }
            let channel = StreamChannel::shared(name, options);
            inner.channels.insert(name.to_string(), channel.clone());
            channel
        };

        debug!(channel = name, %hint, %frequency, "channel opened");
        self.notify(&RegistryEvent::Opened {
            name: name.to_string(),
            hint,
            frequency,
        });
        Ok(channel)
    }

    /// Look up an open channel.
    pub fn get(&self, name: &str) -> AppResult<ChannelRef> {
        self.inner
            .borrow()
            .channels
            .get(name)
            .cloned()
            .ok_or_else(|| DaqError::UnknownChannel(name.to_string()))
    }

    /// Every open channel, ordered by name.
    pub fn all(&self) -> Vec<ChannelRef> {
        self.inner.borrow().channels.values().cloned().collect()
    }

    /// Every open channel as a lifecycle handle, ready for a measurement.
    pub fn shared(&self) -> Vec<SharedChannel> {
        self.all()
            .into_iter()
            .map(|channel| channel as SharedChannel)
            .collect()
    }

    /// Names of every open channel, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().channels.keys().cloned().collect()
    }

    /// Channels matching the given hint and frequency. `None` matches anything.
    pub fn query(&self, hint: Option<Hint>, frequency: Option<Frequency>) -> Vec<ChannelRef> {
        self.inner
            .borrow()
            .channels
            .values()
            .filter(|channel| {
                let channel = channel.borrow();
                hint.map_or(true, |hint| channel.hint() == hint)
                    && frequency.map_or(true, |frequency| channel.frequency() == frequency)
            })
            .cloned()
            .collect()
    }

    /// Close a channel and remove it from the table.
    ///
    /// Channels computed from it keep their reference until they close too.
    pub fn close(&self, name: &str) -> AppResult<()> {
        let channel = self
            .inner
            .borrow_mut()
            .channels
            .remove(name)
            .ok_or_else(|| DaqError::UnknownChannel(name.to_string()))?;
        channel.borrow_mut().close();

        debug!(channel = name, "channel closed");
        self.notify(&RegistryEvent::Closed {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Register a watcher for open and close events.
    pub fn watch(&self, watcher: impl Fn(&RegistryEvent) + 'static) -> WatchId {
        let mut inner = self.inner.borrow_mut();
        let id = WatchId(inner.next_watch);
        inner.next_watch += 1;
        inner.watchers.push((id, Rc::new(watcher)));
        id
    }

    /// Remove a watcher. Returns false for unknown ids.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.watchers.len();
        inner.watchers.retain(|(watch, _)| *watch != id);
        inner.watchers.len() != before
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.inner.borrow().channels.len()
    }

    /// Whether no channel is open.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().channels.is_empty()
    }

    fn notify(&self, event: &RegistryEvent) {
        // Watchers may open or close channels themselves.
        let watchers: Vec<Watcher> = self
            .inner
            .borrow()
            .watchers
            .iter()
            .map(|(_, watcher)| watcher.clone())
            .collect();
        for watcher in watchers {
            watcher(event);
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, Subscriber};

    struct Null;

    impl Subscriber for Null {
        fn data_set(&mut self, _data: &[f64]) {}
        fn data_added(&mut self, _data: &[f64]) {}
        fn data_cleared(&mut self) {}
    }

    #[test]
    fn names_are_unique() {
        let registry = ChannelRegistry::new();
        registry.open("det", ChannelOptions::default()).unwrap();
        assert!(matches!(
            registry.open("det", ChannelOptions::default()),
            Err(DaqError::NameInUse(name)) if name == "det"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn query_filters_by_hint_and_frequency() {
        let registry = ChannelRegistry::new();
        registry.open("trace", ChannelOptions::default()).unwrap();
        registry
            .open(
                "level",
                ChannelOptions::default()
                    .with_hint(Hint::Indicator)
                    .with_frequency(Frequency::Step),
            )
            .unwrap();
        registry
            .open("hist", ChannelOptions::default().with_hint(Hint::Histogram))
            .unwrap();

        let names = |channels: Vec<ChannelRef>| -> Vec<String> {
            channels.iter().map(|c| c.borrow().name().to_string()).collect()
        };
        assert_eq!(names(registry.query(None, Some(Frequency::Continuous))), ["hist", "trace"]);
        assert_eq!(names(registry.query(Some(Hint::Indicator), None)), ["level"]);
        assert_eq!(registry.query(None, None).len(), 3);
    }

    #[test]
    fn watchers_hear_open_and_close() {
        let registry = ChannelRegistry::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let id = registry.watch(move |event| sink.borrow_mut().push(event.clone()));

        registry.open("det", ChannelOptions::default()).unwrap();
        registry.close("det").unwrap();
        assert!(registry.unwatch(id));
        registry.open("other", ChannelOptions::default()).unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                RegistryEvent::Opened {
                    name: "det".into(),
                    hint: Hint::Waveform,
                    frequency: Frequency::Continuous,
                },
                RegistryEvent::Closed { name: "det".into() },
            ]
        );
    }

    #[test]
    fn closed_channels_refuse_subscribers_and_free_their_name() {
        let registry = ChannelRegistry::new();
        let det = registry.open("det", ChannelOptions::default()).unwrap();
        registry.close("det").unwrap();

        assert!(det.borrow().is_closed());
        assert!(matches!(
            det.borrow_mut().subscribe(Rc::new(RefCell::new(Null))),
            Err(DaqError::ChannelClosed(_))
        ));
        assert!(matches!(registry.get("det"), Err(DaqError::UnknownChannel(_))));
        assert!(matches!(registry.close("det"), Err(DaqError::UnknownChannel(_))));
        registry.open("det", ChannelOptions::default()).unwrap();
    }
}
