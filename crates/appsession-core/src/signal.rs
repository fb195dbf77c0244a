//! Change notifications for a watched file.
//!
//! Whatever watches the file calls `emit` from its own thread; subscribers
//! must only hand the notification off (e.g. post to a channel).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
pub struct FileChangeSignal {
    name: Arc<str>,
    inner: Arc<Mutex<SignalInner>>,
}

#[derive(Default)]
struct SignalInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, ChangeCallback)>,
}

impl FileChangeSignal {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscription. Returns false if it was not connected.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub, _)| *sub != id);
        before != inner.subscribers.len()
    }

    /// Invokes every subscriber on the calling thread.
    pub fn emit(&self) {
        // Call outside the lock so a callback may connect/disconnect.
        let callbacks: Vec<ChangeCallback> = self
            .lock()
            .subscribers
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        trace!(signal = %self.name, subscribers = callbacks.len(), "File changed");
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, SignalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FileChangeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChangeSignal")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_emit_reaches_connected_subscribers() {
        let signal = FileChangeSignal::new("source");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        signal.connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit();
        signal.emit();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let signal = FileChangeSignal::new("secrets");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = signal.connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_from_other_thread() {
        let signal = FileChangeSignal::new("source");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        signal.connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let remote = signal.clone();
        std::thread::spawn(move || remote.emit()).join().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
