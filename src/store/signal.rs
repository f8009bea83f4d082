//! Observable cells for push-based store state.
//!
//! Each store exposes a small set of cells (`loading`, `error`,
//! `initialized`). Writing a cell synchronously notifies every current
//! subscriber, in subscription order; there is no batching window across
//! cells, only the per-cell ordering guarantee. Subscribers get an
//! unsubscribe handle and are responsible for dropping it on teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
  value: Mutex<T>,
  subscribers: Mutex<Vec<(u64, Callback<T>)>>,
  next_id: AtomicU64,
}

/// An observable cell holding one value.
pub struct Signal<T> {
  inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Clone + Send + 'static> Signal<T> {
  pub fn new(initial: T) -> Self {
    Self {
      inner: Arc::new(SignalInner {
        value: Mutex::new(initial),
        subscribers: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  /// Snapshot of the current value.
  pub fn get(&self) -> T {
    self.inner.value.lock().expect("signal lock poisoned").clone()
  }

  /// Replace the value and synchronously notify every current subscriber.
  pub fn set(&self, value: T) {
    {
      let mut guard = self.inner.value.lock().expect("signal lock poisoned");
      *guard = value.clone();
    }

    // Snapshot the callbacks so a subscriber may subscribe or unsubscribe
    // from within its own notification without deadlocking
    let callbacks: Vec<Callback<T>> = {
      let subscribers = self
        .inner
        .subscribers
        .lock()
        .expect("signal lock poisoned");
      subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    };

    for callback in callbacks {
      callback(&value);
    }
  }

  /// Register a callback invoked on every subsequent `set`. The returned
  /// handle unsubscribes when dropped or when `unsubscribe` is called.
  pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .inner
      .subscribers
      .lock()
      .expect("signal lock poisoned")
      .push((id, Arc::new(callback)));

    Subscription {
      id,
      inner: Arc::downgrade(&self.inner),
    }
  }
}

/// Handle to an active subscription.
pub struct Subscription<T> {
  id: u64,
  inner: Weak<SignalInner<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
  /// Explicitly remove the subscription. Equivalent to dropping the handle.
  pub fn unsubscribe(self) {
    // Drop runs the removal
  }
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.upgrade() {
      let mut subscribers = inner.subscribers.lock().expect("signal lock poisoned");
      subscribers.retain(|(sub_id, _)| *sub_id != self.id);
    }
  }
}

/// The reactive surface every store exposes.
#[derive(Clone)]
pub struct StoreSignals {
  pub loading: Signal<bool>,
  pub error: Signal<Option<String>>,
  pub initialized: Signal<bool>,
}

impl StoreSignals {
  pub fn new() -> Self {
    Self {
      loading: Signal::new(false),
      error: Signal::new(None),
      initialized: Signal::new(false),
    }
  }
}

impl Default for StoreSignals {
  fn default() -> Self {
    Self::new()
  }
}
