//! The key→object store backing one lifecycle within one scope.

use crate::core::{InstanceId, Object};
use crate::error::{Error, Result};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tracing::trace;

/// Deterministic teardown for services held by an object cache.
///
/// Caches call `dispose` exactly once for every object they built, when the
/// entry is ejected or the owning scope is disposed.
pub trait Disposable: Send + Sync {
  fn dispose(&self);
}

pub(crate) type Disposer = Box<dyn FnOnce() + Send>;

/// The result of one successful build, before it is cached.
pub(crate) struct Built {
  pub(crate) object: Object,
  pub(crate) disposer: Option<Disposer>,
}

impl Built {
  pub(crate) fn new(object: Object) -> Self {
    Self {
      object,
      disposer: None,
    }
  }
}

struct Entry {
  object: Object,
  disposer: Mutex<Option<Disposer>>,
  sequence: u64,
}

impl Entry {
  fn dispose(&self) {
    if let Some(disposer) = self.disposer.lock().take() {
      disposer();
    }
  }
}

type Slot = Arc<OnceCell<Entry>>;

/// A thread-safe object cache keyed by instance identity.
///
/// Hits only take the shared read lock. A miss takes an upgradable lock to
/// find or create the key's slot, releases it, and then builds inside the
/// slot's `OnceCell`, so concurrent misses on one key run exactly one build
/// while builds of other keys (including nested dependencies stored in this
/// same cache) proceed.
///
/// Once closed, a cache refuses new keys, and a build that was already
/// running when it closed is disposed instead of stored.
pub struct ObjectCache {
  label: String,
  slots: RwLock<HashMap<InstanceId, Slot>>,
  closed: AtomicBool,
  sequence: AtomicU64,
  builds: AtomicU64,
}

impl ObjectCache {
  pub fn new(label: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      slots: RwLock::new(HashMap::new()),
      closed: AtomicBool::new(false),
      sequence: AtomicU64::new(0),
      builds: AtomicU64::new(0),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// Returns the cached object for `key`, building it on a miss.
  ///
  /// A failed build leaves nothing behind; the next call builds again.
  pub(crate) fn get(&self, key: InstanceId, build: impl FnOnce() -> Result<Built>) -> Result<Object> {
    // Fast path: shared lock only.
    {
      let slots = self.slots.read();
      if let Some(entry) = slots.get(&key).and_then(|slot| slot.get()) {
        trace!(cache = %self.label, ?key, "object cache hit");
        return Ok(entry.object.clone());
      }
    }

    let slot = {
      let slots = self.slots.upgradable_read();
      if self.is_closed() {
        return Err(self.closed_error());
      }
      match slots.get(&key) {
        Some(slot) => slot.clone(),
        None => {
          let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
          slots.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        }
      }
    };

    let entry = slot.get_or_try_init(|| {
      trace!(cache = %self.label, ?key, "object cache miss, building");
      let built = build()?;
      self.builds.fetch_add(1, Ordering::Relaxed);
      Ok::<_, Error>(Entry {
        object: built.object,
        disposer: Mutex::new(built.disposer),
        sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
      })
    })?;

    // The slot may have been drained by `close` while this build ran.
    if self.is_closed() {
      entry.dispose();
      return Err(self.closed_error());
    }
    Ok(entry.object.clone())
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  fn closed_error(&self) -> Error {
    Error::ScopeDisposed {
      scope: self.label.clone(),
    }
  }

  /// Looks up a built object without building.
  pub fn peek(&self, key: InstanceId) -> Option<Object> {
    self
      .slots
      .read()
      .get(&key)
      .and_then(|slot| slot.get())
      .map(|entry| entry.object.clone())
  }

  pub fn has(&self, key: InstanceId) -> bool {
    self.peek(key).is_some()
  }

  /// Number of built objects currently held.
  pub fn len(&self) -> usize {
    self.slots.read().values().filter(|slot| slot.get().is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Total number of successful builds this cache has stored.
  pub fn build_count(&self) -> u64 {
    self.builds.load(Ordering::Relaxed)
  }

  /// Removes and disposes one entry. A missing key is a no-op.
  pub fn eject(&self, key: InstanceId) {
    let removed = self.slots.write().remove(&key);
    if let Some(entry) = removed.as_deref().and_then(|slot| slot.get()) {
      trace!(cache = %self.label, ?key, "ejecting object");
      entry.dispose();
    }
  }

  /// Ejects everything and refuses further builds.
  pub(crate) fn close(&self) {
    {
      let _slots = self.slots.write();
      self.closed.store(true, Ordering::Release);
    }
    self.eject_all();
  }

  /// Disposes and clears every entry, most recently built first.
  pub fn eject_all(&self) {
    let drained: Vec<Slot> = {
      let mut slots = self.slots.write();
      slots.drain().map(|(_, slot)| slot).collect()
    };

    let mut entries: Vec<&Entry> = drained.iter().filter_map(|slot| slot.get()).collect();
    entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    if !entries.is_empty() {
      trace!(cache = %self.label, count = entries.len(), "ejecting all objects");
    }
    for entry in entries {
      entry.dispose();
    }
  }
}

impl fmt::Debug for ObjectCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ObjectCache")
      .field("label", &self.label)
      .field("len", &self.len())
      .finish()
  }
}
