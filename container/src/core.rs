//! Core identity types shared by every layer of the container.

use crate::error::{Error, Result};
use crate::generic::{close_erased, ClosedGeneric, CloseFn};

use std::any::{self, Any, TypeId};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

thread_local! {
  // The chain of instances currently under construction on this thread.
  // Revisiting one of them means the configuration is circular.
  static RESOLUTION_CHAIN: RefCell<Vec<ChainLink>> = const { RefCell::new(Vec::new()) };
}

struct ChainLink {
  id: InstanceId,
  label: String,
}

/// An RAII guard that detects circular dependencies.
///
/// Entering pushes the instance onto the thread-local resolution chain and
/// fails with `Error::CircularDependency` when it is already there. Dropping
/// the guard pops it again.
pub(crate) struct ResolutionGuard {
  id: InstanceId,
}

impl ResolutionGuard {
  pub(crate) fn enter(id: InstanceId, label: impl FnOnce() -> String) -> Result<Self> {
    RESOLUTION_CHAIN.with(|chain| {
      let mut chain = chain.borrow_mut();
      if let Some(start) = chain.iter().position(|link| link.id == id) {
        let mut cycle: Vec<String> = chain[start..].iter().map(|l| l.label.clone()).collect();
        cycle.push(label());
        return Err(Error::CircularDependency { chain: cycle });
      }
      chain.push(ChainLink { id, label: label() });
      Ok(Self { id })
    })
  }
}

impl Drop for ResolutionGuard {
  fn drop(&mut self) {
    RESOLUTION_CHAIN.with(|chain| {
      let mut chain = chain.borrow_mut();
      if let Some(pos) = chain.iter().rposition(|link| link.id == self.id) {
        chain.remove(pos);
      }
    });
  }
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one registered instance. Object caches are
/// keyed by it, so two instances of the same family never collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
  pub(crate) fn next() -> Self {
    Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Debug for InstanceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "InstanceId({})", self.0)
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum TypeKey {
  Type(TypeId),
  Open(&'static str),
}

/// The generic shape of a closed generic service type.
pub struct GenericArguments {
  pub(crate) definition: &'static str,
  pub(crate) arguments: Vec<ServiceType>,
  pub(crate) close: CloseFn,
}

impl GenericArguments {
  pub fn definition(&self) -> &'static str {
    self.definition
  }

  pub fn arguments(&self) -> &[ServiceType] {
    &self.arguments
  }
}

/// The identity of a requested service contract.
///
/// Closed Rust types (including `dyn Trait` contracts) are keyed by their
/// `TypeId`. Open generic definitions are keyed by name and only ever used to
/// register families that close on demand.
#[derive(Clone)]
pub struct ServiceType {
  pub(crate) key: TypeKey,
  name: Cow<'static, str>,
  generic: Option<Arc<GenericArguments>>,
}

impl ServiceType {
  /// The service type of a closed Rust type.
  pub fn of<T: ?Sized + 'static>() -> Self {
    Self {
      key: TypeKey::Type(TypeId::of::<T>()),
      name: Cow::Borrowed(any::type_name::<T>()),
      generic: None,
    }
  }

  /// An open generic definition, e.g. `Repository<>`.
  pub fn open(definition: &'static str) -> Self {
    Self {
      key: TypeKey::Open(definition),
      name: Cow::Owned(format!("{}<>", definition)),
      generic: None,
    }
  }

  /// A closed generic type that can fall back to its open definition.
  pub fn closed<T: ?Sized + ClosedGeneric>() -> Self {
    Self {
      key: TypeKey::Type(TypeId::of::<T>()),
      name: Cow::Borrowed(any::type_name::<T>()),
      generic: Some(Arc::new(GenericArguments {
        definition: T::DEFINITION,
        arguments: T::arguments(),
        close: close_erased::<T>,
      })),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_open(&self) -> bool {
    matches!(self.key, TypeKey::Open(_))
  }

  pub fn generic(&self) -> Option<&GenericArguments> {
    self.generic.as_deref()
  }

  /// The open definition this closed type falls back to, if any.
  pub(crate) fn open_definition(&self) -> Option<ServiceType> {
    self.generic.as_ref().map(|g| ServiceType::open(g.definition))
  }
}

impl PartialEq for ServiceType {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key
  }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key.hash(state);
  }
}

impl fmt::Debug for ServiceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ServiceType({})", self.name)
  }
}

impl fmt::Display for ServiceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

/// A type-erased built service.
///
/// Holds the `Arc<S>` of the service contract `S` it was built for. Cloning
/// an `Object` clones the handle, never the service.
#[derive(Clone)]
pub struct Object {
  value: Arc<dyn Any + Send + Sync>,
  contract: TypeId,
  type_name: &'static str,
}

impl Object {
  pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
    Self {
      value: Arc::new(value),
      contract: TypeId::of::<T>(),
      type_name: any::type_name::<T>(),
    }
  }

  /// Returns the service as `Arc<T>` when `T` is the contract it holds.
  pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self.value.downcast_ref::<Arc<T>>().cloned()
  }

  pub(crate) fn expect<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
    self.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
      expected: any::type_name::<T>().to_owned(),
      found: self.type_name.to_owned(),
    })
  }

  /// The `Arc<T>` handle itself, for disposal hooks keyed on `T`.
  pub(crate) fn as_any(&self) -> &(dyn Any + Send + Sync) {
    &*self.value
  }

  pub(crate) fn contract(&self) -> TypeId {
    self.contract
  }

  /// The contract type name this object was stored as.
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  /// Whether both handles refer to the same stored object.
  pub fn ptr_eq(&self, other: &Object) -> bool {
    Arc::ptr_eq(&self.value, &other.value)
  }
}

impl fmt::Debug for Object {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Object({})", self.type_name)
  }
}
