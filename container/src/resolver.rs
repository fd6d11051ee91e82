//! The resolve surface shared by containers, context resolvers and build
//! sessions.

use crate::container::Container;
use crate::core::{Object, ServiceType, TypeKey};
use crate::error::Result;
use crate::generic::ClosedGeneric;
use crate::lifecycle::ExternalScope;
use crate::session::with_session;

use std::fmt;
use std::sync::Arc;

use ahash::HashMap;

/// Resolves services.
///
/// The three required methods work on type-erased `Object`s. The typed
/// methods on top of them downcast to the requested contract.
pub trait Resolver {
  /// Resolves the default instance, or the instance named `name`.
  fn resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Object>;

  /// Like `resolve_object`, but returns `None` when nothing is registered
  /// under the requested key. Construction failures still propagate.
  fn try_resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Option<Object>>;

  /// Resolves every instance of the family in registration order.
  fn resolve_all_objects(&self, service_type: &ServiceType) -> Result<Vec<Object>>;

  fn get<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>>
  where
    Self: Sized,
  {
    self.resolve_object(&ServiceType::of::<S>(), None)?.expect::<S>()
  }

  fn get_named<S: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<S>>
  where
    Self: Sized,
  {
    self.resolve_object(&ServiceType::of::<S>(), Some(name))?.expect::<S>()
  }

  fn get_all<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<S>>>
  where
    Self: Sized,
  {
    self
      .resolve_all_objects(&ServiceType::of::<S>())?
      .iter()
      .map(|object| object.expect::<S>())
      .collect()
  }

  fn try_get<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<S>>>
  where
    Self: Sized,
  {
    self
      .try_resolve_object(&ServiceType::of::<S>(), None)?
      .map(|object| object.expect::<S>())
      .transpose()
  }

  fn try_get_named<S: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<S>>>
  where
    Self: Sized,
  {
    self
      .try_resolve_object(&ServiceType::of::<S>(), Some(name))?
      .map(|object| object.expect::<S>())
      .transpose()
  }

  /// Resolves a closed generic contract, falling back to its open family.
  fn get_closed<S: ?Sized + ClosedGeneric>(&self) -> Result<Arc<S>>
  where
    Self: Sized,
  {
    self.resolve_object(&ServiceType::closed::<S>(), None)?.expect::<S>()
  }

  fn get_closed_named<S: ?Sized + ClosedGeneric>(&self, name: &str) -> Result<Arc<S>>
  where
    Self: Sized,
  {
    self
      .resolve_object(&ServiceType::closed::<S>(), Some(name))?
      .expect::<S>()
  }

  fn get_all_closed<S: ?Sized + ClosedGeneric>(&self) -> Result<Vec<Arc<S>>>
  where
    Self: Sized,
  {
    self
      .resolve_all_objects(&ServiceType::closed::<S>())?
      .iter()
      .map(|object| object.expect::<S>())
      .collect()
  }
}

/// Values supplied with one resolve call.
///
/// Named values override the constructor or setter argument of that name on
/// any object built during the call. Typed defaults replace the default
/// instance of their type, both for the call itself and for dependencies.
#[derive(Clone, Default)]
pub struct ExplicitArguments {
  by_name: HashMap<String, Object>,
  by_type: HashMap<ServiceType, Object>,
}

impl ExplicitArguments {
  pub fn new() -> Self {
    Self::default()
  }

  /// Supplies `value` for every argument named `name`.
  pub fn set<T: Send + Sync + 'static>(self, name: impl Into<String>, value: T) -> Self {
    self.set_shared(name, Arc::new(value))
  }

  pub fn set_shared<T: ?Sized + Send + Sync + 'static>(mut self, name: impl Into<String>, value: Arc<T>) -> Self {
    self.by_name.insert(name.into(), Object::new(value));
    self
  }

  /// Uses `value` as the default of `T` for this call.
  pub fn with_default<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
    self.by_type.insert(ServiceType::of::<T>(), Object::new(value));
    self
  }

  pub fn len(&self) -> usize {
    self.by_name.len() + self.by_type.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The value for an argument, by name first and then by type. A named
  /// value only applies to a parameter of exactly its type.
  pub(crate) fn lookup(&self, name: &str, service_type: &ServiceType) -> Option<&Object> {
    self
      .by_name
      .get(name)
      .filter(|object| service_type.key == TypeKey::Type(object.contract()))
      .or_else(|| self.by_type.get(service_type))
  }

  pub(crate) fn default_of(&self, service_type: &ServiceType) -> Option<&Object> {
    self.by_type.get(service_type)
  }
}

impl fmt::Debug for ExplicitArguments {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExplicitArguments")
      .field("by_name", &self.by_name.keys().collect::<Vec<_>>())
      .field("by_type", &self.by_type.keys().collect::<Vec<_>>())
      .finish()
  }
}

/// A container paired with the per-call context of its resolves: an external
/// scope for hybrid lifecycles and explicit arguments.
#[derive(Clone, Copy)]
pub struct ContextResolver<'c> {
  container: &'c Container,
  external: Option<&'c ExternalScope>,
  arguments: Option<&'c ExplicitArguments>,
}

impl<'c> ContextResolver<'c> {
  pub(crate) fn new(container: &'c Container) -> Self {
    Self {
      container,
      external: None,
      arguments: None,
    }
  }

  pub fn with_context(mut self, external: &'c ExternalScope) -> Self {
    self.external = Some(external);
    self
  }

  pub fn with_arguments(mut self, arguments: &'c ExplicitArguments) -> Self {
    self.arguments = Some(arguments);
    self
  }
}

impl Resolver for ContextResolver<'_> {
  fn resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Object> {
    with_session(self.container.state(), self.external, self.arguments, |session| {
      session.resolve(service_type, name)
    })
  }

  fn try_resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Option<Object>> {
    with_session(self.container.state(), self.external, self.arguments, |session| {
      session.try_resolve(service_type, name)
    })
  }

  fn resolve_all_objects(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
    with_session(self.container.state(), self.external, self.arguments, |session| {
      session.resolve_all(service_type)
    })
  }
}

impl fmt::Debug for ContextResolver<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContextResolver")
      .field("container", &self.container.name())
      .field("external", &self.external.map(|e| e.name()))
      .field("arguments", &self.arguments)
      .finish()
  }
}
