//! Instances: one concrete way of satisfying a service type.

use crate::cache::{Built, Disposable, Disposer};
use crate::concrete::{Concrete, ConcreteType, RawObject};
use crate::core::{InstanceId, Object, ServiceType};
use crate::error::{BoxError, Error, Result};
use crate::lifecycle::{Lifecycle, LifecycleKind};
use crate::session::BuildSession;

use std::any::{self, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type DisposalHook =
  Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<Disposer> + Send + Sync>;
type FinishFn = Arc<dyn Fn(RawObject, Option<&DisposalHook>) -> Result<Built> + Send + Sync>;
pub(crate) type FactoryFn =
  Arc<dyn Fn(&BuildSession<'_>) -> std::result::Result<Object, BoxError> + Send + Sync>;

/// A concrete type together with the upcast into its service contract.
#[derive(Clone)]
pub(crate) struct PluggedType {
  pub(crate) concrete: ConcreteType,
  finish: FinishFn,
}

impl PluggedType {
  /// Shares a constructed value as its contract and attaches its disposer.
  pub(crate) fn finish(&self, raw: RawObject, hook: Option<&DisposalHook>) -> Result<Built> {
    (self.finish)(raw, hook)
  }
}

/// How a concrete type `C` serves the contract `S`.
pub struct Implementation<S: ?Sized> {
  plugged: PluggedType,
  _marker: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Implementation<S> {
  /// Pairs a concrete descriptor with its upcast, usually `|c| c`.
  pub fn new<C: Any + Send + Sync>(
    concrete: Concrete<C>,
    upcast: impl Fn(Arc<C>) -> Arc<S> + Send + Sync + 'static,
  ) -> Self {
    let finish: FinishFn = Arc::new(move |raw: RawObject, hook: Option<&DisposalHook>| {
      let value = raw.downcast::<C>().map_err(|_| Error::TypeMismatch {
        expected: any::type_name::<C>().to_owned(),
        found: "a different constructed type".to_owned(),
      })?;
      let concrete = Arc::new(*value);
      let disposer = hook.and_then(|hook| hook(&concrete as &(dyn Any + Send + Sync)));
      Ok(Built {
        object: Object::new(upcast(concrete)),
        disposer,
      })
    });
    Self {
      plugged: PluggedType {
        concrete: concrete.into_descriptor(),
        finish,
      },
      _marker: PhantomData,
    }
  }

  pub fn concrete(&self) -> &ConcreteType {
    &self.plugged.concrete
  }

  pub(crate) fn into_plugged(self) -> PluggedType {
    self.plugged
  }
}

impl<S: Send + Sync + 'static> Implementation<S> {
  /// A concrete type registered as its own contract.
  pub fn of_self(concrete: Concrete<S>) -> Self {
    Self::new(concrete, |value| value)
  }
}

#[derive(Clone)]
pub(crate) enum InstanceSource {
  Constructed(PluggedType),
  Factory(FactoryFn),
  Object(Object),
  Template(&'static str),
}

/// Where a nested dependency comes from.
#[derive(Clone)]
pub enum InstanceRef {
  /// The default instance of a family.
  Default(ServiceType),
  /// A named instance of a family.
  Named(ServiceType, String),
  /// An anonymous instance defined in place.
  Inline(Arc<Instance>),
}

impl fmt::Debug for InstanceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InstanceRef::Default(st) => write!(f, "Default({})", st),
      InstanceRef::Named(st, name) => write!(f, "Named({}, {})", st, name),
      InstanceRef::Inline(instance) => write!(f, "Inline({})", instance.name),
    }
  }
}

/// A binding for one constructor parameter or settable property.
#[derive(Clone)]
pub enum Dependency {
  /// An explicit literal value.
  Value(Object),
  /// A reference resolved freshly at every build.
  Instance(InstanceRef),
  /// Resolve the default of the parameter's type from the calling context.
  Context,
}

impl Dependency {
  pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
    Dependency::Value(Object::new(Arc::new(value)))
  }

  pub fn shared<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
    Dependency::Value(Object::new(value))
  }
}

impl fmt::Debug for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dependency::Value(object) => write!(f, "Value({})", object.type_name()),
      Dependency::Instance(reference) => write!(f, "Instance({:?})", reference),
      Dependency::Context => f.write_str("Context"),
    }
  }
}

/// One registered way of producing a service.
///
/// Instances are immutable once the graph that holds them is sealed.
#[derive(Clone)]
pub struct Instance {
  pub(crate) id: InstanceId,
  pub(crate) name: String,
  pub(crate) explicit_name: bool,
  pub(crate) contract: Option<ServiceType>,
  pub(crate) lifecycle: Option<Arc<dyn Lifecycle>>,
  pub(crate) dependencies: Vec<(String, Dependency)>,
  pub(crate) source: InstanceSource,
  pub(crate) disposal: Option<DisposalHook>,
}

impl Instance {
  fn new(contract: Option<ServiceType>, type_name: &str, source: InstanceSource) -> Self {
    let id = InstanceId::next();
    Self {
      id,
      name: format!("{}#{}", short_type_name(type_name), id.as_u64()),
      explicit_name: false,
      contract,
      lifecycle: None,
      dependencies: Vec::new(),
      source,
      disposal: None,
    }
  }

  /// An instance built through the construction plan of `implementation`.
  pub fn constructed<S: ?Sized + Send + Sync + 'static>(implementation: Implementation<S>) -> Self {
    let plugged = implementation.into_plugged();
    let type_name = plugged.concrete.name();
    Self::new(
      Some(ServiceType::of::<S>()),
      type_name,
      InstanceSource::Constructed(plugged),
    )
  }

  /// An instance built by a user closure, which resolves its own
  /// dependencies through the build session it is handed.
  pub fn factory<S: ?Sized + Send + Sync + 'static>(
    factory: impl Fn(&BuildSession<'_>) -> std::result::Result<Arc<S>, BoxError> + Send + Sync + 'static,
  ) -> Self {
    let factory: FactoryFn = Arc::new(move |session| factory(session).map(Object::new));
    Self::new(
      Some(ServiceType::of::<S>()),
      any::type_name::<S>(),
      InstanceSource::Factory(factory),
    )
  }

  /// A pre-built object, returned as-is on every resolve.
  pub fn object<S: ?Sized + Send + Sync + 'static>(value: Arc<S>) -> Self {
    Self::new(
      Some(ServiceType::of::<S>()),
      any::type_name::<S>(),
      InstanceSource::Object(Object::new(value)),
    )
  }

  /// A template of an open generic family, closed per requested type.
  pub fn template(template: &'static str) -> Self {
    let mut instance = Self::new(None, template, InstanceSource::Template(template));
    instance.name = template.to_owned();
    instance
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.set_name(name);
    self
  }

  pub fn with_lifecycle(self, kind: LifecycleKind) -> Self {
    self.with_lifecycle_policy(kind.policy())
  }

  pub fn with_lifecycle_policy(mut self, policy: Arc<dyn Lifecycle>) -> Self {
    self.lifecycle = Some(policy);
    self
  }

  pub fn with_dependency(mut self, name: impl Into<String>, dependency: Dependency) -> Self {
    self.set_dependency(name, dependency);
    self
  }

  /// Disposes the built object through `X::dispose` when its cache lets it go.
  ///
  /// `X` is the concrete type for constructed instances and the contract for
  /// factory instances.
  pub fn disposable_as<X: ?Sized + Disposable + 'static>(mut self) -> Self {
    self.disposal = Some(disposal_hook::<X>());
    self
  }

  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn lifecycle(&self) -> Option<&Arc<dyn Lifecycle>> {
    self.lifecycle.as_ref()
  }

  pub fn dependencies(&self) -> impl Iterator<Item = (&str, &Dependency)> {
    self.dependencies.iter().map(|(n, d)| (n.as_str(), d))
  }

  /// A short description of what builds this instance.
  pub fn describe(&self) -> String {
    match &self.source {
      InstanceSource::Constructed(plugged) => plugged.concrete.name().to_owned(),
      InstanceSource::Factory(_) => "factory".to_owned(),
      InstanceSource::Object(object) => format!("object of {}", object.type_name()),
      InstanceSource::Template(template) => format!("template {}<>", template),
    }
  }

  pub(crate) fn set_name(&mut self, name: impl Into<String>) {
    self.name = name.into();
    self.explicit_name = true;
  }

  pub(crate) fn set_dependency(&mut self, name: impl Into<String>, dependency: Dependency) {
    let name = name.into();
    match self.dependencies.iter_mut().find(|(n, _)| *n == name) {
      Some(slot) => slot.1 = dependency,
      None => self.dependencies.push((name, dependency)),
    }
  }

  #[cfg(test)]
  pub(crate) fn dependency(&self, name: &str) -> Option<&Dependency> {
    self
      .dependencies
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, d)| d)
  }

  pub(crate) fn concrete(&self) -> Option<&ConcreteType> {
    match &self.source {
      InstanceSource::Constructed(plugged) => Some(&plugged.concrete),
      _ => None,
    }
  }

  /// Derives the closed instance of an open template under the identity `id`.
  ///
  /// Bindings, name and lifecycle carry over.
  pub(crate) fn close_template(&self, id: InstanceId, contract: ServiceType, plugged: PluggedType) -> Instance {
    Instance {
      id,
      name: self.name.clone(),
      explicit_name: self.explicit_name,
      contract: Some(contract),
      lifecycle: self.lifecycle.clone(),
      dependencies: self.dependencies.clone(),
      source: InstanceSource::Constructed(plugged),
      disposal: self.disposal.clone(),
    }
  }
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Instance")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("source", &self.describe())
      .field("dependencies", &self.dependencies)
      .finish()
  }
}

pub(crate) fn disposal_hook<X: ?Sized + Disposable + 'static>() -> DisposalHook {
  Arc::new(|any: &(dyn Any + Send + Sync)| {
    any.downcast_ref::<Arc<X>>().map(|value| {
      let value = Arc::clone(value);
      Box::new(move || value.dispose()) as Disposer
    })
  })
}

/// `my_app::services::ConsoleLogger<T>` → `ConsoleLogger<T>`.
pub(crate) fn short_type_name(full: &str) -> &str {
  let head_end = full.find('<').unwrap_or(full.len());
  let start = full[..head_end].rfind("::").map(|i| i + 2).unwrap_or(0);
  &full[start..]
}
