//! The mutable registration surface that feeds a configuration graph.

use super::instance::{short_type_name, Dependency, Implementation, Instance, InstanceRef};
use crate::cache::Disposable;
use crate::concrete::Concrete;
use crate::core::{InstanceId, Object, ServiceType};
use crate::error::BoxError;
use crate::interception::{InterceptionContext, InterceptorRule};
use crate::lifecycle::{Lifecycle, LifecycleKind};
use crate::session::BuildSession;

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use ahash::HashMap;

#[derive(Clone)]
pub(crate) struct FamilyConfig {
  pub(crate) service_type: ServiceType,
  pub(crate) lifecycle: Option<Arc<dyn Lifecycle>>,
  pub(crate) instances: Vec<Instance>,
  pub(crate) default: Option<InstanceId>,
  pub(crate) fallback: Option<Instance>,
}

impl FamilyConfig {
  fn new(service_type: ServiceType) -> Self {
    Self {
      service_type,
      lifecycle: None,
      instances: Vec::new(),
      default: None,
      fallback: None,
    }
  }
}

/// Collects families, instances, interceptors and concrete descriptors.
///
/// A registry is consumed by sealing it into a configuration graph, which
/// happens when a container is built or reconfigured. Containers keep the
/// registry they were sealed from so later `configure` calls extend it.
#[derive(Clone, Default)]
pub struct Registry {
  pub(crate) families: HashMap<ServiceType, FamilyConfig>,
  pub(crate) order: Vec<ServiceType>,
  pub(crate) interceptors: Vec<InterceptorRule>,
  pub(crate) concretes: HashMap<TypeId, crate::concrete::ConcreteType>,
  pub(crate) default_lifecycle: Option<LifecycleKind>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn with_default_lifecycle(kind: LifecycleKind) -> Self {
    Self {
      default_lifecycle: Some(kind),
      ..Self::default()
    }
  }

  // --- PRIVATE HELPERS ---

  fn family_mut(&mut self, service_type: ServiceType) -> &mut FamilyConfig {
    if !self.families.contains_key(&service_type) {
      self.order.push(service_type.clone());
    }
    self
      .families
      .entry(service_type.clone())
      .or_insert_with(|| FamilyConfig::new(service_type))
  }

  fn push_instance(&mut self, service_type: ServiceType, instance: Instance) -> Slot {
    let family = self.family_mut(service_type.clone());
    family.instances.push(instance);
    Slot::Instance(service_type, family.instances.len() - 1)
  }

  fn slot_mut(&mut self, slot: &Slot) -> Option<&mut Instance> {
    match slot {
      Slot::Instance(st, index) => self.families.get_mut(st)?.instances.get_mut(*index),
      Slot::Fallback(st) => self.families.get_mut(st)?.fallback.as_mut(),
    }
  }

  // --- PUBLIC API ---

  /// Starts configuring the family of the service contract `S`.
  pub fn for_type<S: ?Sized + Send + Sync + 'static>(&mut self) -> FamilyExpression<'_, S> {
    let service_type = ServiceType::of::<S>();
    self.family_mut(service_type.clone());
    FamilyExpression {
      registry: self,
      service_type,
      _marker: PhantomData,
    }
  }

  /// Starts configuring the open generic family named `definition`.
  pub fn for_generic(&mut self, definition: &'static str) -> GenericFamilyExpression<'_> {
    let service_type = ServiceType::open(definition);
    self.family_mut(service_type.clone());
    GenericFamilyExpression {
      registry: self,
      service_type,
    }
  }

  /// Adds an instance to the family of `service_type`.
  pub fn add_instance(&mut self, service_type: ServiceType, instance: Instance) -> InstanceId {
    let id = instance.id();
    self.push_instance(service_type, instance);
    id
  }

  /// Makes the already added instance `id` the family default.
  pub fn set_default(&mut self, service_type: ServiceType, id: InstanceId) {
    self.family_mut(service_type).default = Some(id);
  }

  /// Sets the lifecycle every instance of the family inherits.
  pub fn set_lifecycle(&mut self, service_type: ServiceType, policy: Arc<dyn Lifecycle>) {
    self.family_mut(service_type).lifecycle = Some(policy);
  }

  /// Registers the descriptor `Container::build_up` uses for `C`.
  pub fn concrete<C: Any + Send + Sync>(&mut self, concrete: Concrete<C>) -> &mut Self {
    let descriptor = concrete.into_descriptor();
    self.concretes.insert(descriptor.type_id(), descriptor);
    self
  }

  /// Appends an interceptor rule. Rules run in the order they were added.
  pub fn intercept(&mut self, rule: InterceptorRule) -> &mut Self {
    self.interceptors.push(rule);
    self
  }

  /// Number of families registered so far.
  pub fn family_count(&self) -> usize {
    self.families.len()
  }
}

enum Slot {
  Instance(ServiceType, usize),
  Fallback(ServiceType),
}

/// Configures one family.
pub struct FamilyExpression<'r, S: ?Sized> {
  registry: &'r mut Registry,
  service_type: ServiceType,
  _marker: PhantomData<fn() -> Arc<S>>,
}

impl<'r, S: ?Sized + Send + Sync + 'static> FamilyExpression<'r, S> {
  fn instance_expression<C: ?Sized>(self, slot: Slot) -> InstanceExpression<'r, C> {
    InstanceExpression {
      registry: self.registry,
      slot,
      _marker: PhantomData,
    }
  }

  fn push(&mut self, instance: Instance, make_default: bool) -> Slot {
    let id = instance.id();
    let slot = self.registry.push_instance(self.service_type.clone(), instance);
    if make_default {
      self.registry.set_default(self.service_type.clone(), id);
    }
    slot
  }

  fn service_predicate(&self) -> impl Fn(&crate::interception::Target<'_>) -> bool + Send + Sync + 'static {
    let service_type = self.service_type.clone();
    move |target| *target.service_type() == service_type
  }

  pub fn lifecycle(self, kind: LifecycleKind) -> Self {
    self.lifecycle_policy(kind.policy())
  }

  pub fn lifecycle_policy(self, policy: Arc<dyn Lifecycle>) -> Self {
    self.registry.set_lifecycle(self.service_type.clone(), policy);
    self
  }

  /// Shorthand for `lifecycle(LifecycleKind::Singleton)`.
  pub fn singleton(self) -> Self {
    self.lifecycle(LifecycleKind::Singleton)
  }

  /// Adds a constructed instance and makes it the default.
  pub fn use_concrete<C: Any + Send + Sync>(
    mut self,
    concrete: Concrete<C>,
    upcast: impl Fn(Arc<C>) -> Arc<S> + Send + Sync + 'static,
  ) -> InstanceExpression<'r, C> {
    let instance = Instance::constructed(Implementation::new(concrete, upcast));
    let slot = self.push(instance, true);
    self.instance_expression(slot)
  }

  /// Adds a constructed instance without touching the default.
  pub fn add_concrete<C: Any + Send + Sync>(
    mut self,
    concrete: Concrete<C>,
    upcast: impl Fn(Arc<C>) -> Arc<S> + Send + Sync + 'static,
  ) -> InstanceExpression<'r, C> {
    let instance = Instance::constructed(Implementation::new(concrete, upcast));
    let slot = self.push(instance, false);
    self.instance_expression(slot)
  }

  /// Adds a factory instance and makes it the default.
  pub fn use_factory(
    mut self,
    factory: impl Fn(&BuildSession<'_>) -> std::result::Result<Arc<S>, BoxError> + Send + Sync + 'static,
  ) -> InstanceExpression<'r, S> {
    let slot = self.push(Instance::factory(factory), true);
    self.instance_expression(slot)
  }

  pub fn add_factory(
    mut self,
    factory: impl Fn(&BuildSession<'_>) -> std::result::Result<Arc<S>, BoxError> + Send + Sync + 'static,
  ) -> InstanceExpression<'r, S> {
    let slot = self.push(Instance::factory(factory), false);
    self.instance_expression(slot)
  }

  /// Adds a pre-built object and makes it the default.
  pub fn use_object(mut self, value: Arc<S>) -> InstanceExpression<'r, S> {
    let slot = self.push(Instance::object(value), true);
    self.instance_expression(slot)
  }

  pub fn add_object(mut self, value: Arc<S>) -> InstanceExpression<'r, S> {
    let slot = self.push(Instance::object(value), false);
    self.instance_expression(slot)
  }

  /// Adds a prepared instance and makes it the default.
  pub fn use_instance(mut self, instance: Instance) -> InstanceExpression<'r, dyn Any> {
    let slot = self.push(instance, true);
    self.instance_expression(slot)
  }

  pub fn add_instance(mut self, instance: Instance) -> InstanceExpression<'r, dyn Any> {
    let slot = self.push(instance, false);
    self.instance_expression(slot)
  }

  /// Registers the instance used when the family has neither a default nor
  /// exactly one instance of its own.
  pub fn use_if_none<C: Any + Send + Sync>(
    self,
    concrete: Concrete<C>,
    upcast: impl Fn(Arc<C>) -> Arc<S> + Send + Sync + 'static,
  ) -> InstanceExpression<'r, C> {
    let instance = Instance::constructed(Implementation::new(concrete, upcast));
    let service_type = self.service_type.clone();
    self.registry.family_mut(service_type.clone()).fallback = Some(instance);
    self.instance_expression(Slot::Fallback(service_type))
  }

  /// Runs `callback` on every newly built object of this family.
  pub fn on_creation(self, callback: impl Fn(&S) + Send + Sync + 'static) -> Self {
    let rule = InterceptorRule::activate(
      format!("on creation of {}", self.service_type),
      self.service_predicate(),
      move |object, _| {
        if let Some(service) = object.downcast::<S>() {
          callback(&service);
        }
      },
    );
    self.registry.intercept(rule);
    self
  }

  /// Fails the build of any object of this family that `check` rejects.
  pub fn validate_with(
    self,
    check: impl Fn(&S) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
  ) -> Self {
    let rule = InterceptorRule::validate(
      format!("validation of {}", self.service_type),
      self.service_predicate(),
      move |object, _| match object.downcast::<S>() {
        Some(service) => check(&service),
        None => Ok(()),
      },
    );
    self.registry.intercept(rule);
    self
  }

  /// Replaces every newly built object of this family by `enrich(object)`.
  pub fn enrich_with(
    self,
    enrich: impl Fn(Arc<S>, &InterceptionContext<'_>) -> std::result::Result<Arc<S>, BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    let rule = InterceptorRule::enrich(
      format!("enrichment of {}", self.service_type),
      self.service_predicate(),
      move |object, context| match object.downcast::<S>() {
        Some(service) => enrich(service, context).map(Object::new),
        None => Ok(object),
      },
    );
    self.registry.intercept(rule);
    self
  }

  /// Wraps every newly built object of this family in a `D`.
  ///
  /// `D` is built through its own construction plan; its parameter of type
  /// `S` receives the object being decorated and every other parameter is
  /// resolved from the container.
  pub fn decorate_with<D: Any + Send + Sync>(
    self,
    decorator: Concrete<D>,
    upcast: impl Fn(Arc<D>) -> Arc<S> + Send + Sync + 'static,
  ) -> Self {
    let name = short_type_name(decorator.descriptor().name()).to_owned();
    let plugged = Implementation::new(decorator, upcast).into_plugged();
    let rule = InterceptorRule::decorate(
      format!("{} decorating {}", name, self.service_type),
      self.service_predicate(),
      move |object, context| {
        context
          .session()
          .decorate(&plugged, object, context.target().service_type())
          .map_err(BoxError::from)
      },
    );
    self.registry.intercept(rule);
    self
  }
}

/// Configures an open generic family.
pub struct GenericFamilyExpression<'r> {
  registry: &'r mut Registry,
  service_type: ServiceType,
}

impl<'r> GenericFamilyExpression<'r> {
  pub fn lifecycle(self, kind: LifecycleKind) -> Self {
    self.registry.set_lifecycle(self.service_type.clone(), kind.policy());
    self
  }

  /// Adds the template `name` and makes it the default.
  pub fn use_template(self, name: &'static str) -> TemplateExpression<'r> {
    self.template(name, true)
  }

  pub fn add_template(self, name: &'static str) -> TemplateExpression<'r> {
    self.template(name, false)
  }

  fn template(self, name: &'static str, make_default: bool) -> TemplateExpression<'r> {
    let instance = Instance::template(name);
    let id = instance.id();
    let slot = self.registry.push_instance(self.service_type.clone(), instance);
    if make_default {
      self.registry.set_default(self.service_type, id);
    }
    InstanceExpression {
      registry: self.registry,
      slot,
      _marker: PhantomData,
    }
  }
}

/// Configures an open template. Templates have no single concrete type, so
/// they cannot be marked disposable.
pub type TemplateExpression<'r> = InstanceExpression<'r, dyn Any>;

/// Configures one instance. `C` is the type disposal hooks are attached to.
pub struct InstanceExpression<'r, C: ?Sized> {
  registry: &'r mut Registry,
  slot: Slot,
  _marker: PhantomData<fn() -> Arc<C>>,
}

impl<'r, C: ?Sized + 'static> InstanceExpression<'r, C> {
  fn edit(self, f: impl FnOnce(&mut Instance)) -> Self {
    if let Some(instance) = self.registry.slot_mut(&self.slot) {
      f(instance);
    }
    self
  }

  fn bind(self, name: &str, dependency: Dependency) -> Self {
    self.edit(|instance| instance.set_dependency(name, dependency))
  }

  pub fn named(self, name: impl Into<String>) -> Self {
    let name = name.into();
    self.edit(|instance| instance.set_name(name))
  }

  pub fn lifecycle(self, kind: LifecycleKind) -> Self {
    self.lifecycle_policy(kind.policy())
  }

  pub fn lifecycle_policy(self, policy: Arc<dyn Lifecycle>) -> Self {
    self.edit(|instance| instance.lifecycle = Some(policy))
  }

  /// Binds the constructor parameter `param` to a literal value.
  pub fn ctor_value<T: Send + Sync + 'static>(self, param: &str, value: T) -> Self {
    self.bind(param, Dependency::value(value))
  }

  /// Binds `param` to a shared value, e.g. an `Arc<dyn Trait>`.
  pub fn ctor_shared<T: ?Sized + Send + Sync + 'static>(self, param: &str, value: Arc<T>) -> Self {
    self.bind(param, Dependency::shared(value))
  }

  /// Binds `param` to another instance, resolved at every build.
  pub fn ctor_dependency(self, param: &str, reference: InstanceRef) -> Self {
    self.bind(param, Dependency::Instance(reference))
  }

  /// Binds `param` to the instance named `name` of `T`.
  pub fn ctor_named<T: ?Sized + 'static>(self, param: &str, name: impl Into<String>) -> Self {
    self.ctor_dependency(param, InstanceRef::Named(ServiceType::of::<T>(), name.into()))
  }

  /// Binds `param` to an anonymous instance defined in place.
  pub fn ctor_inline(self, param: &str, instance: Instance) -> Self {
    self.ctor_dependency(param, InstanceRef::Inline(Arc::new(instance)))
  }

  /// Resolves `param` as the default of its type from the calling context.
  pub fn ctor_context(self, param: &str) -> Self {
    self.bind(param, Dependency::Context)
  }

  pub fn setter_value<T: Send + Sync + 'static>(self, property: &str, value: T) -> Self {
    self.bind(property, Dependency::value(value))
  }

  pub fn setter_dependency(self, property: &str, reference: InstanceRef) -> Self {
    self.bind(property, Dependency::Instance(reference))
  }

  pub fn setter_named<T: ?Sized + 'static>(self, property: &str, name: impl Into<String>) -> Self {
    self.setter_dependency(property, InstanceRef::Named(ServiceType::of::<T>(), name.into()))
  }

  /// The identity of the configured instance.
  pub fn id(&mut self) -> Option<InstanceId> {
    self.registry.slot_mut(&self.slot).map(|instance| instance.id())
  }
}

impl<'r, C: ?Sized + Disposable + 'static> InstanceExpression<'r, C> {
  /// Disposes objects built by this instance when their cache lets them go.
  pub fn disposable(self) -> Self {
    self.edit(|instance| instance.disposal = Some(super::instance::disposal_hook::<C>()))
  }
}
