//! The configuration graph: families of instances, sealed and validated.
//!
//! A `Registry` is the mutable side. Sealing it produces a
//! `ConfigurationGraph`, which is immutable apart from the memo of closed
//! generic families it derives on demand. The identities of closed instances
//! outlive any one graph, so a reconfigured container keeps finding the
//! objects it cached for them.

mod instance;
mod registry;

pub use instance::{Dependency, Implementation, Instance, InstanceRef};
pub(crate) use instance::{InstanceSource, PluggedType};
pub use registry::{
  FamilyExpression, GenericFamilyExpression, InstanceExpression, Registry, TemplateExpression,
};

use crate::concrete::ConcreteType;
use crate::core::{GenericArguments, InstanceId, ServiceType};
use crate::error::ConfigurationError;
use crate::interception::InterceptorRule;
use crate::lifecycle::{Lifecycle, LifecycleKind};
use crate::plan::ConstructionPlan;
use registry::FamilyConfig;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use dashmap::DashMap;
use tracing::trace;

/// Read access to the graphs a sealing graph may reference: those of its
/// parent containers.
pub(crate) trait GraphView {
  fn can_resolve_default(&self, service_type: &ServiceType) -> bool;
  fn has_named(&self, service_type: &ServiceType, name: &str) -> bool;
}

/// Closed instance identity per (template, requested closed type).
type ClosedIds = DashMap<(InstanceId, ServiceType), InstanceId>;

/// All instances of one service type, with its effective default.
pub(crate) struct Family {
  service_type: ServiceType,
  lifecycle: Arc<dyn Lifecycle>,
  declared_lifecycle: bool,
  instances: Vec<Arc<Instance>>,
  by_name: HashMap<String, usize>,
  default: Option<Arc<Instance>>,
  fallback: Option<Arc<Instance>>,
}

impl Family {
  /// Checks name uniqueness and derives the effective default: the explicit
  /// default, else the only instance, else the `use_if_none` fallback.
  fn assemble(
    service_type: ServiceType,
    lifecycle: Arc<dyn Lifecycle>,
    declared_lifecycle: bool,
    instances: Vec<Arc<Instance>>,
    explicit_default: Option<InstanceId>,
    fallback: Option<Arc<Instance>>,
  ) -> Result<Self, ConfigurationError> {
    let mut by_name = HashMap::with_capacity(instances.len());
    for (index, instance) in instances.iter().enumerate() {
      if by_name.insert(instance.name.clone(), index).is_some() {
        return Err(ConfigurationError::DuplicateInstanceName {
          service_type: service_type.to_string(),
          name: instance.name.clone(),
        });
      }
    }

    let explicit = explicit_default.and_then(|id| instances.iter().find(|i| i.id == id).cloned());
    let single = match instances.as_slice() {
      [only] => Some(only.clone()),
      _ => None,
    };
    let default = explicit.or(single).or_else(|| fallback.clone());

    Ok(Self {
      service_type,
      lifecycle,
      declared_lifecycle,
      instances,
      by_name,
      default,
      fallback,
    })
  }

  pub(crate) fn service_type(&self) -> &ServiceType {
    &self.service_type
  }

  pub(crate) fn lifecycle(&self) -> &Arc<dyn Lifecycle> {
    &self.lifecycle
  }

  pub(crate) fn declared_lifecycle(&self) -> bool {
    self.declared_lifecycle
  }

  /// The instance's own lifecycle, else the family's.
  pub(crate) fn lifecycle_of(&self, instance: &Instance) -> Arc<dyn Lifecycle> {
    instance
      .lifecycle
      .clone()
      .unwrap_or_else(|| self.lifecycle.clone())
  }

  pub(crate) fn instances(&self) -> &[Arc<Instance>] {
    &self.instances
  }

  pub(crate) fn named(&self, name: &str) -> Option<&Arc<Instance>> {
    self.by_name.get(name).map(|&index| &self.instances[index])
  }

  pub(crate) fn default_instance(&self) -> Option<&Arc<Instance>> {
    self.default.as_ref()
  }

  pub(crate) fn fallback(&self) -> Option<&Arc<Instance>> {
    self.fallback.as_ref()
  }

  /// Closes an open family for one requested closed type.
  ///
  /// Templates whose closing does not apply to the requested arguments are
  /// left out; a family where no template applies cannot be closed at all.
  fn close(
    &self,
    requested: &ServiceType,
    generic: &GenericArguments,
    ids: &ClosedIds,
  ) -> Result<Self, ConfigurationError> {
    let close_one = |template: &Arc<Instance>| -> Option<Arc<Instance>> {
      let InstanceSource::Template(name) = template.source else {
        return None;
      };
      let plugged = (generic.close)(name)?;
      let id = *ids
        .entry((template.id, requested.clone()))
        .or_insert_with(InstanceId::next)
        .value();
      Some(Arc::new(template.close_template(id, requested.clone(), plugged)))
    };

    let mut instances = Vec::with_capacity(self.instances.len());
    let mut explicit_default = None;
    for template in &self.instances {
      if let Some(closed) = close_one(template) {
        if self.default.as_ref().is_some_and(|d| d.id == template.id) {
          explicit_default = Some(closed.id);
        }
        instances.push(closed);
      }
    }
    let fallback = self.fallback.as_ref().and_then(close_one);

    if instances.is_empty() && fallback.is_none() {
      let template = self
        .instances
        .first()
        .or(self.fallback.as_ref())
        .map(|t| t.name.clone())
        .unwrap_or_default();
      return Err(ConfigurationError::UnclosableGeneric {
        definition: generic.definition().to_owned(),
        template,
        requested: requested.to_string(),
      });
    }

    trace!(definition = generic.definition(), requested = %requested, "closed open generic family");
    Family::assemble(
      requested.clone(),
      self.lifecycle.clone(),
      self.declared_lifecycle,
      instances,
      explicit_default,
      fallback,
    )
  }
}

impl fmt::Debug for Family {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Family")
      .field("service_type", &self.service_type)
      .field("lifecycle", &self.lifecycle.name())
      .field("instances", &self.instances.len())
      .finish()
  }
}

/// A sealed configuration: the families of one container.
pub(crate) struct ConfigurationGraph {
  families: HashMap<ServiceType, Arc<Family>>,
  order: Vec<ServiceType>,
  closed: DashMap<ServiceType, Arc<Family>>,
  closed_ids: Arc<ClosedIds>,
  interceptors: Vec<InterceptorRule>,
  concretes: HashMap<TypeId, ConcreteType>,
  registry: Registry,
}

impl ConfigurationGraph {
  pub(crate) fn empty(default_lifecycle: LifecycleKind) -> Self {
    Self {
      families: HashMap::new(),
      order: Vec::new(),
      closed: DashMap::new(),
      closed_ids: Arc::default(),
      interceptors: Vec::new(),
      concretes: HashMap::new(),
      registry: Registry::with_default_lifecycle(default_lifecycle),
    }
  }

  /// Validates `registry` and freezes it.
  ///
  /// Fails on duplicate instance names within a family, on instances added
  /// to a family whose contract they do not serve, and on explicit references
  /// that neither this graph nor `parent` can satisfy.
  pub(crate) fn seal(registry: Registry, parent: Option<&dyn GraphView>) -> Result<Self, ConfigurationError> {
    Self::seal_with(registry, parent, Arc::default())
  }

  /// Seals `registry` as the successor of this graph. Open generic families
  /// close to the same instance identities they had here.
  pub(crate) fn reseal(&self, registry: Registry, parent: Option<&dyn GraphView>) -> Result<Self, ConfigurationError> {
    Self::seal_with(registry, parent, self.closed_ids.clone())
  }

  fn seal_with(
    registry: Registry,
    parent: Option<&dyn GraphView>,
    closed_ids: Arc<ClosedIds>,
  ) -> Result<Self, ConfigurationError> {
    let default_lifecycle = registry.default_lifecycle.unwrap_or_default().policy();

    let mut families = HashMap::with_capacity(registry.families.len());
    for service_type in &registry.order {
      let Some(config) = registry.families.get(service_type) else {
        continue;
      };
      let family = seal_family(config.clone(), &default_lifecycle)?;
      families.insert(service_type.clone(), Arc::new(family));
    }

    let graph = Self {
      families,
      order: registry.order.clone(),
      closed: DashMap::new(),
      closed_ids,
      interceptors: registry.interceptors.clone(),
      concretes: registry.concretes.clone(),
      registry,
    };

    for service_type in &graph.order {
      let Some(family) = graph.families.get(service_type) else {
        continue;
      };
      for instance in family.instances.iter().chain(family.fallback.iter()) {
        graph.check_references(service_type, instance, instance, parent)?;
      }
    }

    trace!(families = graph.families.len(), "sealed configuration graph");
    Ok(graph)
  }

  fn check_references(
    &self,
    service_type: &ServiceType,
    owner: &Instance,
    instance: &Instance,
    parent: Option<&dyn GraphView>,
  ) -> Result<(), ConfigurationError> {
    for (dependency, binding) in instance.dependencies() {
      let reference = match binding {
        Dependency::Value(_) => continue,
        Dependency::Context => {
          self.check_context(service_type, owner, instance, dependency, parent)?;
          continue;
        }
        Dependency::Instance(reference) => reference,
      };
      match reference {
        InstanceRef::Default(target) => {
          let found = self.can_resolve_default(target)
            || parent.is_some_and(|p| p.can_resolve_default(target));
          if !found {
            return Err(ConfigurationError::UnresolvedDependency {
              service_type: service_type.to_string(),
              instance: owner.name.clone(),
              dependency: dependency.to_owned(),
              target: target.to_string(),
            });
          }
        }
        InstanceRef::Named(target, name) => {
          let found = self.has_named(target, name) || parent.is_some_and(|p| p.has_named(target, name));
          if !found {
            return Err(ConfigurationError::UnknownReference {
              service_type: service_type.to_string(),
              instance: owner.name.clone(),
              target: target.to_string(),
              name: name.clone(),
            });
          }
        }
        InstanceRef::Inline(inline) => self.check_references(service_type, owner, inline, parent)?,
      }
    }
    Ok(())
  }

  /// A context binding needs a default for the type of the parameter it
  /// names. Parameters the concrete type does not declare are left to the
  /// plan compiler.
  fn check_context(
    &self,
    service_type: &ServiceType,
    owner: &Instance,
    instance: &Instance,
    dependency: &str,
    parent: Option<&dyn GraphView>,
  ) -> Result<(), ConfigurationError> {
    let Some(concrete) = instance.concrete() else {
      return Ok(());
    };
    let targets: Vec<&ServiceType> = ConstructionPlan::parameters(concrete)
      .filter(|param| param.name() == dependency)
      .map(|param| param.service_type())
      .collect();
    let resolvable = |target: &ServiceType| {
      self.can_resolve_default(target) || parent.is_some_and(|p| p.can_resolve_default(target))
    };
    let Some(first) = targets.first() else {
      return Ok(());
    };
    if targets.iter().any(|&target| resolvable(target)) {
      return Ok(());
    }
    Err(ConfigurationError::UnresolvedDependency {
      service_type: service_type.to_string(),
      instance: owner.name.clone(),
      dependency: dependency.to_owned(),
      target: first.to_string(),
    })
  }

  /// The family serving `service_type` in this graph, closing an open
  /// generic family when only that is registered.
  pub(crate) fn family(&self, service_type: &ServiceType) -> Result<Option<Arc<Family>>, ConfigurationError> {
    if let Some(family) = self.families.get(service_type) {
      return Ok(Some(family.clone()));
    }
    let Some(generic) = service_type.generic() else {
      return Ok(None);
    };
    if let Some(closed) = self.closed.get(service_type) {
      return Ok(Some(closed.value().clone()));
    }
    let Some(open) = service_type
      .open_definition()
      .and_then(|definition| self.families.get(&definition))
    else {
      return Ok(None);
    };

    // Closing runs user code, so no shard lock is held while it does. A lost
    // race discards the loser's family before anything was built from it.
    let closed = Arc::new(open.close(service_type, generic, &self.closed_ids)?);
    let entry = self.closed.entry(service_type.clone()).or_insert(closed);
    Ok(Some(entry.value().clone()))
  }

  pub(crate) fn can_resolve_default(&self, service_type: &ServiceType) -> bool {
    matches!(self.family(service_type), Ok(Some(family)) if family.default_instance().is_some())
  }

  pub(crate) fn has_named(&self, service_type: &ServiceType, name: &str) -> bool {
    matches!(self.family(service_type), Ok(Some(family)) if family.named(name).is_some())
  }

  /// Every instance identity this graph declares, closed generics included.
  pub(crate) fn instance_ids(&self) -> Vec<InstanceId> {
    self
      .families
      .values()
      .flat_map(|family| family.instances.iter().chain(family.fallback.iter()))
      .map(|instance| instance.id)
      .chain(self.closed_ids.iter().map(|entry| *entry.value()))
      .collect()
  }

  /// Families in registration order.
  pub(crate) fn families(&self) -> impl Iterator<Item = &Arc<Family>> {
    self.order.iter().filter_map(|st| self.families.get(st))
  }

  pub(crate) fn interceptors(&self) -> &[InterceptorRule] {
    &self.interceptors
  }

  pub(crate) fn concrete(&self, type_id: TypeId) -> Option<&ConcreteType> {
    self.concretes.get(&type_id)
  }

  /// The registry this graph was sealed from.
  pub(crate) fn registry(&self) -> &Registry {
    &self.registry
  }
}

impl fmt::Debug for ConfigurationGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConfigurationGraph")
      .field("families", &self.order)
      .field("closed", &self.closed.len())
      .field("interceptors", &self.interceptors)
      .finish()
  }
}

fn seal_family(config: FamilyConfig, default_lifecycle: &Arc<dyn Lifecycle>) -> Result<Family, ConfigurationError> {
  let service_type = config.service_type;
  for instance in config.instances.iter().chain(config.fallback.iter()) {
    let serves = match (&instance.source, &instance.contract) {
      (InstanceSource::Template(_), _) => service_type.is_open(),
      (_, Some(contract)) => *contract == service_type,
      (_, None) => false,
    };
    if !serves {
      return Err(ConfigurationError::ContractMismatch {
        service_type: service_type.to_string(),
        instance: instance.name.clone(),
        contract: instance
          .contract
          .as_ref()
          .map(|c| c.to_string())
          .unwrap_or_else(|| "an open template".to_owned()),
      });
    }
  }

  let declared_lifecycle = config.lifecycle.is_some();
  let lifecycle = config.lifecycle.unwrap_or_else(|| default_lifecycle.clone());
  Family::assemble(
    service_type,
    lifecycle,
    declared_lifecycle,
    config.instances.into_iter().map(Arc::new).collect(),
    config.default,
    config.fallback.map(Arc::new),
  )
}
