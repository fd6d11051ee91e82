//! Build sessions: one root resolve call and everything it reaches.

use crate::cache::{Built, ObjectCache};
use crate::concrete::{ConcreteType, ParameterInfo};
use crate::container::{Container, Resolved, ScopeState};
use crate::core::{Object, ResolutionGuard, ServiceType};
use crate::error::{BoxError, Error, Result};
use crate::graph::{Dependency, Instance, InstanceRef, InstanceSource, PluggedType};
use crate::interception::{self, Target};
use crate::lifecycle::{ExternalScope, Lifecycle, ScopeContext};
use crate::plan::{ArgumentSource, ArgumentSourceKind, ArgumentStep, ConstructionPlan, Satisfaction};
use crate::resolver::{ExplicitArguments, Resolver};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

/// State shared by every step of one root resolve call.
pub(crate) struct SessionShared<'a> {
  external: Option<&'a ExternalScope>,
  arguments: Option<&'a ExplicitArguments>,
  cache: Arc<ObjectCache>,
}

impl<'a> SessionShared<'a> {
  pub(crate) fn new(external: Option<&'a ExternalScope>, arguments: Option<&'a ExplicitArguments>) -> Self {
    Self {
      external,
      arguments,
      cache: Arc::new(ObjectCache::new("session")),
    }
  }

  /// Same call context, empty session cache.
  fn detached(&self) -> Self {
    Self::new(self.external, self.arguments)
  }
}

/// Runs `f` inside a fresh build session rooted at `scope`.
pub(crate) fn with_session<T>(
  scope: &Arc<ScopeState>,
  external: Option<&ExternalScope>,
  arguments: Option<&ExplicitArguments>,
  f: impl FnOnce(&BuildSession<'_>) -> Result<T>,
) -> Result<T> {
  scope.ensure_alive()?;
  let shared = SessionShared::new(external, arguments);
  let session = BuildSession {
    scope: scope.clone(),
    shared: &shared,
  };
  f(&session)
}

/// The resolver handed to factories and interceptors.
///
/// Everything resolved through a session belongs to the same object graph:
/// transient instances are shared within it, and the external scope and
/// explicit arguments of the root call stay in effect.
pub struct BuildSession<'a> {
  scope: Arc<ScopeState>,
  shared: &'a SessionShared<'a>,
}

impl<'a> BuildSession<'a> {
  /// The container this session builds in.
  pub fn container(&self) -> Container {
    Container::from_state(self.scope.clone())
  }

  /// The external scope supplied with the root call, if any.
  pub fn external_scope(&self) -> Option<&'a ExternalScope> {
    self.shared.external
  }

  // --- RESOLUTION ---

  pub(crate) fn resolve(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Object> {
    if let Some(object) = self.explicit_default(service_type, name) {
      return Ok(object);
    }
    let found = self.scope.lookup(service_type, name)?;
    self.resolve_found(&found)
  }

  /// Like `resolve`, but a missing registration for the requested key itself
  /// yields `None`. Failures further down the object graph still propagate.
  pub(crate) fn try_resolve(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Option<Object>> {
    if let Some(object) = self.explicit_default(service_type, name) {
      return Ok(Some(object));
    }
    match self.scope.lookup(service_type, name) {
      Ok(found) => self.resolve_found(&found).map(Some),
      Err(err) if err.is_lookup_miss() => Ok(None),
      Err(err) => Err(err),
    }
  }

  /// Every instance of the family, visible from this scope, in registration order.
  pub(crate) fn resolve_all(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
    self
      .scope
      .all_instances(service_type)?
      .iter()
      .map(|found| self.resolve_found(found))
      .collect()
  }

  fn resolve_found(&self, found: &Resolved) -> Result<Object> {
    let lifecycle = found.family.lifecycle_of(&found.instance);
    self.resolve_instance(found.family.service_type(), &found.instance, &lifecycle, &found.scope)
  }

  fn resolve_reference(&self, reference: &InstanceRef, parameter: &ServiceType) -> Result<Object> {
    match reference {
      InstanceRef::Default(service_type) => self.resolve(service_type, None),
      InstanceRef::Named(service_type, name) => self.resolve(service_type, Some(name)),
      InstanceRef::Inline(instance) => {
        let service_type = instance.contract.clone().unwrap_or_else(|| parameter.clone());
        let lifecycle = instance
          .lifecycle
          .clone()
          .unwrap_or_else(|| self.scope.default_lifecycle());
        self.resolve_instance(&service_type, instance, &lifecycle, &self.scope)
      }
    }
  }

  fn resolve_instance(
    &self,
    service_type: &ServiceType,
    instance: &Arc<Instance>,
    lifecycle: &Arc<dyn Lifecycle>,
    declaring: &Arc<ScopeState>,
  ) -> Result<Object> {
    if let InstanceSource::Object(object) = &instance.source {
      return Ok(object.clone());
    }
    let _guard = ResolutionGuard::enter(instance.id, || format!("{} '{}'", service_type, instance.name))?;

    // Singletons are built where they are declared so that they never
    // capture objects owned by a shorter-lived nested container. That
    // includes transients this call already built in the nested container,
    // so the relocated build gets its own session cache.
    let detached;
    let relocated;
    let session = if lifecycle.builds_in_declaring_scope() && !Arc::ptr_eq(declaring, &self.scope) {
      detached = self.shared.detached();
      relocated = BuildSession {
        scope: declaring.clone(),
        shared: &detached,
      };
      &relocated
    } else {
      self
    };

    if self.uses_explicit_arguments(instance) {
      trace!(service = %service_type, instance = %instance.name, "building with explicit arguments");
      return self
        .shared
        .cache
        .get(instance.id, || session.build(service_type, instance));
    }

    let context = ScopeContext {
      scope: &*session.scope,
      session: &session.shared.cache,
      external: self.shared.external,
    };
    match lifecycle.find_cache(&context) {
      Some(cache) => cache.get(instance.id, || session.build(service_type, instance)),
      None => session.build(service_type, instance).map(|built| built.object),
    }
  }

  // --- BUILDING ---

  fn build(&self, service_type: &ServiceType, instance: &Instance) -> Result<Built> {
    let Built { object, disposer } = match &instance.source {
      InstanceSource::Constructed(plugged) => {
        let source = PlanArguments {
          session: self,
          service_type,
          concrete: plugged.concrete.name(),
          label: &instance.name,
          bindings: &instance.dependencies,
          inner: None,
        };
        let plan = self.plan(&plugged.concrete, &source, false)?;
        let raw = plan.build(&source)?;
        plugged.finish(raw, instance.disposal.as_ref())?
      }
      InstanceSource::Factory(factory) => {
        let object = factory(self).map_err(|err| Error::from_user(service_type.name(), &instance.name, err))?;
        let disposer = instance.disposal.as_ref().and_then(|hook| hook(object.as_any()));
        Built { object, disposer }
      }
      InstanceSource::Object(object) => Built::new(object.clone()),
      InstanceSource::Template(template) => {
        return Err(Error::PlanCompilation {
          concrete: format!("{}<>", template),
          reason: format!("an open template cannot be built for {}", service_type),
        })
      }
    };

    let graphs = self.scope.graph_chain();
    let rules = graphs.iter().flat_map(|graph| graph.interceptors().iter());
    match interception::apply(rules, Target::new(service_type, instance), object, self) {
      Ok(object) => Ok(Built { object, disposer }),
      Err(err) => {
        // The object never reaches a cache, so nothing else would dispose it.
        if let Some(dispose) = disposer {
          dispose();
        }
        Err(err)
      }
    }
  }

  fn plan(&self, concrete: &ConcreteType, source: &PlanArguments<'_>, populate_only: bool) -> Result<Arc<ConstructionPlan>> {
    let shape: Vec<Satisfaction> = ConstructionPlan::parameters(concrete)
      .map(|param| source.satisfaction(param))
      .collect();
    self.scope.plans().get_or_compile(concrete, shape, populate_only)
  }

  /// Builds a decorator whose parameter of the decorated type receives `inner`.
  pub(crate) fn decorate(&self, decorator: &PluggedType, inner: Object, service_type: &ServiceType) -> Result<Object> {
    let source = PlanArguments {
      session: self,
      service_type,
      concrete: decorator.concrete.name(),
      label: decorator.concrete.name(),
      bindings: &[],
      inner: Some((service_type, &inner)),
    };
    let plan = self.plan(&decorator.concrete, &source, false)?;
    let raw = plan.build(&source)?;
    Ok(decorator.finish(raw, None)?.object)
  }

  /// Injects every resolvable property of `target`.
  pub(crate) fn build_up(
    &self,
    service_type: &ServiceType,
    concrete: &ConcreteType,
    target: &mut (dyn Any + Send + Sync),
  ) -> Result<()> {
    let source = PlanArguments {
      session: self,
      service_type,
      concrete: concrete.name(),
      label: concrete.name(),
      bindings: &[],
      inner: None,
    };
    let plan = self.plan(concrete, &source, true)?;
    plan.populate(&source, target)
  }

  /// Compiles the plan an instance would build with, without building it.
  pub(crate) fn check_plan(&self, service_type: &ServiceType, instance: &Instance) -> Result<()> {
    if let InstanceSource::Constructed(plugged) = &instance.source {
      let source = PlanArguments {
        session: self,
        service_type,
        concrete: plugged.concrete.name(),
        label: &instance.name,
        bindings: &instance.dependencies,
        inner: None,
      };
      self.plan(&plugged.concrete, &source, false)?;
    }
    Ok(())
  }

  // --- EXPLICIT ARGUMENTS ---

  fn explicit_default(&self, service_type: &ServiceType, name: Option<&str>) -> Option<Object> {
    match name {
      Some(_) => None,
      None => self.shared.arguments?.default_of(service_type).cloned(),
    }
  }

  fn explicit_value(&self, name: &str, service_type: &ServiceType) -> Option<Object> {
    self.shared.arguments?.lookup(name, service_type).cloned()
  }

  fn uses_explicit_arguments(&self, instance: &Instance) -> bool {
    let (Some(arguments), Some(concrete)) = (self.shared.arguments, instance.concrete()) else {
      return false;
    };
    ConstructionPlan::parameters(concrete).any(|param| arguments.lookup(param.name(), param.service_type()).is_some())
  }

  fn can_resolve_default(&self, service_type: &ServiceType) -> bool {
    self.explicit_default(service_type, None).is_some() || self.scope.can_resolve(service_type)
  }
}

impl fmt::Debug for BuildSession<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildSession")
      .field("scope", &self.scope.name())
      .field("external", &self.shared.external.map(|e| e.name()))
      .field("explicit_arguments", &self.shared.arguments.is_some())
      .finish()
  }
}

impl Resolver for BuildSession<'_> {
  fn resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Object> {
    self.resolve(service_type, name)
  }

  fn try_resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Option<Object>> {
    self.try_resolve(service_type, name)
  }

  fn resolve_all_objects(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
    self.resolve_all(service_type)
  }
}

/// Argument values for one plan execution.
struct PlanArguments<'s> {
  session: &'s BuildSession<'s>,
  service_type: &'s ServiceType,
  concrete: &'static str,
  label: &'s str,
  bindings: &'s [(String, Dependency)],
  inner: Option<(&'s ServiceType, &'s Object)>,
}

impl PlanArguments<'_> {
  fn binding(&self, name: &str) -> Option<&Dependency> {
    self.bindings.iter().find(|(n, _)| n == name).map(|(_, d)| d)
  }

  fn inner_for(&self, service_type: &ServiceType) -> Option<&Object> {
    self
      .inner
      .filter(|(decorated, _)| *decorated == service_type)
      .map(|(_, object)| object)
  }

  fn satisfaction(&self, param: &ParameterInfo) -> Satisfaction {
    if self.inner_for(param.service_type()).is_some()
      || self.session.explicit_value(param.name(), param.service_type()).is_some()
    {
      return Some(ArgumentSourceKind::Explicit);
    }
    match self.binding(param.name()) {
      Some(Dependency::Value(_)) => Some(ArgumentSourceKind::Literal),
      Some(Dependency::Instance(_)) => Some(ArgumentSourceKind::Reference),
      Some(Dependency::Context) => Some(ArgumentSourceKind::Context),
      None if self.session.can_resolve_default(param.service_type()) => Some(ArgumentSourceKind::Context),
      None => None,
    }
  }

  fn missing(&self, step: &ArgumentStep) -> Error {
    Error::MissingArgument {
      concrete: self.concrete.to_owned(),
      name: step.name.to_owned(),
    }
  }
}

impl ArgumentSource for PlanArguments<'_> {
  fn argument(&self, step: &ArgumentStep) -> Result<Object> {
    match step.kind {
      ArgumentSourceKind::Explicit => match self.inner_for(&step.service_type) {
        Some(inner) => Ok(inner.clone()),
        None => self
          .session
          .explicit_value(step.name, &step.service_type)
          .ok_or_else(|| self.missing(step)),
      },
      ArgumentSourceKind::Literal | ArgumentSourceKind::Reference => match self.binding(step.name) {
        Some(Dependency::Value(value)) => Ok(value.clone()),
        Some(Dependency::Instance(reference)) => self.session.resolve_reference(reference, &step.service_type),
        Some(Dependency::Context) => self.session.resolve(&step.service_type, None),
        None => Err(self.missing(step)),
      },
      ArgumentSourceKind::Context => self.session.resolve(&step.service_type, None),
    }
  }

  fn fail(&self, err: BoxError) -> Error {
    Error::from_user(self.service_type.name(), self.label, err)
  }
}
