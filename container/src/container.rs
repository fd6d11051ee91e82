//! The `Container` handle and the scope hierarchy behind it.

use crate::cache::ObjectCache;
use crate::concrete::ConcreteType;
use crate::core::{InstanceId, Object, ServiceType};
use crate::error::{Error, Result};
use crate::graph::{ConfigurationGraph, Dependency, Family, GraphView, Instance, InstanceRef, InstanceSource, Registry};
use crate::lifecycle::{ExternalScope, Lifecycle, ScopeContext};
use crate::model::{ContainerModel, DependencyModel, FamilyModel, InstanceModel, ValidationFailure, ValidationReport};
use crate::options::{ContainerBuilder, ContainerOptions};
use crate::plan::PlanCache;
use crate::resolver::{ContextResolver, ExplicitArguments, Resolver};
use crate::session::with_session;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Where a lookup found its instance.
pub(crate) struct Resolved {
  pub(crate) family: Arc<Family>,
  pub(crate) instance: Arc<Instance>,
  /// The container whose configuration declares the instance.
  pub(crate) scope: Arc<ScopeState>,
}

/// One container in the hierarchy: its local configuration and the caches it
/// owns. The singleton cache and the plan cache are shared from the root.
pub(crate) struct ScopeState {
  id: u64,
  name: String,
  options: ContainerOptions,
  parent: Option<Arc<ScopeState>>,
  graph: RwLock<Arc<ConfigurationGraph>>,
  configuring: Mutex<()>,
  singletons: Arc<ObjectCache>,
  scoped: Arc<ObjectCache>,
  threads: DashMap<ThreadId, Arc<ObjectCache>>,
  plans: Arc<PlanCache>,
  children: Mutex<Vec<Weak<ScopeState>>>,
  child_count: AtomicU64,
  disposed: AtomicBool,
}

impl ScopeState {
  fn root(options: ContainerOptions, graph: ConfigurationGraph) -> Self {
    let name = options.name.clone();
    Self {
      id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
      singletons: Arc::new(ObjectCache::new(format!("{}:singletons", name))),
      scoped: Arc::new(ObjectCache::new(format!("{}:scoped", name))),
      name,
      options,
      parent: None,
      graph: RwLock::new(Arc::new(graph)),
      configuring: Mutex::new(()),
      threads: DashMap::new(),
      plans: Arc::new(PlanCache::new()),
      children: Mutex::new(Vec::new()),
      child_count: AtomicU64::new(0),
      disposed: AtomicBool::new(false),
    }
  }

  fn child(parent: &Arc<ScopeState>, name: String) -> Self {
    let graph = ConfigurationGraph::empty(parent.options.default_lifecycle);
    Self {
      id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
      scoped: Arc::new(ObjectCache::new(format!("{}:scoped", name))),
      name,
      options: parent.options.clone(),
      parent: Some(parent.clone()),
      graph: RwLock::new(Arc::new(graph)),
      configuring: Mutex::new(()),
      singletons: parent.singletons.clone(),
      threads: DashMap::new(),
      plans: parent.plans.clone(),
      children: Mutex::new(Vec::new()),
      child_count: AtomicU64::new(0),
      disposed: AtomicBool::new(false),
    }
  }

  pub(crate) fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn singletons(&self) -> Arc<ObjectCache> {
    self.singletons.clone()
  }

  pub(crate) fn scoped(&self) -> Arc<ObjectCache> {
    self.scoped.clone()
  }

  pub(crate) fn thread_cache(&self) -> Arc<ObjectCache> {
    let thread = thread::current().id();
    let cache = self
      .threads
      .entry(thread)
      .or_insert_with(|| Arc::new(ObjectCache::new(format!("{}:thread:{:?}", self.name, thread))))
      .value()
      .clone();
    // A cache created after `dispose` drained the map is never reached by it.
    if self.disposed.load(Ordering::Acquire) {
      cache.close();
    }
    cache
  }

  pub(crate) fn plans(&self) -> &PlanCache {
    &self.plans
  }

  pub(crate) fn default_lifecycle(&self) -> Arc<dyn Lifecycle> {
    self.options.default_lifecycle.policy()
  }

  pub(crate) fn ensure_alive(&self) -> Result<()> {
    if self.disposed.load(Ordering::Acquire) {
      return Err(Error::ScopeDisposed {
        scope: self.name.clone(),
      });
    }
    Ok(())
  }

  fn graph(&self) -> Arc<ConfigurationGraph> {
    self.graph.read().clone()
  }

  /// This container and its ancestors, nearest first.
  fn ancestry(self: &Arc<Self>) -> impl Iterator<Item = Arc<ScopeState>> {
    std::iter::successors(Some(self.clone()), |scope| scope.parent.clone())
  }

  /// The graphs visible from this container, root first.
  pub(crate) fn graph_chain(self: &Arc<Self>) -> Vec<Arc<ConfigurationGraph>> {
    let mut graphs: Vec<_> = self.ancestry().map(|scope| scope.graph()).collect();
    graphs.reverse();
    graphs
  }

  /// Finds the default (or the named) instance, nearest container first.
  pub(crate) fn lookup(self: &Arc<Self>, service_type: &ServiceType, name: Option<&str>) -> Result<Resolved> {
    for scope in self.ancestry() {
      let Some(family) = scope.graph().family(service_type)? else {
        continue;
      };
      let instance = match name {
        Some(name) => family.named(name),
        None => family.default_instance(),
      };
      if let Some(instance) = instance.cloned() {
        return Ok(Resolved {
          family,
          instance,
          scope,
        });
      }
    }

    Err(match name {
      Some(name) => Error::UnknownInstance {
        service_type: service_type.to_string(),
        name: name.to_owned(),
      },
      None => Error::NoDefaultInstance {
        service_type: service_type.to_string(),
      },
    })
  }

  /// Every instance of the family, root registrations first. A nested
  /// container's instance replaces an inherited one of the same name.
  pub(crate) fn all_instances(self: &Arc<Self>, service_type: &ServiceType) -> Result<Vec<Resolved>> {
    let mut scopes: Vec<_> = self.ancestry().collect();
    scopes.reverse();

    let mut found: Vec<Resolved> = Vec::new();
    for scope in scopes {
      let Some(family) = scope.graph().family(service_type)? else {
        continue;
      };
      for instance in family.instances() {
        let resolved = Resolved {
          family: family.clone(),
          instance: instance.clone(),
          scope: scope.clone(),
        };
        match found.iter_mut().find(|r| r.instance.name == instance.name) {
          Some(slot) => *slot = resolved,
          None => found.push(resolved),
        }
      }
    }
    Ok(found)
  }

  pub(crate) fn can_resolve(self: &Arc<Self>, service_type: &ServiceType) -> bool {
    self.ancestry().any(|scope| scope.graph().can_resolve_default(service_type))
  }

  fn concrete(self: &Arc<Self>, type_id: TypeId) -> Option<ConcreteType> {
    self.ancestry().find_map(|scope| scope.graph().concrete(type_id).cloned())
  }

  fn register_child(&self, child: &Arc<ScopeState>) {
    let mut children = self.children.lock();
    children.retain(|weak| weak.strong_count() > 0);
    children.push(Arc::downgrade(child));
  }

  /// Disposes this container, its nested containers and the caches it owns.
  ///
  /// The shared singleton cache is only closed by the root; a nested
  /// container ejects just the singletons it declared itself.
  pub(crate) fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }

    let children: Vec<Arc<ScopeState>> = self
      .children
      .lock()
      .drain(..)
      .filter_map(|weak| weak.upgrade())
      .collect();
    if !children.is_empty() {
      warn!(
        scope = %self.name,
        children = children.len(),
        "disposing a container that still has live nested containers"
      );
    }
    for child in children {
      child.dispose();
    }

    self.scoped.close();
    let threads: Vec<Arc<ObjectCache>> = self.threads.iter().map(|e| e.value().clone()).collect();
    self.threads.clear();
    for cache in threads {
      cache.close();
    }
    if self.parent.is_none() {
      self.singletons.close();
    } else {
      for id in self.graph().instance_ids() {
        self.singletons.eject(id);
      }
    }
    debug!(scope = %self.name, id = self.id, "container disposed");
  }
}

impl GraphView for Arc<ScopeState> {
  fn can_resolve_default(&self, service_type: &ServiceType) -> bool {
    self.can_resolve(service_type)
  }

  fn has_named(&self, service_type: &ServiceType, name: &str) -> bool {
    self.ancestry().any(|scope| scope.graph().has_named(service_type, name))
  }
}

impl Drop for ScopeState {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// A root or nested container.
///
/// `Container` is a cheap handle; clones share the same scope. The scope is
/// disposed by `dispose` or when its last handle and every nested container
/// created from it are gone.
///
/// ```
/// use fibre_container::{ConcreteType, Container, LifecycleKind, Resolver};
/// use std::sync::Arc;
///
/// trait Clock: Send + Sync {
///   fn now(&self) -> u64;
/// }
///
/// #[derive(Default)]
/// struct FixedClock;
///
/// impl Clock for FixedClock {
///   fn now(&self) -> u64 {
///     42
///   }
/// }
///
/// let container = Container::new(|r| {
///   r.for_type::<dyn Clock>()
///     .lifecycle(LifecycleKind::Singleton)
///     .use_concrete(ConcreteType::with_default::<FixedClock>(), |c| c);
/// })
/// .unwrap();
///
/// let request = container.create_child().unwrap();
/// let a = container.get::<dyn Clock>().unwrap();
/// let b = request.get::<dyn Clock>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(b.now(), 42);
/// ```
#[derive(Clone)]
pub struct Container {
  state: Arc<ScopeState>,
}

impl Container {
  /// Builds a root container with default options.
  pub fn new(configure: impl FnOnce(&mut Registry)) -> Result<Self> {
    Self::build(ContainerOptions::default(), configure)
  }

  pub fn builder() -> ContainerBuilder {
    ContainerBuilder::new()
  }

  /// Builds a root container from a registry closure and seals it.
  pub fn build(options: ContainerOptions, configure: impl FnOnce(&mut Registry)) -> Result<Self> {
    let mut registry = Registry::with_default_lifecycle(options.default_lifecycle);
    configure(&mut registry);
    let graph = ConfigurationGraph::seal(registry, None)?;

    let validate = options.validate_on_build;
    let container = Self {
      state: Arc::new(ScopeState::root(options, graph)),
    };
    debug!(scope = %container.name(), "container built");

    if validate {
      let report = container.validate();
      if !report.is_valid() {
        return Err(Error::Validation(report));
      }
    }
    Ok(container)
  }

  pub(crate) fn from_state(state: Arc<ScopeState>) -> Self {
    Self { state }
  }

  pub(crate) fn state(&self) -> &Arc<ScopeState> {
    &self.state
  }

  pub fn name(&self) -> &str {
    self.state.name()
  }

  pub fn is_root(&self) -> bool {
    self.state.parent.is_none()
  }

  pub fn is_disposed(&self) -> bool {
    self.state.disposed.load(Ordering::Acquire)
  }

  // --- Scope Hierarchy ---

  /// Creates a nested container with a generated name.
  pub fn create_child(&self) -> Result<Self> {
    let seq = self.state.child_count.fetch_add(1, Ordering::Relaxed) + 1;
    self.create_child_named(format!("{}/{}", self.state.name, seq))
  }

  /// Creates a nested container.
  ///
  /// It sees every registration of this container, shares its singletons,
  /// and owns its own container-scoped and thread-local caches.
  pub fn create_child_named(&self, name: impl Into<String>) -> Result<Self> {
    self.state.ensure_alive()?;
    let child = Arc::new(ScopeState::child(&self.state, name.into()));
    self.state.register_child(&child);
    debug!(parent = %self.state.name, scope = %child.name, "nested container created");
    Ok(Self { state: child })
  }

  /// Adds or overrides registrations local to this container.
  ///
  /// The local registry is resealed and swapped in atomically; instances
  /// registered earlier keep their identity, as do the closed instances of
  /// open generic families, so objects they already cached stay valid.
  pub fn configure(&self, configure: impl FnOnce(&mut Registry)) -> Result<()> {
    self.state.ensure_alive()?;
    let _serialized = self.state.configuring.lock();

    let current = self.state.graph();
    let mut registry = current.registry().clone();
    configure(&mut registry);
    let parent = self.state.parent.as_ref().map(|p| p as &dyn GraphView);
    let sealed = current.reseal(registry, parent)?;
    *self.state.graph.write() = Arc::new(sealed);

    debug!(scope = %self.state.name, "container reconfigured");
    Ok(())
  }

  /// Places a pre-built object as the local default of `S`.
  pub fn inject<S: ?Sized + Send + Sync + 'static>(&self, value: Arc<S>) -> Result<()> {
    self.configure(|r| {
      r.for_type::<S>().use_object(value);
    })
  }

  /// Disposes this container and every nested container created from it.
  pub fn dispose(&self) {
    self.state.dispose();
  }

  // --- Per-call Context ---

  /// Resolves with `external` as the scope of hybrid-lifecycle objects.
  pub fn with_context<'c>(&'c self, external: &'c ExternalScope) -> ContextResolver<'c> {
    ContextResolver::new(self).with_context(external)
  }

  /// Resolves with explicit arguments.
  pub fn with_arguments<'c>(&'c self, arguments: &'c ExplicitArguments) -> ContextResolver<'c> {
    ContextResolver::new(self).with_arguments(arguments)
  }

  // --- Lifecycle Management ---

  /// Injects every resolvable property of an object built elsewhere, using
  /// the descriptor registered for `C` with `Registry::concrete`.
  pub fn build_up<C: Any + Send + Sync>(&self, target: &mut C) -> Result<()> {
    let service_type = ServiceType::of::<C>();
    let concrete = self
      .state
      .concrete(TypeId::of::<C>())
      .ok_or_else(|| Error::PlanCompilation {
        concrete: service_type.to_string(),
        reason: "no concrete descriptor is registered for build-up".to_owned(),
      })?;
    with_session(&self.state, None, None, |session| {
      session.build_up(&service_type, &concrete, target)
    })
  }

  /// Removes and disposes every cached object of the family that resolves
  /// from this container would use.
  pub fn eject_all_of(&self, service_type: &ServiceType) -> Result<()> {
    self.state.ensure_alive()?;
    let session = Arc::new(ObjectCache::new("eject"));
    let mut ejected = 0;
    for found in self.state.all_instances(service_type)? {
      let lifecycle = found.family.lifecycle_of(&found.instance);
      let scope = if lifecycle.builds_in_declaring_scope() {
        &found.scope
      } else {
        &self.state
      };
      let context = ScopeContext {
        scope: scope.as_ref(),
        session: &session,
        external: None,
      };
      if let Some(cache) = lifecycle.find_cache(&context) {
        if cache.has(found.instance.id) {
          ejected += 1;
        }
        cache.eject(found.instance.id);
      }
    }
    debug!(scope = %self.state.name, service = %service_type, ejected, "ejected cached objects");
    Ok(())
  }

  // --- Diagnostics ---

  /// A snapshot of every family visible from this container.
  pub fn model(&self) -> ContainerModel {
    let session = Arc::new(ObjectCache::new("model"));
    let mut scopes: Vec<Arc<ScopeState>> = self.state.ancestry().collect();
    scopes.reverse();

    let mut families = Vec::new();
    for scope in &scopes {
      for family in scope.graph().families() {
        let instances = family
          .instances()
          .iter()
          .map(|instance| {
            let lifecycle = family.lifecycle_of(instance);
            let built = match instance.source {
              InstanceSource::Object(_) => true,
              _ => {
                let owner = if lifecycle.builds_in_declaring_scope() {
                  scope
                } else {
                  &self.state
                };
                let context = ScopeContext {
                  scope: owner.as_ref(),
                  session: &session,
                  external: None,
                };
                lifecycle
                  .find_cache(&context)
                  .is_some_and(|cache| cache.has(instance.id))
              }
            };
            InstanceModel {
              name: instance.name().to_owned(),
              description: instance.describe(),
              lifecycle: lifecycle.name().to_owned(),
              has_been_built: built,
              dependencies: instance
                .dependencies()
                .map(|(name, dependency)| DependencyModel {
                  name: name.to_owned(),
                  source: describe_dependency(dependency),
                })
                .collect(),
            }
          })
          .collect();

        families.push(FamilyModel {
          service_type: family.service_type().to_string(),
          scope: scope.name.clone(),
          lifecycle: family.lifecycle().name().to_owned(),
          lifecycle_declared: family.declared_lifecycle(),
          default_instance: family.default_instance().map(|i| i.name().to_owned()),
          fallback: family.fallback().map(|i| i.name().to_owned()),
          instances,
        });
      }
    }

    ContainerModel {
      container: self.state.name.clone(),
      scopes: scopes.iter().map(|s| s.name.clone()).collect(),
      families,
    }
  }

  /// Compiles the construction plan of every visible instance and checks
  /// every explicit reference, reporting all failures at once.
  pub fn validate(&self) -> ValidationReport {
    let mut report = ValidationReport {
      container: self.state.name.clone(),
      ..ValidationReport::default()
    };

    let outcome = with_session(&self.state, None, None, |session| {
      for graph in self.state.graph_chain() {
        for family in graph.families() {
          for instance in family.instances().iter().chain(family.fallback()) {
            if matches!(instance.source, InstanceSource::Template(_)) {
              continue;
            }
            report.checked += 1;
            let mut fail = |message: String| {
              report.failures.push(ValidationFailure {
                service_type: family.service_type().to_string(),
                instance: instance.name().to_owned(),
                message,
              })
            };
            if let Err(err) = session.check_plan(family.service_type(), instance) {
              fail(err.to_string());
            }
            self.check_references(instance, &mut fail);
          }
        }
      }
      Ok(())
    });
    if let Err(err) = outcome {
      report.failures.push(ValidationFailure {
        service_type: String::new(),
        instance: String::new(),
        message: err.to_string(),
      });
    }

    debug!(scope = %self.state.name, checked = report.checked, failures = report.failures.len(), "validated configuration");
    report
  }

  fn check_references(&self, instance: &Instance, fail: &mut dyn FnMut(String)) {
    for (name, dependency) in instance.dependencies() {
      let Dependency::Instance(reference) = dependency else {
        continue;
      };
      let lookup = match reference {
        InstanceRef::Default(target) => self.state.lookup(target, None),
        InstanceRef::Named(target, named) => self.state.lookup(target, Some(named)),
        InstanceRef::Inline(inline) => {
          self.check_references(inline, fail);
          continue;
        }
      };
      if let Err(err) = lookup {
        fail(format!("dependency '{}': {}", name, err));
      }
    }
  }

  /// Number of distinct construction plans compiled by this container tree.
  pub fn compiled_plan_count(&self) -> u64 {
    self.state.plans.compile_count()
  }

  /// The identities of the instances `service_type` resolves to from here.
  pub fn instance_ids(&self, service_type: &ServiceType) -> Result<Vec<InstanceId>> {
    Ok(
      self
        .state
        .all_instances(service_type)?
        .iter()
        .map(|found| found.instance.id())
        .collect(),
    )
  }
}

fn describe_dependency(dependency: &Dependency) -> String {
  match dependency {
    Dependency::Value(object) => format!("value of {}", object.type_name()),
    Dependency::Instance(InstanceRef::Default(target)) => format!("default of {}", target),
    Dependency::Instance(InstanceRef::Named(target, name)) => format!("'{}' of {}", name, target),
    Dependency::Instance(InstanceRef::Inline(instance)) => format!("inline {}", instance.describe()),
    Dependency::Context => "context".to_owned(),
  }
}

impl Resolver for Container {
  fn resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Object> {
    with_session(&self.state, None, None, |session| session.resolve(service_type, name))
  }

  fn try_resolve_object(&self, service_type: &ServiceType, name: Option<&str>) -> Result<Option<Object>> {
    with_session(&self.state, None, None, |session| session.try_resolve(service_type, name))
  }

  fn resolve_all_objects(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
    with_session(&self.state, None, None, |session| session.resolve_all(service_type))
  }
}

impl fmt::Debug for Container {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Container")
      .field("name", &self.state.name)
      .field("root", &self.is_root())
      .field("disposed", &self.is_disposed())
      .field("graph", &*self.state.graph())
      .finish()
  }
}
