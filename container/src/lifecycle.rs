//! Lifecycle policies: which object cache, if any, backs a resolve.

use crate::cache::ObjectCache;
use crate::container::ScopeState;

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The built-in lifecycle policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LifecycleKind {
  /// Built once per root resolve call and shared inside that object graph.
  #[default]
  Transient,
  /// Never reused, not even by two dependents inside one object graph.
  AlwaysUnique,
  /// One object per root container, shared by every nested container.
  Singleton,
  /// One object per container; nested containers get their own.
  ContainerScoped,
  /// One object per container and calling thread.
  ThreadLocal,
  /// Uses the external scope supplied with the resolve call, else `ThreadLocal`.
  Hybrid,
}

impl LifecycleKind {
  /// The policy object implementing this kind.
  pub fn policy(self) -> Arc<dyn Lifecycle> {
    match self {
      LifecycleKind::Transient => Arc::new(TransientLifecycle),
      LifecycleKind::AlwaysUnique => Arc::new(AlwaysUniqueLifecycle),
      LifecycleKind::Singleton => Arc::new(SingletonLifecycle),
      LifecycleKind::ContainerScoped => Arc::new(ContainerLifecycle),
      LifecycleKind::ThreadLocal => Arc::new(ThreadLocalLifecycle),
      LifecycleKind::Hybrid => Arc::new(HybridLifecycle),
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      LifecycleKind::Transient => "Transient",
      LifecycleKind::AlwaysUnique => "AlwaysUnique",
      LifecycleKind::Singleton => "Singleton",
      LifecycleKind::ContainerScoped => "ContainerScoped",
      LifecycleKind::ThreadLocal => "ThreadLocal",
      LifecycleKind::Hybrid => "Hybrid",
    }
  }
}

impl fmt::Display for LifecycleKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A pluggable reuse policy.
///
/// Implementations map the scope context of one resolve call to the object
/// cache that holds (or will hold) the instance. Returning `None` means the
/// instance is built every time it is reached.
pub trait Lifecycle: Send + Sync {
  fn name(&self) -> &str;

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>>;

  /// Whether objects are built from the container that declares the
  /// instance rather than the container the request came through.
  fn builds_in_declaring_scope(&self) -> bool {
    false
  }
}

impl fmt::Debug for dyn Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Lifecycle({})", self.name())
  }
}

/// An external unit of work, such as one inbound request, that owns its own
/// object cache. Hybrid-lifecycle objects live here when one is supplied.
///
/// Dropping the scope disposes everything it cached.
pub struct ExternalScope {
  name: String,
  cache: Arc<ObjectCache>,
}

impl ExternalScope {
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      cache: Arc::new(ObjectCache::new(format!("external:{}", name))),
      name,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn cache(&self) -> Arc<ObjectCache> {
    self.cache.clone()
  }

  /// Disposes every object cached for this scope.
  pub fn dispose(&self) {
    self.cache.eject_all();
  }
}

impl Drop for ExternalScope {
  fn drop(&mut self) {
    self.cache.eject_all();
  }
}

impl fmt::Debug for ExternalScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExternalScope").field("name", &self.name).finish()
  }
}

/// Everything a lifecycle may consult for one resolve call.
pub struct ScopeContext<'a> {
  pub(crate) scope: &'a ScopeState,
  pub(crate) session: &'a Arc<ObjectCache>,
  pub(crate) external: Option<&'a ExternalScope>,
}

impl<'a> ScopeContext<'a> {
  /// The name of the container the resolve is running in.
  pub fn scope_name(&self) -> &str {
    self.scope.name()
  }

  /// The singleton cache of the root container.
  pub fn root_cache(&self) -> Arc<ObjectCache> {
    self.scope.singletons()
  }

  /// The cache private to the current container.
  pub fn container_cache(&self) -> Arc<ObjectCache> {
    self.scope.scoped()
  }

  /// The cache of the current container for the calling thread.
  pub fn thread_cache(&self) -> Arc<ObjectCache> {
    self.scope.thread_cache()
  }

  /// The cache that lives for one root resolve call.
  pub fn session_cache(&self) -> Arc<ObjectCache> {
    self.session.clone()
  }

  pub fn external(&self) -> Option<&'a ExternalScope> {
    self.external
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransientLifecycle;

impl Lifecycle for TransientLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::Transient.name()
  }

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    Some(context.session_cache())
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUniqueLifecycle;

impl Lifecycle for AlwaysUniqueLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::AlwaysUnique.name()
  }

  fn find_cache(&self, _context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    None
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SingletonLifecycle;

impl Lifecycle for SingletonLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::Singleton.name()
  }

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    Some(context.root_cache())
  }

  fn builds_in_declaring_scope(&self) -> bool {
    true
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerLifecycle;

impl Lifecycle for ContainerLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::ContainerScoped.name()
  }

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    Some(context.container_cache())
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLocalLifecycle;

impl Lifecycle for ThreadLocalLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::ThreadLocal.name()
  }

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    Some(context.thread_cache())
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HybridLifecycle;

impl Lifecycle for HybridLifecycle {
  fn name(&self) -> &str {
    LifecycleKind::Hybrid.name()
  }

  fn find_cache(&self, context: &ScopeContext<'_>) -> Option<Arc<ObjectCache>> {
    match context.external() {
      Some(external) => Some(external.cache()),
      None => Some(context.thread_cache()),
    }
  }
}
