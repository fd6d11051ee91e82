//! # Fibre Container
//!
//! A lifecycle-aware dependency resolution engine for Rust.
//!
//! Services are described declaratively: every requested contract type owns a
//! *family* of *instances*, each a concrete way of building the contract. The
//! container turns those descriptions into compiled construction plans, wires
//! object graphs on demand and decides per instance whether to build a new
//! object or to reuse one cached for the right scope.
//!
//! ## Core Concepts
//!
//! - **Registry**: the registration DSL. `for_type::<dyn Trait>()` configures a
//!   family, `use_concrete`, `use_factory` and `use_object` add instances.
//! - **ConcreteType**: a data-only descriptor of a concrete type's constructors
//!   and settable properties. The engine reads nothing else.
//! - **Lifecycle**: the reuse policy of an instance: transient per resolve
//!   call, always unique, singleton, per container, per thread, or hybrid.
//! - **Container**: a sealed configuration plus the object caches of one
//!   scope. Nested containers inherit their parent's configuration, share its
//!   singletons and own their scoped objects.
//! - **Interception**: activation, validation, enrichment and decoration rules
//!   applied to every freshly built object they match.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_container::{resolve, ConcreteType, Container, LifecycleKind, Resolver};
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!   fn log(&self, message: &str) -> String;
//! }
//!
//! #[derive(Default)]
//! struct ConsoleLogger;
//!
//! impl Logger for ConsoleLogger {
//!   fn log(&self, message: &str) -> String {
//!     format!("[console] {}", message)
//!   }
//! }
//!
//! struct Service {
//!   logger: Arc<dyn Logger>,
//! }
//!
//! let container = Container::new(|r| {
//!   r.for_type::<dyn Logger>()
//!     .lifecycle(LifecycleKind::Singleton)
//!     .use_concrete(ConcreteType::with_default::<ConsoleLogger>(), |c| c);
//!
//!   let service = ConcreteType::builder::<Service>()
//!     .constructor(|ctor| {
//!       ctor
//!         .param::<dyn Logger>("logger")
//!         .build(|args| Ok(Service { logger: args.get("logger")? }))
//!     })
//!     .build();
//!   r.for_type::<Service>().use_concrete(service, |s| s);
//! })
//! .unwrap();
//!
//! let first = container.get::<Service>().unwrap();
//! let second = resolve!(container, Service);
//!
//! assert!(!Arc::ptr_eq(&first, &second));
//! assert!(Arc::ptr_eq(&first.logger, &second.logger));
//! assert_eq!(first.logger.log("ready"), "[console] ready");
//! ```

mod cache;
mod concrete;
mod container;
mod core;
mod error;
mod generic;
mod graph;
mod interception;
mod lifecycle;
mod macros;
mod model;
mod options;
mod plan;
mod resolver;
mod session;

pub use cache::{Disposable, ObjectCache};
pub use concrete::{
  Arguments, Concrete, ConcreteBuilder, ConcreteType, ConstructorBuilder, ConstructorInfo, ParameterInfo, SetterInfo,
};
pub use container::Container;
pub use core::{GenericArguments, InstanceId, Object, ServiceType};
pub use error::{BoxError, ConfigurationError, Error, Result};
pub use generic::ClosedGeneric;
pub use graph::{
  Dependency, FamilyExpression, GenericFamilyExpression, Implementation, Instance, InstanceExpression, InstanceRef,
  Registry, TemplateExpression,
};
pub use interception::{InterceptionContext, InterceptionRole, InterceptorRule, Target};
pub use lifecycle::{
  AlwaysUniqueLifecycle, ContainerLifecycle, ExternalScope, HybridLifecycle, Lifecycle, LifecycleKind, ScopeContext,
  SingletonLifecycle, ThreadLocalLifecycle, TransientLifecycle,
};
pub use model::{ContainerModel, DependencyModel, FamilyModel, InstanceModel, ValidationFailure, ValidationReport};
pub use options::{ContainerBuilder, ContainerOptions};
pub use resolver::{ContextResolver, ExplicitArguments, Resolver};
pub use session::BuildSession;
