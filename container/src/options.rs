//! Container options and the consuming builder.

use crate::container::Container;
use crate::error::Result;
use crate::graph::Registry;
use crate::lifecycle::LifecycleKind;

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options of a root container. Nested containers inherit them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContainerOptions {
  /// Shown in logs, errors and the diagnostic model.
  pub name: String,
  /// Compile every construction plan when the container is built and fail
  /// the build if any cannot be compiled.
  pub validate_on_build: bool,
  /// Lifecycle of families that declare none.
  pub default_lifecycle: LifecycleKind,
}

impl Default for ContainerOptions {
  fn default() -> Self {
    Self {
      name: "root".to_owned(),
      validate_on_build: false,
      default_lifecycle: LifecycleKind::Transient,
    }
  }
}

type ConfigureFn = Box<dyn FnOnce(&mut Registry)>;

/// A builder for root `Container`s.
///
/// ```
/// use fibre_container::{Container, LifecycleKind, Resolver};
/// use std::sync::Arc;
///
/// let container = Container::builder()
///   .name("app")
///   .default_lifecycle(LifecycleKind::Singleton)
///   .configure(|r| {
///     r.for_type::<String>().use_object(Arc::new("hello".to_owned()));
///   })
///   .build()
///   .unwrap();
///
/// assert_eq!(container.name(), "app");
/// assert_eq!(*container.get::<String>().unwrap(), "hello");
/// ```
#[derive(Default)]
pub struct ContainerBuilder {
  options: ContainerOptions,
  configure: Vec<ConfigureFn>,
}

impl ContainerBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.options.name = name.into();
    self
  }

  pub fn validate_on_build(mut self, validate: bool) -> Self {
    self.options.validate_on_build = validate;
    self
  }

  pub fn default_lifecycle(mut self, kind: LifecycleKind) -> Self {
    self.options.default_lifecycle = kind;
    self
  }

  /// Replaces all options at once, e.g. with deserialized ones.
  pub fn options(mut self, options: ContainerOptions) -> Self {
    self.options = options;
    self
  }

  /// Adds a registration step. Steps run in order against one registry.
  pub fn configure(mut self, configure: impl FnOnce(&mut Registry) + 'static) -> Self {
    self.configure.push(Box::new(configure));
    self
  }

  pub fn build(self) -> Result<Container> {
    let steps = self.configure;
    Container::build(self.options, move |registry| {
      for step in steps {
        step(registry);
      }
    })
  }
}

impl fmt::Debug for ContainerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContainerBuilder")
      .field("options", &self.options)
      .field("configure_steps", &self.configure.len())
      .finish()
  }
}
