//! Read-only diagnostic snapshots of a container's configuration.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A snapshot of every family visible from one container.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContainerModel {
  pub container: String,
  /// Root first, this container last.
  pub scopes: Vec<String>,
  pub families: Vec<FamilyModel>,
}

impl ContainerModel {
  /// Families whose service type name is exactly `service_type`.
  pub fn families_of<'m>(&'m self, service_type: &'m str) -> impl Iterator<Item = &'m FamilyModel> + 'm {
    self.families.iter().filter(move |f| f.service_type == service_type)
  }

  pub fn instance_count(&self) -> usize {
    self.families.iter().map(|f| f.instances.len()).sum()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FamilyModel {
  pub service_type: String,
  /// The container whose configuration declares this family.
  pub scope: String,
  pub lifecycle: String,
  /// Whether the lifecycle was set on the family rather than defaulted.
  pub lifecycle_declared: bool,
  pub default_instance: Option<String>,
  pub fallback: Option<String>,
  pub instances: Vec<InstanceModel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InstanceModel {
  pub name: String,
  pub description: String,
  /// The effective lifecycle.
  pub lifecycle: String,
  /// Whether the cache this container would use already holds an object.
  pub has_been_built: bool,
  pub dependencies: Vec<DependencyModel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DependencyModel {
  pub name: String,
  pub source: String,
}

/// The outcome of `Container::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValidationReport {
  pub container: String,
  pub checked: usize,
  pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    self.failures.is_empty()
  }
}

impl fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_valid() {
      return write!(f, "container '{}': {} instances valid", self.container, self.checked);
    }
    writeln!(
      f,
      "container '{}': {} of {} instances invalid",
      self.container,
      self.failures.len(),
      self.checked
    )?;
    for failure in &self.failures {
      writeln!(f, "  {}", failure)?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValidationFailure {
  pub service_type: String,
  pub instance: String,
  pub message: String,
}

impl fmt::Display for ValidationFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} '{}': {}", self.service_type, self.instance, self.message)
  }
}
