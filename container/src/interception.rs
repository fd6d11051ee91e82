//! The interception pipeline: ordered transforms applied to freshly built objects.

use crate::concrete::ConcreteType;
use crate::core::{Object, ServiceType, TypeKey};
use crate::error::{BoxError, Error, Result};
use crate::graph::Instance;
use crate::session::BuildSession;

use std::fmt;
use std::sync::Arc;

use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What a rule does with the object it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InterceptionRole {
  /// Runs a side effect and passes the same object on.
  Activate,
  /// Replaces the object with a value derived from it.
  Enrich,
  /// Wraps the object in another implementation of the same contract.
  Decorate,
  /// Checks the object and fails the build when the check fails.
  Validate,
}

/// The object a rule is asked about.
#[derive(Clone, Copy)]
pub struct Target<'a> {
  service_type: &'a ServiceType,
  instance: &'a Instance,
}

impl<'a> Target<'a> {
  pub(crate) fn new(service_type: &'a ServiceType, instance: &'a Instance) -> Self {
    Self {
      service_type,
      instance,
    }
  }

  pub fn service_type(&self) -> &'a ServiceType {
    self.service_type
  }

  pub fn instance(&self) -> &'a Instance {
    self.instance
  }

  /// The concrete descriptor, for constructed instances.
  pub fn concrete(&self) -> Option<&'a ConcreteType> {
    self.instance.concrete()
  }
}

/// Handed to every interceptor: the target plus the build session, which
/// resolves further services in the same scope context.
pub struct InterceptionContext<'a> {
  session: &'a BuildSession<'a>,
  target: Target<'a>,
}

impl<'a> InterceptionContext<'a> {
  pub fn session(&self) -> &'a BuildSession<'a> {
    self.session
  }

  pub fn target(&self) -> &Target<'a> {
    &self.target
  }
}

type Predicate = Arc<dyn Fn(&Target<'_>) -> bool + Send + Sync>;
type InspectFn =
  Arc<dyn Fn(&Object, &InterceptionContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync>;
type TransformFn =
  Arc<dyn Fn(Object, &InterceptionContext<'_>) -> std::result::Result<Object, BoxError> + Send + Sync>;

#[derive(Clone)]
enum Action {
  Inspect(InspectFn),
  Transform(TransformFn),
}

/// A type predicate, a role and the transform it applies.
#[derive(Clone)]
pub struct InterceptorRule {
  role: InterceptionRole,
  description: String,
  predicate: Predicate,
  action: Action,
}

impl InterceptorRule {
  fn inspecting(
    role: InterceptionRole,
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    inspect: impl Fn(&Object, &InterceptionContext<'_>) -> std::result::Result<(), BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self {
      role,
      description: description.into(),
      predicate: Arc::new(predicate),
      action: Action::Inspect(Arc::new(inspect)),
    }
  }

  fn transforming(
    role: InterceptionRole,
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    transform: impl Fn(Object, &InterceptionContext<'_>) -> std::result::Result<Object, BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self {
      role,
      description: description.into(),
      predicate: Arc::new(predicate),
      action: Action::Transform(Arc::new(transform)),
    }
  }

  /// A rule that runs `callback` on every matching object.
  pub fn activate(
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    callback: impl Fn(&Object, &InterceptionContext<'_>) + Send + Sync + 'static,
  ) -> Self {
    Self::inspecting(
      InterceptionRole::Activate,
      description,
      predicate,
      move |object, context| {
        callback(object, context);
        Ok(())
      },
    )
  }

  /// A rule whose check fails the build of every matching object it rejects.
  pub fn validate(
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    check: impl Fn(&Object, &InterceptionContext<'_>) -> std::result::Result<(), BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self::inspecting(InterceptionRole::Validate, description, predicate, check)
  }

  /// A rule that replaces every matching object with `transform(object)`.
  pub fn enrich(
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    transform: impl Fn(Object, &InterceptionContext<'_>) -> std::result::Result<Object, BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self::transforming(InterceptionRole::Enrich, description, predicate, transform)
  }

  /// Like `enrich`, tagged as a decorator.
  pub fn decorate(
    description: impl Into<String>,
    predicate: impl Fn(&Target<'_>) -> bool + Send + Sync + 'static,
    transform: impl Fn(Object, &InterceptionContext<'_>) -> std::result::Result<Object, BoxError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self::transforming(InterceptionRole::Decorate, description, predicate, transform)
  }

  pub fn role(&self) -> InterceptionRole {
    self.role
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn matches(&self, target: &Target<'_>) -> bool {
    (self.predicate)(target)
  }
}

impl fmt::Debug for InterceptorRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InterceptorRule")
      .field("role", &self.role)
      .field("description", &self.description)
      .finish_non_exhaustive()
  }
}

/// Runs `object` through every matching rule, in order.
///
/// Transforms may return a different concrete value but never a different
/// contract: the result must still be stored as the target's service type.
pub(crate) fn apply<'r>(
  rules: impl IntoIterator<Item = &'r InterceptorRule>,
  target: Target<'_>,
  mut object: Object,
  session: &BuildSession<'_>,
) -> Result<Object> {
  let context = InterceptionContext { session, target };
  let fail = |err: BoxError| {
    Error::from_user(target.service_type.name(), target.instance.name(), err)
  };

  for rule in rules {
    if !rule.matches(&target) {
      continue;
    }
    trace!(
      role = ?rule.role,
      rule = %rule.description,
      service = %target.service_type,
      "applying interceptor"
    );
    match &rule.action {
      Action::Inspect(inspect) => inspect(&object, &context).map_err(fail)?,
      Action::Transform(transform) => {
        object = transform(object, &context).map_err(fail)?;
        if let TypeKey::Type(expected) = target.service_type.key {
          if object.contract() != expected {
            return Err(Error::TypeMismatch {
              expected: target.service_type.name().to_owned(),
              found: object.type_name().to_owned(),
            });
          }
        }
      }
    }
  }
  Ok(object)
}
