use thiserror::Error;

/// Boxed error returned by user constructors, factories and interceptors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Problems found while sealing or validating a configuration graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
  #[error("duplicate instance name '{name}' in family {service_type}")]
  DuplicateInstanceName { service_type: String, name: String },

  #[error("instance '{instance}' of {service_type} binds '{dependency}' to {target}, which has no registration or default")]
  UnresolvedDependency {
    service_type: String,
    instance: String,
    dependency: String,
    target: String,
  },

  #[error("instance '{instance}' of {service_type} references unknown instance '{name}' of {target}")]
  UnknownReference {
    service_type: String,
    instance: String,
    target: String,
    name: String,
  },

  #[error("instance '{instance}' serves {contract} but was added to family {service_type}")]
  ContractMismatch {
    service_type: String,
    instance: String,
    contract: String,
  },

  #[error("open generic family {definition} has no template named '{template}' for {requested}")]
  UnclosableGeneric {
    definition: String,
    template: String,
    requested: String,
  },
}

/// The main error type for `fibre_container`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigurationError),

  #[error("cannot compile a construction plan for {concrete}: {reason}")]
  PlanCompilation { concrete: String, reason: String },

  #[error("no default instance is registered for {service_type}")]
  NoDefaultInstance { service_type: String },

  #[error("no instance named '{name}' is registered for {service_type}")]
  UnknownInstance { service_type: String, name: String },

  #[error("circular dependency detected: {}", chain.join(" -> "))]
  CircularDependency { chain: Vec<String> },

  #[error("container '{scope}' has been disposed")]
  ScopeDisposed { scope: String },

  #[error("failed to build instance '{instance}' of {service_type}: {source}")]
  Construction {
    service_type: String,
    instance: String,
    #[source]
    source: BoxError,
  },

  #[error("missing argument '{name}' while constructing {concrete}")]
  MissingArgument { concrete: String, name: String },

  #[error("type mismatch: expected {expected}, found {found}")]
  TypeMismatch { expected: String, found: String },

  #[error("configuration is invalid:\n{0}")]
  Validation(crate::model::ValidationReport),
}

impl Error {
  /// Whether this error only says "nothing is registered under that key".
  ///
  /// `try_get`-style lookups turn these into `None`; every other error still
  /// propagates.
  pub fn is_lookup_miss(&self) -> bool {
    matches!(
      self,
      Error::NoDefaultInstance { .. } | Error::UnknownInstance { .. }
    )
  }

  /// Converts a failure returned by user code back into an `Error`.
  ///
  /// Errors raised by this crate and passed through a user closure with `?`
  /// are returned unchanged so that nested cycles and lookup misses keep
  /// their own variant.
  pub(crate) fn from_user(service_type: &str, instance: &str, err: BoxError) -> Self {
    match err.downcast::<Error>() {
      Ok(own) => *own,
      Err(source) => Error::Construction {
        service_type: service_type.to_owned(),
        instance: instance.to_owned(),
        source,
      },
    }
  }
}

/// A specialized `Result` type for `fibre_container` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
