use fibre_container::{
  Concrete, ConcreteType, Container, Error, ExplicitArguments, LifecycleKind, Resolver, ServiceType,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// --- Test Fixtures ---

trait Logger: Send + Sync {
  fn name(&self) -> String;
}

struct NamedLogger(String);
impl Logger for NamedLogger {
  fn name(&self) -> String {
    self.0.clone()
  }
}

fn logger(name: &str) -> Arc<dyn Logger> {
  Arc::new(NamedLogger(name.to_owned()))
}

#[derive(Debug)]
struct Endpoint {
  url: String,
  retries: u32,
}

fn endpoint() -> Concrete<Endpoint> {
  ConcreteType::builder::<Endpoint>()
    .constructor(|ctor| {
      ctor.param::<String>("url").param::<u32>("retries").build(|args| {
        Ok(Endpoint {
          url: args.value("url")?,
          retries: args.value("retries")?,
        })
      })
    })
    .build()
}

struct Client {
  endpoint: Arc<Endpoint>,
  logger: Arc<dyn Logger>,
}

fn client() -> Concrete<Client> {
  ConcreteType::builder::<Client>()
    .constructor(|ctor| {
      ctor
        .param::<Endpoint>("endpoint")
        .param::<dyn Logger>("logger")
        .build(|args| {
          Ok(Client {
            endpoint: args.get("endpoint")?,
            logger: args.get("logger")?,
          })
        })
    })
    .build()
}

// Built outside the container, filled in by `build_up`.
#[derive(Default)]
struct Handler {
  logger: Option<Arc<dyn Logger>>,
  endpoint: Option<Arc<Endpoint>>,
  retries: u32,
}

fn handler() -> Concrete<Handler> {
  ConcreteType::builder::<Handler>()
    .constructor(|ctor| ctor.build(|_| Ok(Handler::default())))
    .setter::<dyn Logger>("logger", |h, logger| h.logger = Some(logger))
    .setter::<Endpoint>("endpoint", |h, endpoint| h.endpoint = Some(endpoint))
    .setter::<u32>("retries", |h, retries| h.retries = *retries)
    .build()
}

fn app() -> Container {
  Container::builder()
    .name("app")
    .configure(|r| {
      r.for_type::<dyn Logger>().use_object(logger("default")).named("default");
      r.for_type::<Endpoint>()
        .singleton()
        .use_concrete(endpoint(), |e| e)
        .named("api")
        .ctor_value("url", "https://api.example.com".to_string())
        .ctor_value("retries", 3_u32);
      r.for_type::<Client>().use_concrete(client(), |c| c).named("client");
      r.concrete(handler());
    })
    .build()
    .unwrap()
}

// --- Constructor Selection ---

struct Flexible {
  source: &'static str,
}

fn flexible(prefer_empty: bool) -> Concrete<Flexible> {
  ConcreteType::builder::<Flexible>()
    .constructor(|ctor| {
      let ctor = if prefer_empty { ctor.preferred() } else { ctor };
      ctor.build(|_| Ok(Flexible { source: "empty" }))
    })
    .constructor(|ctor| {
      ctor.param::<dyn Logger>("logger").build(|args| {
        args.get::<dyn Logger>("logger")?;
        Ok(Flexible { source: "logger" })
      })
    })
    .build()
}

#[test]
fn test_greediest_satisfiable_constructor_wins() {
  // Arrange
  let with_logger = Container::new(|r| {
    r.for_type::<dyn Logger>().use_object(logger("l"));
    r.for_type::<Flexible>().use_concrete(flexible(false), |f| f);
  })
  .unwrap();
  let without_logger = Container::new(|r| {
    r.for_type::<Flexible>().use_concrete(flexible(false), |f| f);
  })
  .unwrap();

  // Act & Assert
  assert_eq!(with_logger.get::<Flexible>().unwrap().source, "logger");
  assert_eq!(without_logger.get::<Flexible>().unwrap().source, "empty");
}

#[test]
fn test_preferred_constructor_wins_regardless_of_arity() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<dyn Logger>().use_object(logger("l"));
    r.for_type::<Flexible>().use_concrete(flexible(true), |f| f);
  })
  .unwrap();

  // Act & Assert
  assert_eq!(container.get::<Flexible>().unwrap().source, "empty");
}

// --- Explicit Arguments ---

#[test]
fn test_explicit_arguments_override_by_name() {
  // Arrange
  let container = app();
  let arguments = ExplicitArguments::new()
    .set("url", "http://localhost:8080".to_string())
    .set("retries", 0_u32);

  // Act
  let cached = container.get::<Endpoint>().unwrap();
  let explicit = container.with_arguments(&arguments).get::<Endpoint>().unwrap();
  let nested = container.with_arguments(&arguments).get::<Client>().unwrap();
  let again = container.get::<Endpoint>().unwrap();

  // Assert
  assert_eq!(explicit.url, "http://localhost:8080");
  assert_eq!(explicit.retries, 0);
  assert_eq!(nested.endpoint.url, "http://localhost:8080");
  // Builds with explicit arguments never reach the singleton cache.
  assert_eq!(cached.url, "https://api.example.com");
  assert!(Arc::ptr_eq(&cached, &again));
  assert!(!Arc::ptr_eq(&cached, &explicit));
}

#[test]
fn test_explicit_defaults_override_by_type() {
  // Arrange
  let container = app();
  let arguments = ExplicitArguments::new().with_default::<dyn Logger>(logger("audit"));

  // Act
  let resolver = container.with_arguments(&arguments);
  let client = resolver.get::<Client>().unwrap();
  let direct = resolver.get::<dyn Logger>().unwrap();

  // Assert
  assert_eq!(arguments.len(), 1);
  assert_eq!(client.logger.name(), "audit");
  assert_eq!(direct.name(), "audit");
  assert_eq!(container.get::<Client>().unwrap().logger.name(), "default");
}

#[test]
fn test_context_and_arguments_combine() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<dyn Logger>()
      .lifecycle(LifecycleKind::Hybrid)
      .use_factory(|_| Ok(logger("hybrid")));
  })
  .unwrap();
  let request = fibre_container::ExternalScope::new("request");
  let arguments = ExplicitArguments::new();

  // Act
  let resolver = container.with_context(&request).with_arguments(&arguments);
  let l1 = resolver.get::<dyn Logger>().unwrap();
  let l2 = resolver.get::<dyn Logger>().unwrap();

  // Assert
  assert!(arguments.is_empty());
  assert!(Arc::ptr_eq(&l1, &l2));
  assert_eq!(request.cache().len(), 1);
}

// --- Build Up ---

#[test]
fn test_build_up_injects_resolvable_properties() {
  // Arrange
  let container = app();
  let mut handler = Handler::default();

  // Act
  container.build_up(&mut handler).unwrap();

  // Assert
  assert_eq!(handler.logger.as_ref().unwrap().name(), "default");
  assert_eq!(handler.endpoint.as_ref().unwrap().retries, 3);
  // Nothing registered for `u32`, so the property is left alone.
  assert_eq!(handler.retries, 0);
}

#[test]
fn test_build_up_without_descriptor_fails() {
  // Arrange
  let container = app();
  let mut endpoint = Endpoint {
    url: String::new(),
    retries: 0,
  };

  // Act & Assert
  assert!(matches!(
    container.build_up(&mut endpoint),
    Err(Error::PlanCompilation { .. })
  ));
}

#[test]
fn test_setters_run_after_construction() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<dyn Logger>().use_object(logger("setter"));
    r.for_type::<Handler>()
      .use_concrete(handler(), |h| h)
      .setter_value("retries", 7_u32);
  })
  .unwrap();

  // Act
  let handler = container.get::<Handler>().unwrap();

  // Assert
  assert_eq!(handler.retries, 7);
  assert_eq!(handler.logger.as_ref().unwrap().name(), "setter");
  assert!(handler.endpoint.is_none());
}

// --- Diagnostics ---

#[test]
fn test_model_reports_families_and_built_state() {
  // Arrange
  let container = app();
  let request = container.create_child_named("request").unwrap();

  // Act
  let before = request.model();
  request.get::<Endpoint>().unwrap();
  let after = request.model();

  // Assert
  assert_eq!(before.container, "request");
  assert_eq!(before.scopes, vec!["app".to_string(), "request".to_string()]);
  let endpoint_family = |model: &fibre_container::ContainerModel| {
    model
      .families_of(ServiceType::of::<Endpoint>().name())
      .next()
      .cloned()
      .unwrap()
  };
  let family_before = endpoint_family(&before);
  assert_eq!(family_before.scope, "app");
  assert_eq!(family_before.lifecycle, "Singleton");
  assert!(family_before.lifecycle_declared);
  assert_eq!(family_before.default_instance.as_deref(), Some("api"));
  assert_eq!(family_before.instances[0].name, "api");
  assert!(!family_before.instances[0].has_been_built);
  assert_eq!(
    family_before.instances[0]
      .dependencies
      .iter()
      .map(|d| d.name.as_str())
      .collect::<Vec<_>>(),
    vec!["url", "retries"]
  );
  assert!(endpoint_family(&after).instances[0].has_been_built);
  assert_eq!(after.instance_count(), 3);
}

#[test]
fn test_validate_reports_every_failure() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<Client>().use_concrete(client(), |c| c).named("client");
    r.for_type::<Endpoint>()
      .use_concrete(endpoint(), |e| e)
      .named("endpoint")
      .ctor_value("url", "x".to_string());
  })
  .unwrap();

  // Act
  let report = container.validate();

  // Assert
  assert!(!report.is_valid());
  assert_eq!(report.checked, 2);
  let failed: Vec<_> = report.failures.iter().map(|f| f.instance.as_str()).collect();
  assert_eq!(failed, vec!["client", "endpoint"]);
  assert!(report.to_string().contains("2 of 2 instances invalid"));
}

#[test]
fn test_validate_passes_for_complete_configuration() {
  let report = app().validate();
  assert!(report.is_valid(), "{}", report);
  assert_eq!(report.checked, 3);
}

#[test]
fn test_validate_on_build_rejects_invalid_configuration() {
  // Act
  let result = Container::builder()
    .validate_on_build(true)
    .configure(|r| {
      r.for_type::<Client>().use_concrete(client(), |c| c);
    })
    .build();

  // Assert
  match result {
    Err(Error::Validation(report)) => assert_eq!(report.failures.len(), 1),
    Err(other) => panic!("unexpected error: {}", other),
    Ok(_) => panic!("invalid configuration was accepted"),
  }
}

#[test]
fn test_named_arguments_only_apply_to_parameters_of_their_type() {
  // Arrange
  let container = app();
  let mismatched = ExplicitArguments::new().set("logger", "audit".to_string());
  let matching = ExplicitArguments::new().set_shared::<dyn Logger>("logger", logger("audit"));

  // Act
  let resolved_from_context = container.with_arguments(&mismatched).get::<Client>().unwrap();
  let overridden = container.with_arguments(&matching).get::<Client>().unwrap();

  // Assert
  assert_eq!(resolved_from_context.logger.name(), "default");
  assert_eq!(overridden.logger.name(), "audit");
}
