use fibre_container::{
  ConcreteType, Container, ContainerModel, ContainerOptions, LifecycleKind, Resolver, ValidationReport,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[derive(Default)]
struct Clock;

struct Scheduler {
  _clock: Arc<Clock>,
}

fn container() -> Container {
  Container::builder()
    .name("jobs")
    .configure(|r| {
      r.for_type::<Clock>()
        .singleton()
        .use_concrete(ConcreteType::with_default::<Clock>(), |c| c)
        .named("clock");
      r.for_type::<Scheduler>().use_factory(|session| {
        Ok(Arc::new(Scheduler {
          _clock: session.get::<Clock>()?,
        }))
      });
    })
    .build()
    .unwrap()
}

#[test]
fn test_options_fill_missing_fields_with_defaults() {
  // Act
  let options: ContainerOptions = serde_json::from_str(r#"{ "name": "api" }"#).unwrap();

  // Assert
  assert_eq!(
    options,
    ContainerOptions {
      name: "api".to_string(),
      ..ContainerOptions::default()
    }
  );
}

#[test]
fn test_options_read_lifecycle_kinds_in_snake_case() {
  // Act
  let options: ContainerOptions =
    serde_json::from_str(r#"{ "validate_on_build": true, "default_lifecycle": "container_scoped" }"#).unwrap();

  // Assert
  assert_eq!(options.name, "root");
  assert!(options.validate_on_build);
  assert_eq!(options.default_lifecycle, LifecycleKind::ContainerScoped);
  assert_eq!(
    serde_json::to_string(&LifecycleKind::AlwaysUnique).unwrap(),
    r#""always_unique""#
  );
}

#[test]
fn test_options_drive_the_builder() {
  // Arrange
  let options: ContainerOptions = serde_json::from_str(r#"{ "name": "api", "default_lifecycle": "singleton" }"#).unwrap();
  let container = Container::builder()
    .options(options)
    .configure(|r| {
      r.for_type::<Clock>()
        .use_concrete(ConcreteType::with_default::<Clock>(), |c| c);
    })
    .build()
    .unwrap();

  // Act
  let c1 = container.get::<Clock>().unwrap();
  let c2 = container.get::<Clock>().unwrap();

  // Assert
  assert_eq!(container.name(), "api");
  assert!(Arc::ptr_eq(&c1, &c2));
}

#[test]
fn test_model_serializes_and_reads_back() {
  // Arrange
  let container = container();
  container.get::<Scheduler>().unwrap();

  // Act
  let model = container.model();
  let json = serde_json::to_value(&model).unwrap();
  let back: ContainerModel = serde_json::from_value(json.clone()).unwrap();

  // Assert
  assert_eq!(back, model);
  assert_eq!(json["container"], "jobs");
  let clock = &json["families"][0];
  assert_eq!(clock["lifecycle"], "Singleton");
  assert_eq!(clock["default_instance"], "clock");
  assert_eq!(clock["instances"][0]["has_been_built"], true);
  assert_eq!(json["families"][1]["instances"][0]["description"], "factory");
}

#[test]
fn test_validation_report_serializes_failures() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<Scheduler>().use_concrete(
      ConcreteType::builder::<Scheduler>()
        .constructor(|ctor| ctor.param::<Clock>("clock").build(|args| Ok(Scheduler { _clock: args.get("clock")? })))
        .build(),
      |s| s,
    );
  })
  .unwrap();

  // Act
  let report = container.validate();
  let json = serde_json::to_string(&report).unwrap();
  let back: ValidationReport = serde_json::from_str(&json).unwrap();

  // Assert
  assert_eq!(back, report);
  assert_eq!(back.failures.len(), 1);
  assert!(back.failures[0].service_type.contains("Scheduler"));
}
