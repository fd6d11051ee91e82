use fibre_container::{
  BoxError, ConcreteType, Container, Disposable, Error, InterceptionRole, InterceptorRule, LifecycleKind, Resolver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// --- Test Fixtures ---

trait Greeter: Send + Sync {
  fn greet(&self) -> String;
}

#[derive(Default)]
struct EnglishGreeter;
impl Greeter for EnglishGreeter {
  fn greet(&self) -> String {
    "Hello".to_string()
  }
}

struct Loud(Arc<dyn Greeter>);
impl Greeter for Loud {
  fn greet(&self) -> String {
    format!("{}!", self.0.greet())
  }
}

// A decorator built by the container: `inner` receives the decorated
// object, `prefix` is resolved like any other dependency.
struct Prefixed {
  inner: Arc<dyn Greeter>,
  prefix: Arc<String>,
}

impl Greeter for Prefixed {
  fn greet(&self) -> String {
    format!("{} {}", self.prefix, self.inner.greet())
  }
}

fn prefixed() -> fibre_container::Concrete<Prefixed> {
  ConcreteType::builder::<Prefixed>()
    .constructor(|ctor| {
      ctor.param::<dyn Greeter>("inner").param::<String>("prefix").build(|args| {
        Ok(Prefixed {
          inner: args.get("inner")?,
          prefix: args.get("prefix")?,
        })
      })
    })
    .build()
}

// --- Interception Tests ---

#[test]
fn test_on_creation_runs_once_per_build() {
  // Arrange
  let created = Arc::new(AtomicUsize::new(0));
  let counter = created.clone();
  let container = Container::new(move |r| {
    r.for_type::<dyn Greeter>()
      .lifecycle(LifecycleKind::Singleton)
      .on_creation(move |greeter| {
        assert_eq!(greeter.greet(), "Hello");
        counter.fetch_add(1, Ordering::SeqCst);
      })
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act
  container.get::<dyn Greeter>().unwrap();
  container.get::<dyn Greeter>().unwrap();

  // Assert
  assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_enrich_replaces_the_object() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<dyn Greeter>()
      .enrich_with(|greeter, _| Ok(Arc::new(Loud(greeter)) as Arc<dyn Greeter>))
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act
  let greeter = container.get::<dyn Greeter>().unwrap();

  // Assert
  assert_eq!(greeter.greet(), "Hello!");
}

#[test]
fn test_decorator_is_built_around_the_object() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<String>().use_object(Arc::new("Well,".to_string()));
    r.for_type::<dyn Greeter>()
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
    r.for_type::<dyn Greeter>().decorate_with(prefixed(), |p| p);
  })
  .unwrap();

  // Act
  let greeter = container.get::<dyn Greeter>().unwrap();

  // Assert
  assert_eq!(greeter.greet(), "Well, Hello");
}

#[test]
fn test_rules_chain_in_registration_order() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<String>().use_object(Arc::new("Well,".to_string()));
    r.for_type::<dyn Greeter>()
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
    r.for_type::<dyn Greeter>()
      .enrich_with(|greeter, _| Ok(Arc::new(Loud(greeter)) as Arc<dyn Greeter>))
      .decorate_with(prefixed(), |p| p);
  })
  .unwrap();

  // Act
  let greeter = container.get::<dyn Greeter>().unwrap();

  // Assert
  assert_eq!(greeter.greet(), "Well, Hello!");
}

#[test]
fn test_unmatched_objects_pass_through() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<String>()
      .enrich_with(|_, _| Ok(Arc::new("changed".to_string())))
      .use_object(Arc::new("kept".to_string()));
    r.for_type::<dyn Greeter>()
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act & Assert
  assert_eq!(container.get::<dyn Greeter>().unwrap().greet(), "Hello");
  // Pre-built objects are never intercepted.
  assert_eq!(*container.get::<String>().unwrap(), "kept");
}

#[test]
fn test_validation_failure_fails_the_build() {
  // Arrange
  let container = Container::new(|r| {
    r.for_type::<dyn Greeter>()
      .validate_with(|greeter| {
        if greeter.greet().is_empty() {
          Ok(())
        } else {
          Err(BoxError::from("greeting must be empty"))
        }
      })
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act
  let result = container.get::<dyn Greeter>();

  // Assert
  match result {
    Err(Error::Construction { source, .. }) => assert_eq!(source.to_string(), "greeting must be empty"),
    other => panic!("unexpected result: {:?}", other.map(|g| g.greet())),
  }
}

struct Session {
  closed: Arc<AtomicUsize>,
}

impl Disposable for Session {
  fn dispose(&self) {
    self.closed.fetch_add(1, Ordering::SeqCst);
  }
}

#[test]
fn test_rejected_objects_are_disposed() {
  // Arrange
  let closed = Arc::new(AtomicUsize::new(0));
  let handle = closed.clone();
  let container = Container::new(move |r| {
    r.for_type::<Session>()
      .lifecycle(LifecycleKind::Singleton)
      .validate_with(|_| Err("rejected".into()))
      .use_factory(move |_| Ok(Arc::new(Session { closed: handle.clone() })))
      .disposable();
  })
  .unwrap();

  // Act
  let result = container.get::<Session>();

  // Assert
  assert!(result.is_err());
  assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_untyped_rules_see_every_build() {
  // Arrange
  let seen = Arc::new(Mutex::new(Vec::new()));
  let log = seen.clone();
  let container = Container::new(move |r| {
    r.intercept(InterceptorRule::activate(
      "record every build",
      |_| true,
      move |_, context| {
        let name = context.target().service_type().name().to_owned();
        log.lock().unwrap().push(name);
      },
    ));
    r.for_type::<String>()
      .use_factory(|_| Ok(Arc::new("text".to_string())));
    r.for_type::<dyn Greeter>()
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act
  container.get::<String>().unwrap();
  container.get::<dyn Greeter>().unwrap();

  // Assert
  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 2);
  assert!(seen[0].contains("String"));
  assert!(seen[1].contains("Greeter"));
}

#[test]
fn test_transforms_must_keep_the_contract() {
  // Arrange
  let container = Container::new(|r| {
    r.intercept(InterceptorRule::enrich(
      "swap the contract",
      |target| target.service_type().name().contains("Greeter"),
      |_, _| Ok(fibre_container::Object::new(Arc::new(42_u32))),
    ));
    r.for_type::<dyn Greeter>()
      .use_concrete(ConcreteType::with_default::<EnglishGreeter>(), |c| c);
  })
  .unwrap();

  // Act & Assert
  assert!(matches!(container.get::<dyn Greeter>(), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_rule_metadata() {
  let rule = InterceptorRule::validate("check", |_| false, |_, _| Ok(()));
  assert_eq!(rule.role(), InterceptionRole::Validate);
  assert_eq!(rule.description(), "check");
}
