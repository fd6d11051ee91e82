use fibre_container::{resolve, Container, Error, Resolver};
use std::panic;
use tracing_subscriber::EnvFilter;

struct UnregisteredService;

struct Needy;

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let container = Container::new(|r| {
    r.for_type::<Needy>().use_factory(|session| {
      session.get::<UnregisteredService>()?;
      Ok(std::sync::Arc::new(Needy))
    });
  })?;

  // `resolve!` panics when the service cannot be resolved.
  println!("Attempting to resolve a service that was never registered...");
  let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
    let _service = resolve!(container, UnregisteredService);
  }));
  assert!(result.is_err(), "resolve! should have panicked.");
  println!("Caught the expected panic from resolve!.");

  // `try_get` turns a miss on the requested key into `None`.
  println!("\nNow with the non-panicking `try_get`...");
  match container.try_get::<UnregisteredService>()? {
    Some(_) => panic!("Should not have found the service!"),
    None => println!("Correctly received `None` for the missing service."),
  }

  // A miss deeper in the object graph is still an error.
  match container.try_get::<Needy>() {
    Err(err @ Error::NoDefaultInstance { .. }) => println!("Nested failure: {}", err),
    other => panic!("unexpected outcome: {:?}", other.map(|n| n.is_some())),
  }

  // `validate` finds the same problem without building anything.
  println!("\n{}", container.validate());
  Ok(())
}
