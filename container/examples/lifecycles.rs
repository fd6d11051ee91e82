use fibre_container::{resolve, Container, LifecycleKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// A service that gets a unique ID upon creation.
struct RequestTracker {
  id: usize,
}

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn tracker() -> Arc<RequestTracker> {
  let id = ID_COUNTER.fetch_add(1, Ordering::SeqCst);
  println!("Creating RequestTracker #{}", id);
  Arc::new(RequestTracker { id })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let container = Container::new(|r| {
    r.for_type::<RequestTracker>()
      .add_factory(|_| Ok(tracker()))
      .named("singleton")
      .lifecycle(LifecycleKind::Singleton);
    r.for_type::<RequestTracker>()
      .add_factory(|_| Ok(tracker()))
      .named("transient");
    r.for_type::<RequestTracker>()
      .add_factory(|_| Ok(tracker()))
      .named("scoped")
      .lifecycle(LifecycleKind::ContainerScoped);
  })?;

  println!("--- Singletons ---");
  let s1 = resolve!(container, RequestTracker, "singleton");
  let s2 = resolve!(container, RequestTracker, "singleton");
  println!("Singleton 1 ID: {}, Singleton 2 ID: {}", s1.id, s2.id);
  assert!(Arc::ptr_eq(&s1, &s2));

  println!("\n--- Transients ---");
  let t1 = resolve!(container, RequestTracker, "transient");
  let t2 = resolve!(container, RequestTracker, "transient");
  println!("Transient 1 ID: {}, Transient 2 ID: {}", t1.id, t2.id);
  assert!(!Arc::ptr_eq(&t1, &t2));

  println!("\n--- Container scoped ---");
  let request = container.create_child_named("request")?;
  let c1 = resolve!(container, RequestTracker, "scoped");
  let c2 = resolve!(request, RequestTracker, "scoped");
  let c3 = resolve!(request, RequestTracker, "scoped");
  println!("Root ID: {}, request IDs: {} and {}", c1.id, c2.id, c3.id);
  assert!(!Arc::ptr_eq(&c1, &c2));
  assert!(Arc::ptr_eq(&c2, &c3));

  // Singletons are shared by nested containers.
  assert!(Arc::ptr_eq(&s1, &resolve!(request, RequestTracker, "singleton")));
  Ok(())
}
