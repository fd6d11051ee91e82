use fibre_container::{Container, Disposable, LifecycleKind, Resolver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// A per-request unit of work, closed when its container is disposed.
struct UnitOfWork {
  id: usize,
}

impl Disposable for UnitOfWork {
  fn dispose(&self) {
    println!("Closing unit of work #{}", self.id);
  }
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

fn handle_request(root: &Container, user: &str) -> Result<(), Box<dyn std::error::Error>> {
  let request = root.create_child_named(format!("request:{}", user))?;
  // Local configuration is visible only to this request.
  request.inject(Arc::new(user.to_string()))?;

  let work = request.get::<UnitOfWork>()?;
  let again = request.get::<UnitOfWork>()?;
  assert!(Arc::ptr_eq(&work, &again));
  println!(
    "Request for {} uses unit of work #{}",
    request.get::<String>()?,
    work.id
  );

  request.dispose();
  Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let root = Container::new(|r| {
    r.for_type::<UnitOfWork>()
      .lifecycle(LifecycleKind::ContainerScoped)
      .use_factory(|_| {
        Ok(Arc::new(UnitOfWork {
          id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
        }))
      })
      .disposable();
  })?;

  handle_request(&root, "alice")?;
  handle_request(&root, "bob")?;

  // Nothing registered in a request leaked into the root.
  assert!(root.try_get::<String>()?.is_none());
  println!("Root container still has {} families.", root.model().families.len());
  Ok(())
}
