use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fibre_container::{ConcreteType, Container, LifecycleKind, Resolver};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// --- Fixtures ---

#[derive(Default)]
struct Config;

struct Repository {
  _config: Arc<Config>,
}

struct Service {
  _repository: Arc<Repository>,
  _config: Arc<Config>,
}

fn container(kind: LifecycleKind) -> Container {
  let repository = ConcreteType::builder::<Repository>()
    .constructor(|ctor| {
      ctor
        .param::<Config>("config")
        .build(|args| Ok(Repository { _config: args.get("config")? }))
    })
    .build();
  let service = ConcreteType::builder::<Service>()
    .constructor(|ctor| {
      ctor
        .param::<Repository>("repository")
        .param::<Config>("config")
        .build(|args| {
          Ok(Service {
            _repository: args.get("repository")?,
            _config: args.get("config")?,
          })
        })
    })
    .build();

  Container::new(move |r| {
    r.for_type::<Config>()
      .singleton()
      .use_concrete(ConcreteType::with_default::<Config>(), |c| c);
    r.for_type::<Repository>().use_concrete(repository, |c| c);
    r.for_type::<Service>().lifecycle(kind).use_concrete(service, |c| c);
  })
  .unwrap()
}

// --- Benchmark Functions ---

fn single_thread(c: &mut Criterion) {
  let mut group = c.benchmark_group("resolve");
  for kind in [LifecycleKind::Transient, LifecycleKind::Singleton, LifecycleKind::ContainerScoped] {
    let container = container(kind);
    // Warm the plan cache and any lifecycle cache.
    container.get::<Service>().unwrap();
    group.bench_with_input(BenchmarkId::new("object_graph", kind), &container, |b, container| {
      b.iter(|| black_box(container.get::<Service>().unwrap()))
    });
  }
  group.bench_function("nested_container", |b| {
    let root = container(LifecycleKind::ContainerScoped);
    b.iter(|| {
      let request = root.create_child().unwrap();
      black_box(request.get::<Service>().unwrap());
      request.dispose();
    })
  });
  group.finish();
}

fn contended(c: &mut Criterion) {
  const THREADS: usize = 4;
  let mut group = c.benchmark_group("resolve_contended");
  for kind in [LifecycleKind::Transient, LifecycleKind::Singleton] {
    let container = container(kind);
    group.bench_function(BenchmarkId::new("object_graph", kind), |b| {
      b.iter_custom(|iters| {
        let barrier = Barrier::new(THREADS);
        let per_thread = iters / THREADS as u64 + 1;
        let start = Instant::now();
        thread::scope(|s| {
          for _ in 0..THREADS {
            s.spawn(|| {
              barrier.wait();
              for _ in 0..per_thread {
                black_box(container.get::<Service>().unwrap());
              }
            });
          }
        });
        start.elapsed()
      })
    });
  }
  group.finish();
}

criterion_group! {
  name = benches;
  config = Criterion::default().measurement_time(Duration::from_secs(5));
  targets = single_thread, contended
}
criterion_main!(benches);
