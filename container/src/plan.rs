//! Construction plans: how to build and populate one concrete type.
//!
//! Which constructor to call, and where each argument comes from, depends only
//! on the concrete descriptor and on the *shape* of what is available for its
//! parameters: a literal, a reference, a context default, an explicit
//! argument, or nothing. Plans are therefore compiled once per
//! (descriptor, shape) and shared by every build with that shape.

use crate::concrete::{Arguments, ConcreteType, ParameterInfo, RawObject};
use crate::core::{Object, ServiceType};
use crate::error::{BoxError, Error, Result};

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::trace;

/// Where one argument value comes from at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ArgumentSourceKind {
  /// A literal bound to the instance.
  Literal,
  /// An instance reference bound to the instance, resolved at every build.
  Reference,
  /// The default of the parameter's type, resolved from the calling context.
  Context,
  /// A value supplied with the resolve call itself.
  Explicit,
}

/// What is available for one parameter; `None` means nothing is.
pub(crate) type Satisfaction = Option<ArgumentSourceKind>;

#[derive(Debug, Clone)]
pub(crate) struct ArgumentStep {
  pub(crate) name: &'static str,
  pub(crate) service_type: ServiceType,
  pub(crate) kind: ArgumentSourceKind,
}

/// Supplies argument values while a plan executes.
pub(crate) trait ArgumentSource {
  fn argument(&self, step: &ArgumentStep) -> Result<Object>;

  /// Converts a failure returned by the user constructor.
  fn fail(&self, err: BoxError) -> Error;
}

/// A compiled, stateless build procedure for one concrete type.
pub(crate) struct ConstructionPlan {
  concrete: ConcreteType,
  constructor: Option<usize>,
  arguments: Vec<ArgumentStep>,
  setters: Vec<(usize, ArgumentStep)>,
}

impl ConstructionPlan {
  /// Lays out the parameter positions a shape vector refers to: every
  /// constructor parameter in declaration order, then every setter.
  pub(crate) fn parameters(concrete: &ConcreteType) -> impl Iterator<Item = &ParameterInfo> {
    concrete
      .constructors()
      .iter()
      .flat_map(|ctor| ctor.parameters().iter())
      .chain(concrete.setters().iter().map(|setter| setter.property()))
  }

  pub(crate) fn compile(concrete: &ConcreteType, shape: &[Satisfaction], populate_only: bool) -> Result<Self> {
    let mut offsets = Vec::with_capacity(concrete.constructors().len());
    let mut offset = 0;
    for ctor in concrete.constructors() {
      offsets.push(offset);
      offset += ctor.parameters().len();
    }
    let setter_offset = offset;
    let at = |position: usize| shape.get(position).copied().flatten();

    let constructor = if populate_only {
      None
    } else {
      let satisfied = |index: usize| {
        let params = concrete.constructors()[index].parameters().len();
        (0..params).all(|p| at(offsets[index] + p).is_some())
      };
      let preferred = concrete.constructors().iter().position(|ctor| ctor.is_preferred());
      let chosen = match preferred {
        Some(index) => Some(index).filter(|&index| satisfied(index)),
        None => (0..concrete.constructors().len())
          .filter(|&index| satisfied(index))
          .fold(None, |best: Option<usize>, index| match best {
            Some(b)
              if concrete.constructors()[b].parameters().len()
                >= concrete.constructors()[index].parameters().len() =>
            {
              Some(b)
            }
            _ => Some(index),
          }),
      };
      match chosen {
        Some(index) => Some(index),
        None => return Err(unsatisfiable(concrete, preferred, &offsets, &at)),
      }
    };

    let arguments = match constructor {
      Some(index) => concrete.constructors()[index]
        .parameters()
        .iter()
        .enumerate()
        .filter_map(|(p, param)| step(param, at(offsets[index] + p)))
        .collect(),
      None => Vec::new(),
    };

    // Setters are optional: a property with nothing available is skipped.
    let setters = concrete
      .setters()
      .iter()
      .enumerate()
      .filter_map(|(s, setter)| step(setter.property(), at(setter_offset + s)).map(|step| (s, step)))
      .collect();

    trace!(concrete = concrete.name(), ?constructor, populate_only, "compiled construction plan");
    Ok(Self {
      concrete: concrete.clone(),
      constructor,
      arguments,
      setters,
    })
  }

  /// Builds a new raw object and injects its setters.
  pub(crate) fn build(&self, source: &dyn ArgumentSource) -> Result<RawObject> {
    let index = self.constructor.ok_or_else(|| Error::PlanCompilation {
      concrete: self.concrete.name().to_owned(),
      reason: "plan was compiled for property injection only".to_owned(),
    })?;

    let mut values = Vec::with_capacity(self.arguments.len());
    for step in &self.arguments {
      values.push((step.name, source.argument(step)?));
    }
    let arguments = Arguments::new(self.concrete.name(), values);
    let mut raw = self.concrete.constructors()[index]
      .invoke(&arguments)
      .map_err(|err| source.fail(err))?;

    self.populate(source, &mut *raw)?;
    Ok(raw)
  }

  /// Injects every available setter into an existing object.
  pub(crate) fn populate(&self, source: &dyn ArgumentSource, target: &mut (dyn Any + Send + Sync)) -> Result<()> {
    for (index, step) in &self.setters {
      let value = source.argument(step)?;
      self.concrete.setters()[*index].apply(target, &value)?;
    }
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn constructor(&self) -> Option<usize> {
    self.constructor
  }

  #[cfg(test)]
  pub(crate) fn arguments(&self) -> &[ArgumentStep] {
    &self.arguments
  }

  #[cfg(test)]
  pub(crate) fn setter_count(&self) -> usize {
    self.setters.len()
  }
}

impl fmt::Debug for ConstructionPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConstructionPlan")
      .field("concrete", &self.concrete.name())
      .field("constructor", &self.constructor)
      .field("arguments", &self.arguments)
      .field("setters", &self.setters)
      .finish()
  }
}

fn step(param: &ParameterInfo, satisfaction: Satisfaction) -> Option<ArgumentStep> {
  satisfaction.map(|kind| ArgumentStep {
    name: param.name(),
    service_type: param.service_type().clone(),
    kind,
  })
}

fn unsatisfiable(
  concrete: &ConcreteType,
  preferred: Option<usize>,
  offsets: &[usize],
  at: &dyn Fn(usize) -> Satisfaction,
) -> Error {
  if concrete.constructors().is_empty() {
    return Error::PlanCompilation {
      concrete: concrete.name().to_owned(),
      reason: "no constructors are declared".to_owned(),
    };
  }

  let candidates: Vec<usize> = match preferred {
    Some(index) => vec![index],
    None => (0..concrete.constructors().len()).collect(),
  };
  let mut missing: Vec<String> = Vec::new();
  for index in candidates {
    for (p, param) in concrete.constructors()[index].parameters().iter().enumerate() {
      if at(offsets[index] + p).is_none() {
        let label = format!("{}: {}", param.name(), param.service_type());
        if !missing.contains(&label) {
          missing.push(label);
        }
      }
    }
  }
  let reason = match preferred {
    Some(_) => format!(
      "the preferred constructor has unsatisfiable parameters: {}",
      missing.join(", ")
    ),
    None => format!(
      "no constructor has all parameters satisfiable (unsatisfied: {})",
      missing.join(", ")
    ),
  };
  Error::PlanCompilation {
    concrete: concrete.name().to_owned(),
    reason,
  }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PlanKey {
  descriptor: u64,
  shape: Vec<Satisfaction>,
  populate_only: bool,
}

/// Memoized plans, compiled at most once per key even under contention.
#[derive(Default)]
pub(crate) struct PlanCache {
  plans: DashMap<PlanKey, Arc<OnceCell<Arc<ConstructionPlan>>>>,
  compiled: AtomicU64,
}

impl PlanCache {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn get_or_compile(
    &self,
    concrete: &ConcreteType,
    shape: Vec<Satisfaction>,
    populate_only: bool,
  ) -> Result<Arc<ConstructionPlan>> {
    let key = PlanKey {
      descriptor: concrete.descriptor_id(),
      shape,
      populate_only,
    };
    // Clone the cell out so no shard lock is held while compiling.
    let cell = self.plans.entry(key.clone()).or_default().value().clone();
    cell
      .get_or_try_init(|| {
        self.compiled.fetch_add(1, Ordering::Relaxed);
        ConstructionPlan::compile(concrete, &key.shape, populate_only).map(Arc::new)
      })
      .cloned()
  }

  /// Number of plans compiled so far.
  pub(crate) fn compile_count(&self) -> u64 {
    self.compiled.load(Ordering::Relaxed)
  }
}

impl fmt::Debug for PlanCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PlanCache")
      .field("plans", &self.plans.len())
      .field("compiled", &self.compile_count())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::concrete::ConcreteType;
  use crate::core::Object;
  use std::sync::Barrier;
  use std::thread;

  struct Engine {
    cylinders: u32,
    turbo: bool,
  }

  fn engine() -> ConcreteType {
    ConcreteType::builder::<Engine>()
      .constructor(|ctor| {
        ctor.build(|_| {
          Ok(Engine {
            cylinders: 4,
            turbo: false,
          })
        })
      })
      .constructor(|ctor| {
        ctor.param::<u32>("cylinders").build(|args| {
          Ok(Engine {
            cylinders: args.value::<u32>("cylinders")?,
            turbo: false,
          })
        })
      })
      .setter::<bool>("turbo", |engine, turbo| engine.turbo = *turbo)
      .build()
      .into_descriptor()
  }

  struct Literals;

  impl ArgumentSource for Literals {
    fn argument(&self, step: &ArgumentStep) -> Result<Object> {
      match step.name {
        "cylinders" => Ok(Object::new(Arc::new(8_u32))),
        "turbo" => Ok(Object::new(Arc::new(true))),
        other => Err(Error::MissingArgument {
          concrete: "Engine".into(),
          name: other.into(),
        }),
      }
    }

    fn fail(&self, err: BoxError) -> Error {
      Error::from_user("Engine", "engine", err)
    }
  }

  #[test]
  fn greediest_satisfiable_constructor_wins() {
    let concrete = engine();
    let shape = vec![Some(ArgumentSourceKind::Literal), None];
    let plan = ConstructionPlan::compile(&concrete, &shape, false).unwrap();
    assert_eq!(plan.constructor(), Some(1));
    assert_eq!(plan.setter_count(), 0);

    let raw = plan.build(&Literals).unwrap();
    let engine = raw.downcast::<Engine>().unwrap();
    assert_eq!(engine.cylinders, 8);
    assert!(!engine.turbo);
  }

  #[test]
  fn unsatisfied_parameters_fall_back_to_smaller_constructors() {
    let concrete = engine();
    let shape = vec![None, Some(ArgumentSourceKind::Literal)];
    let plan = ConstructionPlan::compile(&concrete, &shape, false).unwrap();
    assert_eq!(plan.constructor(), Some(0));
    assert!(plan.arguments().is_empty());

    let engine = plan.build(&Literals).unwrap().downcast::<Engine>().unwrap();
    assert_eq!(engine.cylinders, 4);
    assert!(engine.turbo);
  }

  #[test]
  fn preferred_constructor_must_be_satisfiable() {
    let concrete = ConcreteType::builder::<Engine>()
      .constructor(|ctor| {
        ctor.build(|_| {
          Ok(Engine {
            cylinders: 1,
            turbo: false,
          })
        })
      })
      .constructor(|ctor| {
        ctor.param::<u32>("cylinders").preferred().build(|args| {
          Ok(Engine {
            cylinders: args.value::<u32>("cylinders")?,
            turbo: false,
          })
        })
      })
      .build()
      .into_descriptor();

    let err = ConstructionPlan::compile(&concrete, &[None], false).unwrap_err();
    match err {
      Error::PlanCompilation { reason, .. } => {
        assert!(reason.contains("preferred"));
        assert!(reason.contains("cylinders"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn populate_only_plans_skip_constructors() {
    let concrete = engine();
    let plan = ConstructionPlan::compile(&concrete, &[None, Some(ArgumentSourceKind::Context)], true).unwrap();
    assert_eq!(plan.constructor(), None);

    let mut target = Engine {
      cylinders: 2,
      turbo: false,
    };
    plan.populate(&Literals, &mut target).unwrap();
    assert!(target.turbo);
    assert!(plan.build(&Literals).is_err());
  }

  #[test]
  fn plans_are_compiled_once_per_shape() {
    let cache = Arc::new(PlanCache::new());
    let concrete = engine();
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|s| {
      for _ in 0..8 {
        let cache = cache.clone();
        let concrete = concrete.clone();
        let barrier = barrier.clone();
        s.spawn(move || {
          barrier.wait();
          cache
            .get_or_compile(&concrete, vec![Some(ArgumentSourceKind::Literal), None], false)
            .unwrap();
        });
      }
    });
    assert_eq!(cache.compile_count(), 1);

    cache.get_or_compile(&concrete, vec![None, None], false).unwrap();
    assert_eq!(cache.compile_count(), 2);
  }
}
