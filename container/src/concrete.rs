//! Data-only descriptors of concrete types.
//!
//! A `ConcreteType` lists the constructors and settable properties of one
//! concrete type, each as a parameter list plus a closure. The plan compiler
//! reads nothing else, so the engine never depends on host metadata.

use crate::core::{Object, ServiceType};
use crate::error::{BoxError, Error, Result};

use std::any::{self, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A freshly constructed, not yet shared concrete value.
pub(crate) type RawObject = Box<dyn Any + Send + Sync>;

type ConstructorFn = Arc<dyn Fn(&Arguments) -> std::result::Result<RawObject, BoxError> + Send + Sync>;
type SetterFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync), &Object) -> Result<()> + Send + Sync>;

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// A named, typed slot of a constructor or a settable property.
#[derive(Clone, Debug)]
pub struct ParameterInfo {
  name: &'static str,
  service_type: ServiceType,
}

impl ParameterInfo {
  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn service_type(&self) -> &ServiceType {
    &self.service_type
  }
}

/// One way of constructing a concrete type.
pub struct ConstructorInfo {
  parameters: Vec<ParameterInfo>,
  preferred: bool,
  invoke: ConstructorFn,
}

impl ConstructorInfo {
  pub fn parameters(&self) -> &[ParameterInfo] {
    &self.parameters
  }

  pub fn is_preferred(&self) -> bool {
    self.preferred
  }

  pub(crate) fn invoke(&self, arguments: &Arguments) -> std::result::Result<RawObject, BoxError> {
    (self.invoke)(arguments)
  }
}

/// A property that can be injected after construction.
pub struct SetterInfo {
  property: ParameterInfo,
  apply: SetterFn,
}

impl SetterInfo {
  pub fn property(&self) -> &ParameterInfo {
    &self.property
  }

  pub(crate) fn apply(&self, target: &mut (dyn Any + Send + Sync), value: &Object) -> Result<()> {
    (self.apply)(target, value)
  }
}

struct ConcreteInner {
  descriptor_id: u64,
  type_id: TypeId,
  name: &'static str,
  constructors: Vec<ConstructorInfo>,
  setters: Vec<SetterInfo>,
}

/// The type-erased construction descriptor of one concrete type.
#[derive(Clone)]
pub struct ConcreteType {
  inner: Arc<ConcreteInner>,
}

impl ConcreteType {
  /// Starts describing the concrete type `C`.
  pub fn builder<C: Any + Send + Sync>() -> ConcreteBuilder<C> {
    ConcreteBuilder {
      constructors: Vec::new(),
      setters: Vec::new(),
      _marker: PhantomData,
    }
  }

  /// A descriptor with one parameterless constructor calling `C::default()`.
  pub fn with_default<C: Default + Any + Send + Sync>() -> Concrete<C> {
    Self::builder::<C>()
      .constructor(|ctor| ctor.build(|_| Ok(C::default())))
      .build()
  }

  pub fn type_id(&self) -> TypeId {
    self.inner.type_id
  }

  pub fn name(&self) -> &'static str {
    self.inner.name
  }

  pub fn constructors(&self) -> &[ConstructorInfo] {
    &self.inner.constructors
  }

  pub fn setters(&self) -> &[SetterInfo] {
    &self.inner.setters
  }

  /// Distinguishes two descriptors registered for the same Rust type.
  pub(crate) fn descriptor_id(&self) -> u64 {
    self.inner.descriptor_id
  }
}

impl fmt::Debug for ConcreteType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConcreteType")
      .field("name", &self.inner.name)
      .field("constructors", &self.inner.constructors.len())
      .field("setters", &self.inner.setters.len())
      .finish()
  }
}

/// A `ConcreteType` known to describe the Rust type `C`.
pub struct Concrete<C> {
  descriptor: ConcreteType,
  _marker: PhantomData<fn() -> C>,
}

impl<C> Concrete<C> {
  pub fn descriptor(&self) -> &ConcreteType {
    &self.descriptor
  }

  pub fn into_descriptor(self) -> ConcreteType {
    self.descriptor
  }
}

impl<C> Clone for Concrete<C> {
  fn clone(&self) -> Self {
    Self {
      descriptor: self.descriptor.clone(),
      _marker: PhantomData,
    }
  }
}

impl<C> fmt::Debug for Concrete<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.descriptor.fmt(f)
  }
}

/// Builder for a `Concrete<C>` descriptor.
pub struct ConcreteBuilder<C> {
  constructors: Vec<ConstructorInfo>,
  setters: Vec<SetterInfo>,
  _marker: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> ConcreteBuilder<C> {
  /// Declares a constructor.
  ///
  /// ```
  /// use fibre_container::ConcreteType;
  /// use std::sync::Arc;
  ///
  /// struct Greeting(Arc<String>);
  ///
  /// let greeting = ConcreteType::builder::<Greeting>()
  ///   .constructor(|ctor| {
  ///     ctor
  ///       .param::<String>("text")
  ///       .build(|args| Ok(Greeting(args.get::<String>("text")?)))
  ///   })
  ///   .build();
  /// assert_eq!(greeting.descriptor().constructors()[0].parameters().len(), 1);
  /// ```
  pub fn constructor(
    mut self,
    define: impl FnOnce(ConstructorBuilder<C>) -> ConstructorInfo,
  ) -> Self {
    self.constructors.push(define(ConstructorBuilder {
      parameters: Vec::new(),
      preferred: false,
      _marker: PhantomData,
    }));
    self
  }

  /// Declares a settable property of type `T`.
  pub fn setter<T: ?Sized + Send + Sync + 'static>(
    self,
    name: &'static str,
    apply: impl Fn(&mut C, Arc<T>) + Send + Sync + 'static,
  ) -> Self {
    self.setter_of(name, ServiceType::of::<T>(), apply)
  }

  /// Declares a settable property whose service type is given explicitly,
  /// e.g. a closed generic contract.
  pub fn setter_of<T: ?Sized + Send + Sync + 'static>(
    mut self,
    name: &'static str,
    service_type: ServiceType,
    apply: impl Fn(&mut C, Arc<T>) + Send + Sync + 'static,
  ) -> Self {
    let apply: SetterFn = Arc::new(move |target, value| {
      let found = any::type_name::<C>();
      let target = target
        .downcast_mut::<C>()
        .ok_or_else(|| Error::TypeMismatch {
          expected: found.to_owned(),
          found: "another concrete type".to_owned(),
        })?;
      apply(target, value.expect::<T>()?);
      Ok(())
    });
    self.setters.push(SetterInfo {
      property: ParameterInfo { name, service_type },
      apply,
    });
    self
  }

  pub fn build(self) -> Concrete<C> {
    Concrete {
      descriptor: ConcreteType {
        inner: Arc::new(ConcreteInner {
          descriptor_id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
          type_id: TypeId::of::<C>(),
          name: any::type_name::<C>(),
          constructors: self.constructors,
          setters: self.setters,
        }),
      },
      _marker: PhantomData,
    }
  }
}

/// Builder for one constructor of `C`.
pub struct ConstructorBuilder<C> {
  parameters: Vec<ParameterInfo>,
  preferred: bool,
  _marker: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> ConstructorBuilder<C> {
  /// Adds a parameter resolved as service type `T`.
  pub fn param<T: ?Sized + 'static>(self, name: &'static str) -> Self {
    self.param_of(name, ServiceType::of::<T>())
  }

  pub fn param_of(mut self, name: &'static str, service_type: ServiceType) -> Self {
    self.parameters.push(ParameterInfo { name, service_type });
    self
  }

  /// Marks this constructor as the one to use regardless of arity.
  pub fn preferred(mut self) -> Self {
    self.preferred = true;
    self
  }

  pub fn build(
    self,
    invoke: impl Fn(&Arguments) -> std::result::Result<C, BoxError> + Send + Sync + 'static,
  ) -> ConstructorInfo {
    ConstructorInfo {
      parameters: self.parameters,
      preferred: self.preferred,
      invoke: Arc::new(move |args| invoke(args).map(|value| Box::new(value) as RawObject)),
    }
  }
}

/// The resolved constructor arguments handed to a constructor closure.
pub struct Arguments {
  concrete: &'static str,
  values: Vec<(&'static str, Object)>,
}

impl Arguments {
  pub(crate) fn new(concrete: &'static str, values: Vec<(&'static str, Object)>) -> Self {
    Self { concrete, values }
  }

  /// The argument `name` as its service contract `T`.
  pub fn get<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
    self.object(name)?.expect::<T>()
  }

  /// A clone of the argument `name`, for literal values.
  pub fn value<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
    self.get::<T>(name).map(|arc| (*arc).clone())
  }

  pub fn object(&self, name: &str) -> Result<&Object> {
    self
      .values
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v)
      .ok_or_else(|| Error::MissingArgument {
        concrete: self.concrete.to_owned(),
        name: name.to_owned(),
      })
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}
