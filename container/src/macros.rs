//! Public macros for resolving services that must be present.

/// Resolves a service from a container, panicking if it cannot be resolved.
///
/// Use it where a missing registration is a programming error, such as the
/// composition root of an application. Everything else should call the
/// `Resolver` methods and handle the `Result`.
///
/// # Panics
///
/// Panics with the service type (and name) and the underlying error when the
/// resolve fails for any reason.
///
/// # Examples
///
/// ```
/// use fibre_container::{resolve, Container};
/// use std::sync::Arc;
///
/// let container = Container::new(|r| {
///   r.for_type::<String>().use_object(Arc::new("hello".to_owned()));
///   r.for_type::<u16>().add_object(Arc::new(8080)).named("port");
/// })
/// .unwrap();
///
/// let message = resolve!(container, String);
/// assert_eq!(*message, "hello");
///
/// let port = resolve!(container, u16, "port");
/// assert_eq!(*port, 8080);
/// ```
///
/// ```
/// use fibre_container::{resolve, Container};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///   fn greet(&self) -> String;
/// }
///
/// struct EnglishGreeter;
///
/// impl Greeter for EnglishGreeter {
///   fn greet(&self) -> String {
///     "Hello!".to_string()
///   }
/// }
///
/// let container = Container::new(|r| {
///   r.for_type::<dyn Greeter>().use_object(Arc::new(EnglishGreeter) as Arc<dyn Greeter>);
/// })
/// .unwrap();
///
/// let greeter = resolve!(container, trait Greeter);
/// assert_eq!(greeter.greet(), "Hello!");
/// ```
#[macro_export]
macro_rules! resolve {
  // resolve!(container, trait MyTrait)
  ($container:expr, trait $trait_ident:ident) => {
    $crate::resolve!($container, dyn $trait_ident)
  };

  // resolve!(container, trait MyTrait, "name")
  ($container:expr, trait $trait_ident:ident, $name:expr) => {
    $crate::resolve!($container, dyn $trait_ident, $name)
  };

  // resolve!(container, MyService)
  ($container:expr, $type:ty) => {
    match $crate::Resolver::get::<$type>(&$container) {
      Ok(service) => service,
      Err(err) => panic!(
        "Failed to resolve required service {}: {}",
        std::any::type_name::<$type>(),
        err
      ),
    }
  };

  // resolve!(container, MyService, "name")
  ($container:expr, $type:ty, $name:expr) => {
    match $crate::Resolver::get_named::<$type>(&$container, $name) {
      Ok(service) => service,
      Err(err) => panic!(
        "Failed to resolve required service {} named '{}': {}",
        std::any::type_name::<$type>(),
        $name,
        err
      ),
    }
  };
}
