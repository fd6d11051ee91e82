//! Open generic service types.
//!
//! Rust monomorphizes generics at compile time, so an open family such as
//! `Repository<>` cannot build `SqlRepository<Order>` on its own. Instead the
//! closed contract describes itself through `ClosedGeneric`: its definition
//! name, its type arguments, and how to close each named template of that
//! definition for its own arguments. The configuration graph calls `close`
//! once per closed type and memoizes the resulting family.
//!
//! ```
//! use fibre_container::{ClosedGeneric, ConcreteType, Container, Implementation, Resolver, ServiceType};
//! use std::marker::PhantomData;
//!
//! trait Repository<E>: Send + Sync {
//!   fn entity(&self) -> &'static str;
//! }
//!
//! struct MemoryRepository<E>(PhantomData<fn() -> E>);
//!
//! impl<E> Default for MemoryRepository<E> {
//!   fn default() -> Self {
//!     Self(PhantomData)
//!   }
//! }
//!
//! impl<E: 'static> Repository<E> for MemoryRepository<E> {
//!   fn entity(&self) -> &'static str {
//!     std::any::type_name::<E>()
//!   }
//! }
//!
//! struct Order;
//!
//! impl<E: 'static> ClosedGeneric for dyn Repository<E> {
//!   const DEFINITION: &'static str = "Repository";
//!
//!   fn arguments() -> Vec<ServiceType> {
//!     vec![ServiceType::of::<E>()]
//!   }
//!
//!   fn close(template: &str) -> Option<Implementation<Self>> {
//!     match template {
//!       "MemoryRepository" => Some(Implementation::<Self>::new(
//!         ConcreteType::with_default::<MemoryRepository<E>>(),
//!         |repo| repo,
//!       )),
//!       _ => None,
//!     }
//!   }
//! }
//!
//! let container = Container::new(|r| {
//!   r.for_generic("Repository").use_template("MemoryRepository");
//! })
//! .unwrap();
//!
//! let orders = container.get_closed::<dyn Repository<Order>>().unwrap();
//! assert!(orders.entity().ends_with("Order"));
//! ```

use crate::core::ServiceType;
use crate::graph::{Implementation, PluggedType};

/// A closed generic contract that can be served by an open generic family.
pub trait ClosedGeneric: Send + Sync + 'static {
  /// The name of the open definition, shared by every closing.
  const DEFINITION: &'static str;

  /// The type arguments of this closing.
  fn arguments() -> Vec<ServiceType>;

  /// Builds the implementation of the open template named `template` for
  /// this closing, or `None` if the template does not apply.
  fn close(template: &str) -> Option<Implementation<Self>>;
}

pub(crate) type CloseFn = fn(&str) -> Option<PluggedType>;

pub(crate) fn close_erased<T: ?Sized + ClosedGeneric>(template: &str) -> Option<PluggedType> {
  T::close(template).map(Implementation::into_plugged)
}
