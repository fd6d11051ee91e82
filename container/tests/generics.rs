use fibre_container::{
  ClosedGeneric, ConcreteType, ConfigurationError, Container, Error, Implementation, LifecycleKind, Resolver,
  ServiceType,
};
use std::any;
use std::marker::PhantomData;
use std::sync::Arc;

// --- Test Fixtures ---

trait Repository<E>: Send + Sync {
  fn describe(&self) -> String;
}

struct MemoryRepository<E>(PhantomData<fn() -> E>);

impl<E> Default for MemoryRepository<E> {
  fn default() -> Self {
    Self(PhantomData)
  }
}

impl<E: 'static> Repository<E> for MemoryRepository<E> {
  fn describe(&self) -> String {
    format!("memory:{}", short::<E>())
  }
}

struct SqlRepository<E>(PhantomData<fn() -> E>);

impl<E> Default for SqlRepository<E> {
  fn default() -> Self {
    Self(PhantomData)
  }
}

impl<E: 'static> Repository<E> for SqlRepository<E> {
  fn describe(&self) -> String {
    format!("sql:{}", short::<E>())
  }
}

fn short<E>() -> &'static str {
  let name = any::type_name::<E>();
  name.rsplit("::").next().unwrap_or(name)
}

struct Order;
struct Customer;

// Entities opt into SQL storage.
trait Entity: Sized + 'static {
  fn sql() -> Option<Implementation<dyn Repository<Self>>>;
}

impl Entity for Order {
  fn sql() -> Option<Implementation<dyn Repository<Self>>> {
    Some(Implementation::<dyn Repository<Order>>::new(
      ConcreteType::with_default::<SqlRepository<Order>>(),
      |r| r,
    ))
  }
}

impl Entity for Customer {
  fn sql() -> Option<Implementation<dyn Repository<Self>>> {
    None
  }
}

impl<E: Entity> ClosedGeneric for dyn Repository<E> {
  const DEFINITION: &'static str = "Repository";

  fn arguments() -> Vec<ServiceType> {
    vec![ServiceType::of::<E>()]
  }

  fn close(template: &str) -> Option<Implementation<Self>> {
    match template {
      "MemoryRepository" => Some(Implementation::<Self>::new(
        ConcreteType::with_default::<MemoryRepository<E>>(),
        |r| r,
      )),
      "SqlRepository" => E::sql(),
      _ => None,
    }
  }
}

fn repositories(kind: LifecycleKind) -> Container {
  Container::new(|r| {
    r.for_generic("Repository").lifecycle(kind).use_template("MemoryRepository");
    r.for_generic("Repository").add_template("SqlRepository");
  })
  .unwrap()
}

// --- Generic Tests ---

#[test]
fn test_open_family_closes_for_each_requested_type() {
  // Arrange
  let container = repositories(LifecycleKind::Transient);

  // Act
  let orders = container.get_closed::<dyn Repository<Order>>().unwrap();
  let customers = container.get_closed::<dyn Repository<Customer>>().unwrap();

  // Assert
  assert_eq!(orders.describe(), "memory:Order");
  assert_eq!(customers.describe(), "memory:Customer");
}

#[test]
fn test_named_templates_and_resolve_all() {
  // Arrange
  let container = repositories(LifecycleKind::Transient);

  // Act
  let sql = container
    .get_closed_named::<dyn Repository<Order>>("SqlRepository")
    .unwrap();
  let all_orders = container.get_all_closed::<dyn Repository<Order>>().unwrap();
  let all_customers = container.get_all_closed::<dyn Repository<Customer>>().unwrap();

  // Assert
  assert_eq!(sql.describe(), "sql:Order");
  let described: Vec<_> = all_orders.iter().map(|r| r.describe()).collect();
  assert_eq!(described, vec!["memory:Order", "sql:Order"]);
  // Templates that do not apply to a closing are left out of its family.
  assert_eq!(all_customers.len(), 1);
}

#[test]
fn test_closed_families_keep_the_open_lifecycle() {
  // Arrange
  let container = repositories(LifecycleKind::Singleton);
  let child = container.create_child().unwrap();

  // Act
  let r1 = container.get_closed::<dyn Repository<Order>>().unwrap();
  let r2 = child.get_closed::<dyn Repository<Order>>().unwrap();
  let other = container.get_closed::<dyn Repository<Customer>>().unwrap();

  // Assert
  assert!(Arc::ptr_eq(&r1, &r2));
  assert_eq!(other.describe(), "memory:Customer");
}

#[test]
fn test_closed_registration_wins_over_the_open_family() {
  // Arrange
  let container = Container::new(|r| {
    r.for_generic("Repository").use_template("MemoryRepository");
    r.for_type::<dyn Repository<Order>>()
      .use_concrete(ConcreteType::with_default::<SqlRepository<Order>>(), |c| c);
  })
  .unwrap();

  // Act & Assert
  assert_eq!(
    container.get_closed::<dyn Repository<Order>>().unwrap().describe(),
    "sql:Order"
  );
  assert_eq!(
    container.get_closed::<dyn Repository<Customer>>().unwrap().describe(),
    "memory:Customer"
  );
}

#[test]
fn test_unclosable_family_is_a_configuration_error() {
  // Arrange
  let container = Container::new(|r| {
    r.for_generic("Repository").use_template("SqlRepository");
  })
  .unwrap();

  // Act
  let result = container.get_closed::<dyn Repository<Customer>>();

  // Assert
  assert!(matches!(
    result,
    Err(Error::Configuration(ConfigurationError::UnclosableGeneric { .. }))
  ));
  assert!(container.get_closed::<dyn Repository<Order>>().is_ok());
}

#[test]
fn test_closed_singletons_survive_reconfiguration() {
  // Arrange
  let container = repositories(LifecycleKind::Singleton);
  let before = container.get_closed::<dyn Repository<Order>>().unwrap();

  // Act
  container
    .configure(|r| {
      r.for_type::<String>().use_object(Arc::new("unrelated".to_string()));
    })
    .unwrap();
  let after = container.get_closed::<dyn Repository<Order>>().unwrap();
  let customers = container.get_closed::<dyn Repository<Customer>>().unwrap();

  // Assert
  assert!(Arc::ptr_eq(&before, &after));
  assert_eq!(customers.describe(), "memory:Customer");
  assert_eq!(container.get::<String>().unwrap().as_str(), "unrelated");
}
