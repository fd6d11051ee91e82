use fibre_container::{resolve, ConcreteType, Container, Resolver};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// The abstraction.
trait Logger: Send + Sync {
  fn log(&self, message: &str);
}

#[derive(Default)]
struct ConsoleLogger;
impl Logger for ConsoleLogger {
  fn log(&self, message: &str) {
    println!("[CONSOLE LOG]: {}", message);
  }
}

// A service depending on the abstraction. The container picks the
// constructor and supplies the logger.
struct ReportService {
  logger: Arc<dyn Logger>,
  title: Arc<String>,
}

impl ReportService {
  fn generate_report(&self) {
    self.logger.log(&format!("Starting report '{}'.", self.title));
    self.logger.log("Finished report generation.");
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let report_service = ConcreteType::builder::<ReportService>()
    .constructor(|ctor| {
      ctor
        .param::<dyn Logger>("logger")
        .param::<String>("title")
        .build(|args| {
          Ok(ReportService {
            logger: args.get("logger")?,
            title: args.get("title")?,
          })
        })
    })
    .build();

  let container = Container::new(move |r| {
    r.for_type::<dyn Logger>()
      .singleton()
      .use_concrete(ConcreteType::with_default::<ConsoleLogger>(), |c| c);
    r.for_type::<ReportService>()
      .use_concrete(report_service, |s| s)
      .ctor_value("title", "Quarterly".to_string());
  })?;

  println!("Resolving the high-level service...");
  let service = container.get::<ReportService>()?;
  service.generate_report();

  // Trait objects resolve directly as well.
  resolve!(container, trait Logger).log("Resolved through the macro.");
  Ok(())
}
