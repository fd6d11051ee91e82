use fibre_container::{resolve, Container, Resolver};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

trait MessageSender: Send + Sync {
  fn send(&self, to: &str, message: &str) -> String;
}

struct EmailSender;
impl MessageSender for EmailSender {
  fn send(&self, to: &str, message: &str) -> String {
    format!("Sending email to {}: '{}'", to, message)
  }
}

struct SmsSender;
impl MessageSender for SmsSender {
  fn send(&self, to: &str, message: &str) -> String {
    format!("Sending SMS to {}: '{}'", to, message)
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let container = Container::new(|r| {
    r.for_type::<dyn MessageSender>()
      .add_object(Arc::new(EmailSender))
      .named("email");
    r.for_type::<dyn MessageSender>()
      .use_object(Arc::new(SmsSender))
      .named("sms");
  })?;

  // Choose an implementation at the point of resolution.
  let email = resolve!(container, trait MessageSender, "email");
  let result1 = email.send("test@example.com", "Hello from Fibre!");
  println!("{}", result1);
  assert!(result1.contains("email"));

  // `use_object` made the SMS sender the default.
  let result2 = resolve!(container, trait MessageSender).send("+123456789", "Hello from Fibre!");
  println!("{}", result2);
  assert!(result2.contains("SMS"));

  // Every instance, in registration order.
  for sender in container.get_all::<dyn MessageSender>()? {
    println!("{}", sender.send("everyone", "Broadcast"));
  }
  Ok(())
}
