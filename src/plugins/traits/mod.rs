pub mod notifier;

pub use notifier::{NotificationResult, Notifier};
