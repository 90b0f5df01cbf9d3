pub mod manager;
pub mod notifiers;
pub mod traits;

pub use manager::NotifierManager;
pub use traits::{NotificationResult, Notifier};
