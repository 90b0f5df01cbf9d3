pub mod error;
pub mod shutdown;

pub use error::{AppError, FetchError, FetchErrorKind};
pub use shutdown::{Shutdown, ShutdownSignal};
