pub mod app;
pub mod classifier;
pub mod config;
pub mod element_finder;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod tracker;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::PollOrchestrator;
pub use scraper::FetchPipeline;
pub use utils::error::AppError;
