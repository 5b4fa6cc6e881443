pub mod app;
pub mod config;
pub mod domain;
pub mod platform;

pub use config::Cli;
pub use config::InitializerConfig;
pub use domain::Reconciler;
