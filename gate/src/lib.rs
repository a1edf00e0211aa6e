pub mod client;
pub mod config;
pub mod decoder;
pub mod notifier;
pub mod scanner;
pub mod shutdown;
pub mod station;
