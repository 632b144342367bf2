pub mod config;
pub mod coordinator;
pub mod display;
pub mod logger;
