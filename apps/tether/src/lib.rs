pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod registry;
pub mod render;
pub mod telemetry;
