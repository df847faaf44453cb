pub mod bitmap;
pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod events;
pub mod logging;
pub mod reconcile;
pub mod resume_store;
pub mod scanner;
