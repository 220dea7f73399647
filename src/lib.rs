pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod logging;
pub mod model;
pub mod player;
pub mod queue;
pub mod schedule;
pub mod session;
pub mod ui;
