pub mod api;
pub mod audio;
pub mod browser;
pub mod command;
pub mod config;
pub mod dbus;
pub mod engine;
pub mod extension;
pub mod injector;
pub mod message;
pub mod service;
pub mod telemetry;
pub mod utils;
