//! smods-manager - install and track Cities: Skylines mods
//!
//! This crate provides:
//! - An install/uninstall orchestrator with dependency resolution and
//!   checkpoint compensation
//! - SQLite bookkeeping of installed and downloaded revisions
//! - A WebSocket hub broadcasting per-mod status snapshots to UIs

pub mod app;
pub mod catalogue;
pub mod config;
pub mod db;
pub mod download;
pub mod hub;
pub mod status;
pub mod tasks;

pub use app::App;
pub use config::Config;
