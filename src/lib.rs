pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod install;
pub mod logs;
pub mod platform;
pub mod requirements;
pub mod ui;
pub mod wizard;
