pub mod app;
pub mod artifact;
pub mod config;
pub mod console;
pub mod error;
pub mod fs_util;
pub mod host;
pub mod output;
pub mod prereq;
pub mod process;
pub mod progress;
pub mod staging;
