//! iBackup Trigger Library
//!
//! HTTP trigger that runs `idevicebackup2` at most once a day and reports
//! the backup date to Home Assistant.

pub mod app;
pub mod backup;
pub mod clock;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod server;
pub mod utils;
