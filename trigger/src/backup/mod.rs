//! Daily device backup

pub mod command;
pub mod fsm;
pub mod guard;
pub mod process;
pub mod run_log;
pub mod runner;
