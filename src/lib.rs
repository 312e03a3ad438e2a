pub mod config;
pub mod date;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod storage;
