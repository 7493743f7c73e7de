pub mod config;
pub mod constants;
pub mod error;
pub mod logger;
pub mod tools;
