pub mod cloud_storage;
pub mod types;

pub use cloud_storage::ServerDirectory;
pub use types::*;
