pub mod error;
pub mod gofile;
pub mod path_conversions;
pub mod tools;

pub use gofile::{GofileSettings, GofileStorage};
