pub mod detection;
pub mod error;
