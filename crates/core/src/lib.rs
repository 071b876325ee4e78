pub mod credentials;
pub mod error;
pub mod generator;
pub mod interview;
pub mod transcript;
