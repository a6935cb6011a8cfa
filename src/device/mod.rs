pub mod connection;
pub mod constants;
pub mod payload;
pub mod scanner;
pub mod service;
pub mod sync;
pub mod types;
