pub mod application;
pub mod list;
pub mod style;
pub mod types;
