pub mod kinds;
pub mod types;
