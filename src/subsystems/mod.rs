pub mod sweeper;
pub mod web;
