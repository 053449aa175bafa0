pub mod app_state;
pub mod config;
pub mod scheduler;
pub mod sources;
pub mod startup;
