pub mod health;
pub mod scan;
pub mod settings;
pub mod sources;
