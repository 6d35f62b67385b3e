pub mod bus;
pub mod error;
pub mod intensity;
pub mod models;
pub mod settings;
pub mod snapshot;
