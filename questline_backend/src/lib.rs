pub mod backup;
pub mod config;
pub mod events;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod progression;
pub mod runtime;
pub mod seed;
pub mod server;
pub mod store;
pub mod sync;
