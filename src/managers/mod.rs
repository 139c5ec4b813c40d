pub mod batch;
pub mod connection;
pub mod executor;
pub mod orchestrator;
pub mod process;
