pub mod app;
pub mod cli;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod models;
pub mod services;
pub mod utils;
