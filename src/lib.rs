pub mod config;
pub mod cycle;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod model;
pub mod notify;
pub mod scheduler;
