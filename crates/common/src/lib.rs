pub mod config;
pub mod db;
pub mod funnel;
pub mod keys;
pub mod observability;
pub mod store;
pub mod time;
pub mod types;
