pub mod config;
pub mod consumer;
pub mod db;
pub mod feed;
pub mod signal;
pub mod store;
pub mod stream;

pub mod error;
pub mod task;
pub mod time;
