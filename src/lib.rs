pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod store;
pub mod worker;
