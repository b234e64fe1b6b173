pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod scoring;
