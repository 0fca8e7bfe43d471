pub mod adapters;
pub mod cache;
pub mod config;
pub mod execution;
pub mod icons;
pub mod models;
pub mod service;

pub use config::ShelfConfig;
pub use service::PackageService;
