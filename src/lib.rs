pub mod analytics;
pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod logging;
pub mod model;
pub mod session;
pub mod web;

pub use database::CredentialStore;
pub use error::{AppError, StorageError};
