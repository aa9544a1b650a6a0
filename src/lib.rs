// Library entry point for chirp
// Exposes modules for testing

pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod media;
pub mod models;
pub mod services;
pub mod store;
