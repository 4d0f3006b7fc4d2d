// Library exports for Blogchain
// This allows integration tests and the binary to share the same modules

pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod posts;
pub mod routes;
pub mod state;
