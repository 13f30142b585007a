pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod listings;
pub mod mail;
pub mod media;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod tasks;
pub mod utils;
pub mod validation;
