pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod identity;
pub mod output;
pub mod resources;
pub mod s3;
pub mod sheet;
pub mod store;
pub mod translation;
