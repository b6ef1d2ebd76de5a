pub mod batching;
pub mod config;
pub mod controllers;
pub mod db;
pub mod errors;
pub mod hal;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod negotiate;
pub mod pagination;
pub mod publish;
pub mod rest;
pub mod rollup;
pub mod schema;
pub mod store;
pub mod validate;
