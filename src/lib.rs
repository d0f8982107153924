#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod dashboards;
pub mod error;
pub mod hashcode;
pub mod keycloak;
pub mod lagoondb;
pub mod models;
pub mod observability;
pub mod opensearch;
pub mod runtime;
pub mod sync;
