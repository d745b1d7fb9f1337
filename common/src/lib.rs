// Trigger orchestration engine: shared library for the API server and tests

pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod processors;
pub mod schedule;
pub mod service;
pub mod telemetry;
pub mod webhook;

pub use service::TriggerService;
