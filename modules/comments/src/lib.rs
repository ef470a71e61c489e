pub mod auth;
pub mod broker_setup;
pub mod config;
pub mod consumer;
pub mod contracts;
pub mod db;
pub mod dlq;
pub mod events;
pub mod metrics;
pub mod middleware;
pub mod repos;
pub mod routes;
pub mod services;
pub mod validation;

pub use consumer::comment_consumer::start_comment_consumers;
