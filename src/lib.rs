pub mod cache;
pub mod calculator;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod model;
pub mod pipeline;
pub mod rates;
pub mod scheduler;
pub mod service;
