//! Dispatcher orchestration covering the worker pool, load balancing, health
//! sampling, and background task lifecycle.

pub mod balancer;
pub mod dispatcher;
pub mod health;
mod lifecycle;
pub mod worker_pool;
