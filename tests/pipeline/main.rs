#[path = "../support/mod.rs"]
mod support;

mod dispatcher_flow;
mod runner;
