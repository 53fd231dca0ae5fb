pub mod class;
pub mod config;
pub mod controller;
pub mod engine;
pub mod k8s;
pub mod labels;
pub mod queue;
pub mod telemetry;
pub mod watch;
