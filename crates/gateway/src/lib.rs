//! Browser-facing surface: HTTP control of the registries and the detection
//! loop, plus a WebSocket stream of rendered frames and metrics.

pub mod config;
pub mod encode;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sink;
pub mod state;
pub mod ws;
