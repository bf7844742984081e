//! HTTP and WebSocket surface of the coaching API.

pub mod middleware;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod state;
