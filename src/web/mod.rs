//! HTTP and WebSocket surface

pub mod handlers;
mod page;
mod routes;
mod ws;

pub use routes::create_router;
