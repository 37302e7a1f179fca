pub mod auth;
pub mod errors;
pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{build_router, run};
