//! WebSocket upgrade and per-connection worker loops.

mod handler;
mod origin;

pub use handler::ws_handler;
pub use origin::OriginPolicy;
