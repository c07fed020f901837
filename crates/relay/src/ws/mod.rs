// WebSocket surface: upgrade handler, frame codec, and connection sessions.

pub mod handler;
pub mod protocol;
pub mod session;

pub use handler::router;
pub use session::{ConnectionId, SessionManager};
