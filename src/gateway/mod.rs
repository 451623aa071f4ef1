//! Gateway module: the lab terminal's network surface
//!
//! - `protocol`: WebSocket frame types and UTF-8 chunk decoding
//! - `session`: per-connection state machine over the executor
//! - `ws`: the socket read/write loop
//! - `server`: REST routes, CORS, rate limiting and graceful shutdown

pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod templates;
pub mod ws;

pub use protocol::{parse_client_message, ClientMessage, FrameError, ServerMessage, Utf8Carry};
pub use rate_limit::{RateDecision, SlidingWindowRateLimiter};
pub use server::{router, serve, serve_on, AppState};
pub use session::{Session, SessionContext, SessionManager, EXECUTE_PERMISSION};
pub use templates::{templates_for, CommandTemplate, CATEGORIES};
