pub mod handlers;
pub mod response;
pub mod server;
pub mod websocket;

pub use response::{ApiError, ApiResponse};
pub use server::{ApiServer, AppState};
