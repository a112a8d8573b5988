pub mod handlers;
pub mod server;

pub use crate::config::ServerConfig;
pub use handlers::{ApiError, AppState};
pub use server::{build_router, run_server};
