// Fanout API Library
//
// HTTP signaling surface for the fanout SFU

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppError, AppResult, AppState};
