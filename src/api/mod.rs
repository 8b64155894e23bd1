pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use middleware::log_request_errors;
pub use routes::{list_videos, logs, start_stream, status, stop_stream, upload_video};
