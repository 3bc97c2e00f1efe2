pub mod context;
pub mod forward;
pub mod handler;
pub mod identity;

pub use context::{empty_body, full_body, BoxBody, CapturedResponse, RequestContext};
pub use forward::{build_http_client, HttpClient};
pub use handler::handle_request;
