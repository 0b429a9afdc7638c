//! HTTP middleware.

mod requests;

pub use requests::track_requests;
