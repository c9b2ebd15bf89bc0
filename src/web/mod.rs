//! HTTP surface: the hub callback server and its error responses.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::CallbackServer;
