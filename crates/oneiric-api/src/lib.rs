mod app;
mod error;
mod handlers;

pub use app::{build_app, serve};
pub use error::ApiError;
