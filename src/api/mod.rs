mod client;
mod types;

pub use client::{ApiClient, ApiError};
