//! File gateway adapter: HMAC-signed download and multipart upload.

mod client;
pub mod sign;

pub use client::{GatewayConfig, HttpFileGateway};
