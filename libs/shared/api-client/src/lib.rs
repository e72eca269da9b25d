pub mod client;

pub use client::{encode_path_segment, ApiClient};
