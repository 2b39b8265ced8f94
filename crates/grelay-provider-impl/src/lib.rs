mod client;
mod egress;
mod gemini;
mod probe;

pub use client::shared_client;
pub use egress::HttpListProvider;
pub use gemini::{GeminiCaller, DEFAULT_BASE_URL};
pub use probe::{HttpProber, DEFAULT_PROBE_URL};
