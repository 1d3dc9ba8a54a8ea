pub mod stdio;
pub mod streamable_http;

pub use stdio::{StdioConfig, StdioTransport};
pub use streamable_http::StreamableHttpTransport;
