pub mod http;
pub mod rate_limit;
pub mod registry;
pub mod shell;
pub mod transport;

pub use http::HttpTransport;
pub use rate_limit::PublishRateLimiter;
pub use registry::TransportRegistry;
pub use shell::ShellTransport;
pub use transport::{RetrieveQuery, Transport, TransportCapabilities};
