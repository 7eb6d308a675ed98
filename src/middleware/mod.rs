pub mod chain;
pub mod request_logging;

pub use chain::{Middleware, MiddlewareChain, MiddlewareEntry, Next, ResponseFuture};
pub use request_logging::RequestLoggingMiddleware;
