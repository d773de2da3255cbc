pub mod http_client;
pub mod http_server;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use http_server::{HandlerError, HttpHandler, HttpServer};
