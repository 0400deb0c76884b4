//! # staticd
//!
//! A small HTTP/1.x origin server for static files.
//!
//! Connections are accepted by one or more accept loops and handed to a
//! bounded worker pool; each connection carries exactly one request, which
//! is decoded, resolved against a root directory and answered with the file,
//! a directory listing or an error page.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use staticd::config::ServerConfig;
//! use staticd::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("/srv/www");
//!     let server = Server::bind(&config, config.dispatcher()?).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod mime;
pub mod pool;
pub mod resource;
pub mod server;
pub mod template;

pub use config::{ConfigError, ServerConfig, Settings};
pub use http::{Method, ProtocolError, Request, Response, StatusCode};
pub use pool::{PoolConfig, WorkerPool};
pub use resource::{ResolvedResource, Resolver};
pub use server::{Dispatcher, Server, ServerError};
