//! Client-side REST layer for the Batch Apps service.
//!
//! Every network operation goes through [`RestClient::call`], which opens a
//! session from a [`SessionProvider`], sends one request and maps the status
//! code to a [`CallError`]. The `get`, `head`, `post`, `put` and `download`
//! operations add JSON handling, URL templating and file streaming on top.

pub mod config;
pub mod download;
pub mod error;
pub mod naming;
pub mod rest;
pub mod session;

pub use config::ClientConfig;
pub use download::{DownloadOptions, DownloadOutcome};
pub use error::{CallError, Cause, ErrorKind, FailedResponse};
pub use rest::{CallOptions, RestClient, UserFile};
pub use session::{RetryAdapter, Session, SessionProvider, TokenProvider};
