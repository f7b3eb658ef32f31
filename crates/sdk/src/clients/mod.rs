//! Capability clients handed to handlers through the execution context.
//!
//! All clients are cheap to construct and connect lazily; retry policy lives
//! here (per client), never in the dispatch core.

pub mod datalog;
pub mod graphql;
pub mod http;
pub mod publish;
pub mod secrets;
pub mod storage;

pub use datalog::{DatalogClient, DatalogError};
pub use graphql::{GraphQlClient, GraphQlError};
pub use http::HttpClient;
pub use publish::{HttpMessageClient, MessageClient, PublishError, RecordingMessageClient, StatusEnvelope};
pub use secrets::{Credential, CredentialResolver};
pub use storage::{FileStorage, Storage, StorageError};
