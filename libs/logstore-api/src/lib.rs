pub mod broker;
pub mod config;
pub mod error;
pub mod record;
pub mod storage;
pub mod validate;

use std::future::Future;
use std::pin::Pin;

pub use config::deserialize_duration;
pub use error::{BrokerError, BrokerErrorKind, StoreError};
pub use record::{DomainLog, LogBatch, LogLevel, RawRecord};
pub use validate::{Field, ValidationError, validate};

/// Boxed `Send` future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
