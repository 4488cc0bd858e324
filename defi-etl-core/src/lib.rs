//! defi-etl core: everything between the wire and a canonical CSV row.
//!
//! - Source and dataset catalogue ([`source`])
//! - HTTP transport, retry with backoff, rate limiting, circuit breaking ([`http`])
//! - Per-source API clients ([`clients`])
//! - Immutable raw JSON artifacts ([`raw`])
//! - Canonical record types and their normalizers ([`records`], [`normalize`])
//! - Derived feature columns ([`features`])
//! - Canonical CSV files ([`processed`]) and the export schema contract ([`schema`])

pub mod clients;
pub mod features;
pub mod http;
pub mod normalize;
pub mod processed;
pub mod raw;
pub mod records;
pub mod schema;
pub mod source;

pub use http::FetchError;
pub use normalize::{NormalizeError, Normalized, ValidationError};
pub use processed::{InputRule, ProcessedDataset, ProcessedError, ProcessedStore};
pub use raw::{RawPayload, RawStore, RawStoreError};
pub use source::{Dataset, DatasetKey, Source};
