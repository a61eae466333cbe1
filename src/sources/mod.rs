//! External data sources. Each source fetches one raw JSON payload per
//! subject property; normalization into canonical facts happens in the
//! valuation layer.

pub mod listings;
pub mod registry;

use crate::valuation::error::SourceError;
use crate::valuation::types::{SourceId, SubjectKey};
use std::future::Future;
use std::pin::Pin;

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, SourceError>> + Send + 'a>>;

/// A pluggable data source. Implementations classify their own failures:
/// a 429 or provider throttle message is RateLimited, anything else that
/// prevents a payload is Unavailable.
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> SourceId;

    fn fetch(&self, key: SubjectKey) -> FetchFuture<'_>;
}
