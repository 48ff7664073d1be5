//! Symbol to instrument resolution across an ordered list of venues.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::metrics;
use crate::store::Store;

use super::types::{JobError, ResolvedInstrument};

/// Resolves symbols by querying the store venue by venue, in priority order.
#[derive(Clone)]
pub struct InstrumentResolver {
    store: Arc<dyn Store>,
    venues: Vec<String>,
}

impl InstrumentResolver {
    /// Create a resolver that tries `venues` in the given order.
    pub fn new(store: Arc<dyn Store>, venues: Vec<String>) -> Self {
        Self { store, venues }
    }

    pub fn venues(&self) -> &[String] {
        &self.venues
    }

    /// Resolve `symbol` on the first venue that lists it with a positive id.
    ///
    /// Lookup errors and non-positive ids fall through to the next venue.
    pub async fn resolve(&self, symbol: &str) -> Result<ResolvedInstrument, JobError> {
        for (idx, venue) in self.venues.iter().enumerate() {
            match self.store.lookup_instrument(symbol, venue).await {
                Ok(Some(id)) if id > 0 => {
                    if idx > 0 {
                        debug!(symbol, venue = %venue, "Resolved on fallback venue");
                        metrics::VENUE_FALLBACKS.inc();
                    }
                    return Ok(ResolvedInstrument {
                        symbol: symbol.to_string(),
                        venue: venue.clone(),
                        instrument_id: id,
                    });
                }
                Ok(Some(id)) => {
                    debug!(symbol, venue = %venue, id, "Ignoring non-positive instrument id");
                }
                Ok(None) => {
                    debug!(symbol, venue = %venue, "Symbol not listed on venue");
                }
                Err(e) => {
                    warn!(symbol, venue = %venue, error = %e, "Instrument lookup failed");
                }
            }
        }

        Err(JobError::NotFound {
            symbol: symbol.to_string(),
            venues: self.venues.clone(),
        })
    }
}
