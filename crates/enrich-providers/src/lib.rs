//! # enrich-providers
//!
//! HTTP clients for the external enrichment providers. Each one implements
//! [`enrich_core::EnrichmentProvider`], so the dispatcher never needs to know
//! which vendor it is talking to.
//!
//! | Provider | Company lookup key | Contact lookup key |
//! |----------|--------------------|--------------------|
//! | Apollo | website domain | email |
//! | BuiltWith | website domain | unsupported |
//! | Scrapin | LinkedIn URL | LinkedIn URL |

use std::sync::Arc;

use tracing::info;

use enrich_core::{EnrichmentProvider, Result};

pub mod apollo;
pub mod builtwith;
pub mod config;
pub mod http;
pub mod scrapin;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use apollo::ApolloProvider;
pub use builtwith::BuiltWithProvider;
pub use config::ProviderConfig;
pub use scrapin::ScrapinProvider;

/// Build the three vendor providers sharing one HTTP client.
pub fn build_providers(config: &ProviderConfig) -> Result<Vec<Arc<dyn EnrichmentProvider>>> {
    let client = http::build_client(config.timeout)?;

    info!(
        subsystem = "providers",
        op = "init",
        apollo_url = %config.apollo_url,
        builtwith_url = %config.builtwith_url,
        scrapin_url = %config.scrapin_url,
        timeout_secs = config.timeout.as_secs(),
        "Initializing enrichment providers"
    );

    Ok(vec![
        Arc::new(ApolloProvider::new(client.clone(), config.apollo_url.clone())),
        Arc::new(BuiltWithProvider::new(client.clone(), config.builtwith_url.clone())),
        Arc::new(ScrapinProvider::new(client, config.scrapin_url.clone())),
    ])
}
