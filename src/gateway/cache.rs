//! TTL-based cache for the public catalog endpoint
//!
//! Uses the `cached` crate for automatic TTL expiration. Price changes
//! from the admin surface become visible within TTL_SECONDS without a
//! restart; purchases always read the live catalog.

use cached::proc_macro::cached;
use std::sync::Arc;

use crate::store::ReconStore;
use crate::view::{self, CatalogView};

/// TTL for the catalog cache in seconds
pub const TTL_SECONDS: u64 = 5;

/// Load the public catalog view with caching
///
/// Results are cached for TTL_SECONDS. After expiration, the next call
/// refreshes from the store.
#[cached(
    time = 5,
    key = "String",
    convert = r#"{ "catalog".to_string() }"#,
    result = true
)]
pub async fn load_catalog_cached(store: Arc<dyn ReconStore>) -> Result<CatalogView, String> {
    tracing::debug!("[cache] Loading catalog from store");
    store
        .catalog()
        .await
        .map(|c| view::project_catalog(&c))
        .map_err(|e| format!("Failed to load catalog: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_constant() {
        assert_eq!(TTL_SECONDS, 5);
    }
}
