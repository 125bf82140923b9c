//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::calculator::Quote;
use crate::catalog::{PricingCatalog, Tier};
use crate::gateway::types::{
    CoFounderPriceRequest, DecideRequest, GrantRequest, ListQuery, OnchainVerifyRequest,
    PurchaseRequest, QuoteRequest, ReverseRequest, TierPriceRequest,
};
use crate::journal::{JournalStats, PaymentRail, ShareClass, TierBreakdown, TxStatus};
use crate::view::{AdminOverview, CatalogView, EffectiveShareView, LedgerDrift, TierAvailability};

/// JWT bearer authentication scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Share Ledger API",
        version = "1.0.0",
        description = "Equity share purchases across card, invoice, on-chain and manual payment rails, with exactly-once settlement."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::shares::get_catalog,
        crate::gateway::handlers::shares::post_quote,
        crate::gateway::handlers::shares::get_me,
        crate::gateway::handlers::admin::get_overview,
    ),
    components(
        schemas(
            Quote,
            QuoteRequest,
            PurchaseRequest,
            OnchainVerifyRequest,
            GrantRequest,
            DecideRequest,
            ReverseRequest,
            TierPriceRequest,
            CoFounderPriceRequest,
            ListQuery,
            ShareClass,
            PaymentRail,
            TxStatus,
            TierBreakdown,
            PricingCatalog,
            Tier,
            CatalogView,
            TierAvailability,
            EffectiveShareView,
            LedgerDrift,
            JournalStats,
            AdminOverview,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "shares", description = "Purchase and holdings endpoints"),
        (name = "admin", description = "Reconciliation and catalog administration (admin role)"),
        (name = "webhooks", description = "Payment provider callbacks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Share Ledger API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_openapi_json_serializable() {
        let json = ApiDoc::openapi().to_json();
        assert!(json.is_ok());
        assert!(json.unwrap().contains("Share Ledger API"));
    }

    #[test]
    fn test_documented_paths_registered() {
        let spec = ApiDoc::openapi();
        assert!(spec.paths.paths.contains_key("/api/v1/shares/catalog"));
        assert!(spec.paths.paths.contains_key("/api/v1/shares/me"));
        assert!(spec.paths.paths.contains_key("/api/v1/admin/overview"));
    }

    #[test]
    fn test_security_scheme_registered() {
        let components = ApiDoc::openapi().components.expect("should have components");
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
