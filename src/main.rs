//! Share Ledger service entry point
//!
//! Wires the store, rail adapters, proof store, reconciliation engine
//! and sweeper together, then serves the HTTP gateway.

use std::sync::Arc;

use shareledger::config::AppConfig;
use shareledger::engine::{LogNotifier, LogReferral, ReconEngine, SideEffects, Sweeper};
use shareledger::gateway::auth::AuthService;
use shareledger::gateway::{self, AppState};
use shareledger::proof_store::ProofStore;
use shareledger::rails::card::CardRail;
use shareledger::rails::invoice::InvoiceRail;
use shareledger::rails::manual::ManualRail;
use shareledger::rails::onchain::OnchainRail;
use shareledger::rails::RailSet;
use shareledger::store::ReconStore;
use shareledger::store::pg::PgStore;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn ReconStore>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.postgres_url {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        let store = PgStore::new(pool);
        store.ensure_schema(&config.catalog).await?;
        tracing::info!("postgres store ready");
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "mock-api")]
    {
        tracing::warn!("no postgres_url configured; using in-memory store");
        Ok(Arc::new(shareledger::store::mem::MemStore::new(
            &config.catalog,
        )))
    }
    #[cfg(not(feature = "mock-api"))]
    {
        Err("postgres_url is required (set DATABASE_URL)".into())
    }
}

fn build_rails(config: &AppConfig) -> Result<RailSet, Box<dyn std::error::Error>> {
    use shareledger::journal::PaymentRail;

    let card = CardRail::new(config.rails.card.clone())?;
    let invoice = InvoiceRail::new(config.rails.invoice.clone())?;
    let onchain = OnchainRail::new(config.rails.onchain.clone())?;

    Ok(RailSet::new()
        .register(PaymentRail::Card, Arc::new(card))
        .register(PaymentRail::Invoice, Arc::new(invoice))
        .register(PaymentRail::Onchain, Arc::new(onchain))
        .register_manual(Arc::new(ManualRail::new())))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = shareledger::logging::init_logging(&config);

    tracing::info!("starting share ledger service in {} mode", env);

    let store = build_store(&config).await?;
    let rails = build_rails(&config)?;

    let proofs = Arc::new(ProofStore::new(&config.proof_store.data_dir));
    proofs.init().await?;

    let effects = SideEffects::new(
        store.clone(),
        Arc::new(LogReferral),
        Arc::new(LogNotifier {
            admin_email: config.notifications.admin_email.clone(),
        }),
    );
    let engine = Arc::new(ReconEngine::new(store, rails, effects));

    let sweeper_handles = Sweeper::new(engine.clone(), config.sweeper.clone()).spawn();

    let state = Arc::new(AppState {
        engine,
        proofs,
        auth: AuthService::new(config.gateway.jwt_secret.clone()),
        invoice_webhook_secret: config.rails.invoice.webhook_secret.clone(),
    });

    let port = get_port_override().unwrap_or(config.gateway.port);
    let result = gateway::run_server(state, &config.gateway.host, port).await;

    for handle in sweeper_handles {
        handle.abort();
    }
    result
}
