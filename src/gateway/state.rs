//! Shared state handed to every handler

use std::sync::Arc;

use super::auth::AuthService;
use crate::engine::ReconEngine;
use crate::proof_store::ProofStore;
use crate::store::ReconStore;

pub struct AppState {
    pub engine: Arc<ReconEngine>,
    pub proofs: Arc<ProofStore>,
    pub auth: AuthService,
    /// Shared secret for invoice webhook signatures
    pub invoice_webhook_secret: String,
}

impl AppState {
    pub fn store(&self) -> &Arc<dyn ReconStore> {
        self.engine.store()
    }
}
