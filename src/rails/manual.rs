//! Manual Rail Adapter
//!
//! Bank transfer, cash and other out-of-band payments. The purchaser
//! uploads proof at submission; settlement happens only on an explicit
//! admin decision. There is no provider to query, so polling a manual
//! transaction always reports it as still pending.

use async_trait::async_trait;
use tracing::info;

use super::{Initiation, RailAdapter, RailContext, RailError, RailOutcome, VerifyProof};
use crate::journal::{PaymentRail, RailPayload, Transaction};

#[derive(Default)]
pub struct ManualRail;

impl ManualRail {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RailAdapter for ManualRail {
    fn rail(&self) -> PaymentRail {
        PaymentRail::ManualBank
    }

    async fn initiate(
        &self,
        txn: &Transaction,
        _ctx: &RailContext,
    ) -> Result<Initiation, RailError> {
        // The submission handler stores the proof file and builds the
        // payload before the engine runs; initiation just echoes it
        match &txn.rail_payload {
            RailPayload::Manual { .. } => Ok(Initiation {
                payload: txn.rail_payload.clone(),
                redirect_url: None,
            }),
            _ => Err(RailError::InvalidProof(
                "manual submission requires an uploaded proof".to_string(),
            )),
        }
    }

    async fn verify(
        &self,
        txn: &Transaction,
        proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError> {
        match proof {
            VerifyProof::AdminDecision {
                approved,
                verifier_id,
                note,
            } => {
                info!(
                    reference = %txn.reference,
                    verifier_id,
                    approved,
                    "manual payment reviewed"
                );
                if *approved {
                    Ok(RailOutcome::settled())
                } else {
                    Ok(RailOutcome::rejected(
                        note.clone()
                            .unwrap_or_else(|| "rejected by reviewer".to_string()),
                    ))
                }
            }
            // The sweeper never reaches here (manual rails are not
            // pollable), but a stray poll must not invent a verdict
            _ => Ok(RailOutcome::StillPending),
        }
    }
}
