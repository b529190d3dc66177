//! In-process processor stand-in.
//!
//! Runs when no processor URL is configured, and doubles as the scripted
//! gateway in tests: queue the answers the next charges should get and set
//! the status each poll should see.

use super::{ChargeCreated, ChargeRequest, GatewayError, GatewayStatus, PaymentGateway};
use crate::entities::{Payment, TransactionId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Scripted answer to one `create_charge` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCharge {
    Approve,
    Reject(String),
    Unreachable,
    /// Never answer.
    Hang,
}

#[derive(Default)]
struct SandboxState {
    script: Mutex<VecDeque<SandboxCharge>>,
    statuses: DashMap<TransactionId, GatewayStatus>,
    charges: Mutex<Vec<ChargeRequest>>,
}

/// Approves every charge unless scripted otherwise; reports `Pending` for
/// any charge whose status has not been set. Clones share state.
#[derive(Clone, Default)]
pub struct SandboxGateway {
    state: Arc<SandboxState>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next unscripted charge.
    pub fn script(&self, answer: SandboxCharge) {
        self.state
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(answer);
    }

    /// Set what `fetch_status` reports for a transaction.
    pub fn set_status(&self, transaction_id: &TransactionId, status: GatewayStatus) {
        self.state.statuses.insert(transaction_id.clone(), status);
    }

    /// Every charge request received, in order.
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.state
            .charges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reference_for(transaction_id: &TransactionId) -> String {
        format!("sbx_{transaction_id}")
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError> {
        self.state
            .charges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let answer = self
            .state
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(SandboxCharge::Approve);

        match answer {
            SandboxCharge::Approve => Ok(ChargeCreated {
                gateway_reference: Self::reference_for(&request.transaction_id),
                redirect_or_token: format!("sandbox_token_{}", request.transaction_id),
            }),
            SandboxCharge::Reject(reason) => Err(GatewayError::Rejected { reason }),
            SandboxCharge::Unreachable => {
                Err(GatewayError::Unreachable("sandbox scripted outage".into()))
            }
            SandboxCharge::Hang => std::future::pending().await,
        }
    }

    async fn fetch_status(&self, payment: &Payment) -> Result<GatewayStatus, GatewayError> {
        Ok(self
            .state
            .statuses
            .get(&payment.transaction_id)
            .map_or(GatewayStatus::Pending, |status| status.clone()))
    }
}
