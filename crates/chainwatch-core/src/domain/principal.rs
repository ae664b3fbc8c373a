use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ClientType, PlanCode};

/// The authenticated caller, derived fresh per request from the API key.
/// Carries no secrets and no raw key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub account_id: Uuid,
    pub api_key_id: String,
    pub plan: PlanCode,
    pub client_type: ClientType,
    pub overage_enabled: bool,
}
