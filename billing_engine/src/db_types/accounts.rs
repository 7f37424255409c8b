use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::Metadata;

//--------------------------------------     UserBalance     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserBalance {
    pub user_id: i64,
    pub balance_cents: Cents,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  BalanceTransaction -------------------------------------------------------
text_enum! {
    pub enum BalanceTxType {
        Recharge => "recharge",
        Purchase => "purchase",
        Refund => "refund",
        Adjustment => "adjustment",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceTransaction {
    pub id: i64,
    pub user_id: i64,
    pub tx_type: BalanceTxType,
    /// Signed: debits are negative.
    pub amount_cents: Cents,
    pub balance_after_cents: Cents,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBalanceTransaction {
    pub tx_type: BalanceTxType,
    pub amount_cents: Cents,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub metadata: Metadata,
}

//--------------------------------------      AuditEntry     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<i64>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: Value,
}

impl NewAuditEntry {
    pub fn order(actor_id: Option<i64>, action: &str, order_id: i64, metadata: Value) -> Self {
        Self {
            actor_id,
            action: action.to_string(),
            resource_type: "order".to_string(),
            resource_id: order_id.to_string(),
            metadata,
        }
    }
}
