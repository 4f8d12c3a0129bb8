use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Kinds of actions written to the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Sell,
    RemoveSell,
    Buy,
    UpdateBalance,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Sell => "sell",
            AuditAction::RemoveSell => "remove_sell",
            AuditAction::Buy => "buy",
            AuditAction::UpdateBalance => "update_balance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sell" => Some(AuditAction::Sell),
            "remove_sell" => Some(AuditAction::RemoveSell),
            "buy" => Some(AuditAction::Buy),
            "update_balance" => Some(AuditAction::UpdateBalance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: u64,
    pub action: AuditAction,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;

    async fn recent(&self, user_id: u64, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Fire-and-forget write. Audit failures never undo the business operation,
/// they are only reported.
pub async fn record_best_effort<A: AuditLog + ?Sized>(
    log: &A,
    user_id: u64,
    action: AuditAction,
    description: String,
) {
    let entry = AuditEntry {
        user_id,
        action,
        description,
        created_at: Utc::now(),
    };

    if let Err(e) = log.record(entry).await {
        tracing::warn!(
            user_id,
            action = action.as_str(),
            "Failed to write audit entry: {}",
            e
        );
    }
}
