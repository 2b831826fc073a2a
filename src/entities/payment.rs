use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment record entity; one per order for online payment methods.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub gateway_order_id: String,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_signature: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Gateway payment status.
///
/// Transitions form a monotonic lattice: `pending -> authorized -> captured`,
/// with `failed` reachable from the non-terminal states. The synchronous
/// verifier and the async webhook processor both advance a record through
/// this lattice with status-guarded updates, so duplicate or out-of-order
/// deliveries converge instead of regressing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "authorized")]
    Authorized,
    #[sea_orm(string_value = "captured")]
    Captured,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Captured | PaymentStatus::Failed)
    }

    /// Whether a record in `self` may move to `next`. Captured and failed are
    /// terminal; no handler may regress a record.
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Authorized | Captured | Failed) => true,
            (Authorized, Captured | Failed) => true,
            _ => false,
        }
    }

    /// The statuses from which `target` is reachable; used to build the
    /// guarded conditional updates.
    pub fn sources_of(target: PaymentStatus) -> Vec<PaymentStatus> {
        use PaymentStatus::*;
        [Pending, Authorized, Captured, Failed]
            .into_iter()
            .filter(|s| s.can_advance_to(target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_is_monotonic() {
        assert!(PaymentStatus::Pending.can_advance_to(PaymentStatus::Authorized));
        assert!(PaymentStatus::Pending.can_advance_to(PaymentStatus::Captured));
        assert!(PaymentStatus::Authorized.can_advance_to(PaymentStatus::Captured));

        assert!(!PaymentStatus::Captured.can_advance_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Captured.can_advance_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_advance_to(PaymentStatus::Captured));
        assert!(!PaymentStatus::Authorized.can_advance_to(PaymentStatus::Pending));
    }

    #[test]
    fn capture_reached_at_most_once() {
        assert!(!PaymentStatus::Captured.can_advance_to(PaymentStatus::Captured));
    }

    #[test]
    fn sources_of_capture() {
        let sources = PaymentStatus::sources_of(PaymentStatus::Captured);
        assert!(sources.contains(&PaymentStatus::Pending));
        assert!(sources.contains(&PaymentStatus::Authorized));
        assert!(!sources.contains(&PaymentStatus::Captured));
        assert!(!sources.contains(&PaymentStatus::Failed));
    }
}
