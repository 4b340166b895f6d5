use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored enum column holds a value we don't recognise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Buyer,
    Farmer,
}

string_enum!(UserRole, "role", { Buyer => "BUYER", Farmer => "FARMER" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
}

string_enum!(Grade, "grade", { A => "A", B => "B", C => "C" });

/// Coarse supply label shown next to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationLevel {
    Low,
    Medium,
    High,
}

string_enum!(SaturationLevel, "saturation level", { Low => "low", Medium => "medium", High => "high" });

impl SaturationLevel {
    /// Label for a crop/county pair given the total kilograms on offer,
    /// including the listing being created.
    pub fn from_supply(total_kg: i64) -> Self {
        if total_kg < 1_000 {
            Self::Low
        } else if total_kg < 5_000 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    /// Money is with the payment provider.
    EscrowHeld,
    /// Handshake done, funds released to the farmer.
    Completed,
    Cancelled,
}

string_enum!(OrderStatus, "order status", {
    PendingPayment => "PENDING_PAYMENT",
    EscrowHeld => "ESCROW_HELD",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, EscrowHeld)
                | (PendingPayment, Cancelled)
                | (EscrowHeld, Completed)
                | (EscrowHeld, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Running totals kept on the user record. Buyer-only and farmer-only
/// fields are `None` for the other role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_transactions: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount_spent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_quantity_bought: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount_earned: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_quantity_sold: Option<i64>,
}

impl UserStats {
    pub fn empty_for(role: UserRole) -> Self {
        match role {
            UserRole::Buyer => Self {
                total_amount_spent: Some(0),
                total_quantity_bought: Some(0),
                ..Self::default()
            },
            UserRole::Farmer => Self {
                total_amount_earned: Some(0),
                total_quantity_sold: Some(0),
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: UserStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestListing {
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub farmer_name: String,
    pub crop_type: String,
    pub quantity_kg: i64,
    /// County
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub grade: Grade,
    pub price_per_kg: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Derived from supply data when the listing is created; never recomputed.
    pub saturation_level: SaturationLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub farmer_id: Uuid,
    pub crop_type: String,
    pub price_per_kg: i64,
    pub quantity: i64,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub phone: String,
    pub mpesa_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_data: Option<String>,
    pub disbursement_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The handshake code is what the farmer shows as a QR code; nobody
    /// else gets to see it.
    pub fn for_viewer(mut self, viewer: Uuid) -> Self {
        if viewer != self.farmer_id {
            self.qr_code_data = None;
        }
        self
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.farmer_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use OrderStatus::*;
        assert!(PendingPayment.can_transition_to(EscrowHeld));
        assert!(PendingPayment.can_transition_to(Cancelled));
        assert!(EscrowHeld.can_transition_to(Completed));
        assert!(EscrowHeld.can_transition_to(Cancelled));

        assert!(!PendingPayment.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(EscrowHeld));
        assert!(!EscrowHeld.can_transition_to(PendingPayment));

        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!EscrowHeld.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::EscrowHeld).unwrap(),
            "\"ESCROW_HELD\""
        );
        assert_eq!("PENDING_PAYMENT".parse::<OrderStatus>().unwrap(), OrderStatus::PendingPayment);
        assert_eq!(OrderStatus::Completed.as_str(), "COMPLETED");
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn saturation_thresholds() {
        assert_eq!(SaturationLevel::from_supply(0), SaturationLevel::Low);
        assert_eq!(SaturationLevel::from_supply(999), SaturationLevel::Low);
        assert_eq!(SaturationLevel::from_supply(1_000), SaturationLevel::Medium);
        assert_eq!(SaturationLevel::from_supply(4_999), SaturationLevel::Medium);
        assert_eq!(SaturationLevel::from_supply(5_000), SaturationLevel::High);
        assert_eq!(
            serde_json::to_string(&SaturationLevel::High).unwrap(),
            "\"high\""
        );
    }

    #[test]
    fn role_specific_stats_are_omitted() {
        let json = serde_json::to_value(UserStats::empty_for(UserRole::Buyer)).unwrap();
        assert_eq!(json["total_amount_spent"], 0);
        assert!(json.get("total_amount_earned").is_none());

        let json = serde_json::to_value(UserStats::empty_for(UserRole::Farmer)).unwrap();
        assert_eq!(json["total_quantity_sold"], 0);
        assert!(json.get("total_quantity_bought").is_none());
    }

    #[test]
    fn handshake_code_only_visible_to_farmer() {
        let buyer = Uuid::new_v4();
        let farmer = Uuid::new_v4();
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: buyer,
            farmer_id: farmer,
            crop_type: "Maize".into(),
            price_per_kg: 50,
            quantity: 10,
            total_amount: 500,
            status: OrderStatus::EscrowHeld,
            phone: "254712345678".into(),
            mpesa_transaction_id: Some("PH-ABCDEFGHI".into()),
            qr_code_data: Some("secret".into()),
            disbursement_id: None,
            created_at: now,
            updated_at: now,
        };

        assert!(order.clone().for_viewer(farmer).qr_code_data.is_some());
        assert!(order.clone().for_viewer(buyer).qr_code_data.is_none());
        assert!(order.is_participant(buyer));
        assert!(!order.is_participant(Uuid::new_v4()));
    }
}
