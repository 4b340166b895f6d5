//! Database row types. These map directly to SQLite rows and are kept
//! apart from the mavuno-types models; `into_*` does the conversion.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use mavuno_types::models::{
    Coordinates, HarvestListing, Order, User, UserRole, UserStats,
};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub password: String,
    pub total_transactions: i64,
    pub total_amount_spent: Option<i64>,
    pub total_quantity_bought: Option<i64>,
    pub total_amount_earned: Option<i64>,
    pub total_quantity_sold: Option<i64>,
    pub created_at: String,
}

pub struct ListingRow {
    pub id: String,
    pub farmer_id: String,
    pub farmer_name: String,
    pub crop_type: String,
    pub quantity_kg: i64,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub grade: String,
    pub price_per_kg: i64,
    pub image_url: Option<String>,
    pub saturation_level: String,
    pub created_at: String,
}

pub struct OrderRow {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub farmer_id: String,
    pub crop_type: String,
    pub price_per_kg: i64,
    pub quantity: i64,
    pub total_amount: i64,
    pub status: String,
    pub phone: String,
    pub mpesa_transaction_id: Option<String>,
    pub qr_code_data: Option<String>,
    pub disbursement_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite stores `datetime('now')` as "YYYY-MM-DD HH:MM:SS" without a
/// timezone; treat it as UTC. RFC 3339 is accepted too.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

impl UserRow {
    pub fn role(&self) -> Result<UserRole> {
        Ok(self.role.parse()?)
    }

    pub fn into_user(self) -> Result<User> {
        let role = self.role()?;
        Ok(User {
            id: parse_id(&self.id)?,
            name: self.name,
            email: self.email,
            phone: self.phone,
            role,
            created_at: parse_timestamp(&self.created_at)?,
            stats: UserStats {
                total_transactions: self.total_transactions,
                total_amount_spent: self.total_amount_spent,
                total_quantity_bought: self.total_quantity_bought,
                total_amount_earned: self.total_amount_earned,
                total_quantity_sold: self.total_quantity_sold,
            },
        })
    }
}

impl ListingRow {
    pub fn into_listing(self) -> Result<HarvestListing> {
        let coordinates = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };
        Ok(HarvestListing {
            id: parse_id(&self.id)?,
            farmer_id: parse_id(&self.farmer_id)?,
            farmer_name: self.farmer_name,
            crop_type: self.crop_type,
            quantity_kg: self.quantity_kg,
            location: self.location,
            coordinates,
            grade: self.grade.parse()?,
            price_per_kg: self.price_per_kg,
            image_url: self.image_url,
            saturation_level: self.saturation_level.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl OrderRow {
    pub fn into_order(self) -> Result<Order> {
        Ok(Order {
            id: parse_id(&self.id)?,
            listing_id: parse_id(&self.listing_id)?,
            buyer_id: parse_id(&self.buyer_id)?,
            farmer_id: parse_id(&self.farmer_id)?,
            crop_type: self.crop_type,
            price_per_kg: self.price_per_kg,
            quantity: self.quantity,
            total_amount: self.total_amount,
            status: self.status.parse()?,
            phone: self.phone,
            mpesa_transaction_id: self.mpesa_transaction_id,
            qr_code_data: self.qr_code_data,
            disbursement_id: self.disbursement_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_and_rfc3339_timestamps() {
        let a = parse_timestamp("2025-03-01 08:30:00").unwrap();
        let b = parse_timestamp("2025-03-01T08:30:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
