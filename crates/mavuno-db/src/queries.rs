use crate::models::{ListingRow, OrderRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use mavuno_types::models::{Grade, OrderStatus, SaturationLevel, UserRole};
use rusqlite::{Connection, ErrorCode, Row, params};

const USER_COLUMNS: &str = "id, name, email, phone, role, password, total_transactions,
     total_amount_spent, total_quantity_bought, total_amount_earned, total_quantity_sold, created_at";

const LISTING_COLUMNS: &str = "l.id, l.farmer_id, COALESCE(u.name, 'unknown'), l.crop_type, l.quantity_kg,
     l.location, l.lat, l.lng, l.grade, l.price_per_kg, l.image_url, l.saturation_level, l.created_at";

const ORDER_COLUMNS: &str = "id, listing_id, buyer_id, farmer_id, crop_type, price_per_kg, quantity,
     total_amount, status, phone, mpesa_transaction_id, qr_code_data, disbursement_id, created_at, updated_at";

/// Marketplace search. `search` matches the crop name case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct ListingFilter {
    pub county: Option<String>,
    pub search: Option<String>,
}

pub struct NewListing<'a> {
    pub id: &'a str,
    pub farmer_id: &'a str,
    pub crop_type: &'a str,
    pub quantity_kg: i64,
    pub location: &'a str,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub grade: Grade,
    pub price_per_kg: i64,
    pub image_url: Option<&'a str>,
}

pub struct NewOrder<'a> {
    pub id: &'a str,
    pub listing_id: &'a str,
    pub buyer_id: &'a str,
    pub quantity: i64,
    pub phone: &'a str,
}

/// The payout that has claimed an escrowed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Handshake release to the farmer.
    Release,
    /// Refund to the buyer on cancellation.
    Refund,
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "RELEASE",
            Self::Refund => "REFUND",
        }
    }
}

/// Outcome of trying to reserve stock for a new order.
pub enum Reservation {
    Reserved(OrderRow),
    ListingNotFound,
    InsufficientStock { available: i64 },
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        phone: &str,
        role: UserRole,
        password_hash: &str,
    ) -> Result<bool> {
        let (buyer_zero, farmer_zero) = match role {
            UserRole::Buyer => (Some(0i64), None),
            UserRole::Farmer => (None, Some(0i64)),
        };
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, phone, role, password,
                     total_amount_spent, total_quantity_bought, total_amount_earned, total_quantity_sold)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?8)",
                params![id, name, email, phone, role.as_str(), password_hash, buyer_zero, farmer_zero],
            );
            match inserted {
                Ok(_) => Ok(true),
                // email is the only UNIQUE column besides the random id
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS), email)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS), id)
        })
    }

    /// Returns false when the user does not exist.
    pub fn update_profile(&self, id: &str, name: Option<&str>, phone: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = COALESCE(?2, name), phone = COALESCE(?3, phone) WHERE id = ?1",
                params![id, name, phone],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Listings --

    /// Insert a listing, labelling it with the supply level of its crop in
    /// its county at this moment.
    pub fn insert_listing(&self, listing: &NewListing<'_>) -> Result<SaturationLevel> {
        self.with_tx(|conn| {
            let existing = crop_supply(conn, listing.crop_type, listing.location)?;
            let saturation = SaturationLevel::from_supply(existing + listing.quantity_kg);

            conn.execute(
                "INSERT INTO listings (id, farmer_id, crop_type, quantity_kg, location, lat, lng,
                     grade, price_per_kg, image_url, saturation_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    listing.id,
                    listing.farmer_id,
                    listing.crop_type,
                    listing.quantity_kg,
                    listing.location,
                    listing.lat,
                    listing.lng,
                    listing.grade.as_str(),
                    listing.price_per_kg,
                    listing.image_url,
                    saturation.as_str(),
                ],
            )?;
            Ok(saturation)
        })
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM listings l LEFT JOIN users u ON l.farmer_id = u.id WHERE l.id = ?1",
                LISTING_COLUMNS
            );
            conn.query_row(&sql, [id], listing_from_row).optional()
        })
    }

    /// Listings with stock left, newest first.
    pub fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRow>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(&s.to_lowercase())));

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM listings l
                 LEFT JOIN users u ON l.farmer_id = u.id
                 WHERE l.quantity_kg > 0
                   AND (?1 IS NULL OR l.location = ?1)
                   AND (?2 IS NULL OR lower(l.crop_type) LIKE ?2 ESCAPE '\\')
                 ORDER BY l.created_at DESC, l.id",
                LISTING_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![filter.county, search], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn listings_for_farmer(&self, farmer_id: &str) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM listings l
                 LEFT JOIN users u ON l.farmer_id = u.id
                 WHERE l.farmer_id = ?1
                 ORDER BY l.created_at DESC, l.id",
                LISTING_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([farmer_id], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn crop_supply_kg(&self, crop_type: &str, location: &str) -> Result<i64> {
        self.with_conn(|conn| crop_supply(conn, crop_type, location))
    }

    /// Delete a listing owned by `farmer_id`. Orders placed against it are
    /// left untouched. Returns false if nothing matched.
    pub fn delete_listing(&self, id: &str, farmer_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM listings WHERE id = ?1 AND farmer_id = ?2",
                [id, farmer_id],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Orders --

    /// Create a `PENDING_PAYMENT` order and take its quantity out of the
    /// listing's stock in one transaction. Price and farmer are read from
    /// the listing inside the same transaction.
    pub fn reserve_order(&self, order: &NewOrder<'_>) -> Result<Reservation> {
        self.with_tx(|conn| {
            let listing = conn
                .query_row(
                    "SELECT farmer_id, crop_type, price_per_kg, quantity_kg FROM listings WHERE id = ?1",
                    [order.listing_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((farmer_id, crop_type, price_per_kg, available)) = listing else {
                return Ok(Reservation::ListingNotFound);
            };
            if order.quantity > available {
                return Ok(Reservation::InsufficientStock { available });
            }
            let total = price_per_kg
                .checked_mul(order.quantity)
                .ok_or_else(|| anyhow!("Order total overflows for listing {}", order.listing_id))?;

            conn.execute(
                "UPDATE listings SET quantity_kg = quantity_kg - ?2 WHERE id = ?1",
                params![order.listing_id, order.quantity],
            )?;
            conn.execute(
                "INSERT INTO orders (id, listing_id, buyer_id, farmer_id, crop_type, price_per_kg,
                     quantity, total_amount, status, phone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    order.id,
                    order.listing_id,
                    order.buyer_id,
                    farmer_id,
                    crop_type,
                    price_per_kg,
                    order.quantity,
                    total,
                    OrderStatus::PendingPayment.as_str(),
                    order.phone,
                ],
            )?;

            let row = query_order(conn, order.id)?
                .ok_or_else(|| anyhow!("Order {} vanished after insert", order.id))?;
            Ok(Reservation::Reserved(row))
        })
    }

    /// Record the STK push reference on a pending order.
    pub fn set_transaction_id(&self, order_id: &str, transaction_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET mpesa_transaction_id = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?3 AND mpesa_transaction_id IS NULL",
                params![order_id, transaction_id, OrderStatus::PendingPayment.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_order(&self, id: &str) -> Result<Option<OrderRow>> {
        self.with_conn(|conn| query_order(conn, id))
    }

    pub fn orders_for_buyer(&self, buyer_id: &str) -> Result<Vec<OrderRow>> {
        self.with_conn(|conn| {
            query_orders(
                conn,
                &format!("SELECT {} FROM orders WHERE buyer_id = ?1 ORDER BY created_at DESC, id", ORDER_COLUMNS),
                params![buyer_id],
            )
        })
    }

    pub fn orders_for_farmer(&self, farmer_id: &str) -> Result<Vec<OrderRow>> {
        self.with_conn(|conn| {
            query_orders(
                conn,
                &format!("SELECT {} FROM orders WHERE farmer_id = ?1 ORDER BY created_at DESC, id", ORDER_COLUMNS),
                params![farmer_id],
            )
        })
    }

    /// Pending orders that already have an STK push in flight, oldest first.
    pub fn pending_payments(&self) -> Result<Vec<OrderRow>> {
        self.with_conn(|conn| {
            query_orders(
                conn,
                &format!(
                    "SELECT {} FROM orders
                     WHERE status = ?1 AND mpesa_transaction_id IS NOT NULL
                     ORDER BY created_at, id",
                    ORDER_COLUMNS
                ),
                params![OrderStatus::PendingPayment.as_str()],
            )
        })
    }

    /// `PENDING_PAYMENT -> ESCROW_HELD`. False if the order was not pending.
    pub fn mark_escrow_held(&self, id: &str, handshake_code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET status = ?2, qr_code_data = ?3, updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?4",
                params![
                    id,
                    OrderStatus::EscrowHeld.as_str(),
                    handshake_code,
                    OrderStatus::PendingPayment.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Reserve an escrowed order for one payout before any money moves.
    /// False if the order is not held in escrow or another payout owns it.
    pub fn claim_settlement(&self, id: &str, settlement: Settlement) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET settlement = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?3 AND settlement IS NULL",
                params![id, settlement.as_str(), OrderStatus::EscrowHeld.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Give up a claim whose disbursement did not go through.
    pub fn abandon_settlement(&self, id: &str, settlement: Settlement) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET settlement = NULL, updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?3 AND settlement = ?2",
                params![id, settlement.as_str(), OrderStatus::EscrowHeld.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// `ESCROW_HELD -> COMPLETED`, crediting both parties' statistics in
    /// the same transaction. Requires a `Release` claim; false otherwise.
    pub fn complete_order(&self, id: &str, disbursement_id: &str) -> Result<bool> {
        self.with_tx(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET status = ?2, disbursement_id = ?3, updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?4 AND settlement = ?5",
                params![
                    id,
                    OrderStatus::Completed.as_str(),
                    disbursement_id,
                    OrderStatus::EscrowHeld.as_str(),
                    Settlement::Release.as_str(),
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            let (buyer_id, farmer_id, quantity, amount): (String, String, i64, i64) = conn.query_row(
                "SELECT buyer_id, farmer_id, quantity, total_amount FROM orders WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            conn.execute(
                "UPDATE users SET
                     total_transactions = total_transactions + 1,
                     total_amount_spent = COALESCE(total_amount_spent, 0) + ?2,
                     total_quantity_bought = COALESCE(total_quantity_bought, 0) + ?3
                 WHERE id = ?1",
                params![buyer_id, amount, quantity],
            )?;
            conn.execute(
                "UPDATE users SET
                     total_transactions = total_transactions + 1,
                     total_amount_earned = COALESCE(total_amount_earned, 0) + ?2,
                     total_quantity_sold = COALESCE(total_quantity_sold, 0) + ?3
                 WHERE id = ?1",
                params![farmer_id, amount, quantity],
            )?;
            Ok(true)
        })
    }

    /// `from -> CANCELLED`, returning the quantity to the listing if it
    /// still exists. `refund_id` is the B2C reference when escrowed money
    /// was sent back. Cancelling from `ESCROW_HELD` requires a `Refund`
    /// claim. False if the order was not in `from`.
    pub fn cancel_order(&self, id: &str, from: OrderStatus, refund_id: Option<&str>) -> Result<bool> {
        if !from.can_transition_to(OrderStatus::Cancelled) {
            return Ok(false);
        }
        let settlement = (from == OrderStatus::EscrowHeld).then_some(Settlement::Refund.as_str());
        self.with_tx(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET status = ?2, disbursement_id = COALESCE(?3, disbursement_id),
                     updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?4 AND settlement IS ?5",
                params![id, OrderStatus::Cancelled.as_str(), refund_id, from.as_str(), settlement],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            conn.execute(
                "UPDATE listings SET quantity_kg = quantity_kg +
                     (SELECT quantity FROM orders WHERE id = ?1)
                 WHERE id = (SELECT listing_id FROM orders WHERE id = ?1)",
                [id],
            )?;
            Ok(true)
        })
    }
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
                role: row.get(4)?,
                password: row.get(5)?,
                total_transactions: row.get(6)?,
                total_amount_spent: row.get(7)?,
                total_quantity_bought: row.get(8)?,
                total_amount_earned: row.get(9)?,
                total_quantity_sold: row.get(10)?,
                created_at: row.get(11)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        farmer_id: row.get(1)?,
        farmer_name: row.get(2)?,
        crop_type: row.get(3)?,
        quantity_kg: row.get(4)?,
        location: row.get(5)?,
        lat: row.get(6)?,
        lng: row.get(7)?,
        grade: row.get(8)?,
        price_per_kg: row.get(9)?,
        image_url: row.get(10)?,
        saturation_level: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        buyer_id: row.get(2)?,
        farmer_id: row.get(3)?,
        crop_type: row.get(4)?,
        price_per_kg: row.get(5)?,
        quantity: row.get(6)?,
        total_amount: row.get(7)?,
        status: row.get(8)?,
        phone: row.get(9)?,
        mpesa_transaction_id: row.get(10)?,
        qr_code_data: row.get(11)?,
        disbursement_id: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn query_order(conn: &Connection, id: &str) -> Result<Option<OrderRow>> {
    let sql = format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS);
    conn.query_row(&sql, [id], order_from_row).optional()
}

fn query_orders(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<OrderRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, order_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn crop_supply(conn: &Connection, crop_type: &str, location: &str) -> Result<i64> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(quantity_kg), 0) FROM listings WHERE crop_type = ?1 AND location = ?2",
        [crop_type, location],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Extension trait for optional query results
/// Escape LIKE wildcards so user input matches literally (`ESCAPE '\'`).
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, role: UserRole) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, "Test User", &format!("{}@example.com", id), "254712345678", role, "hash")
            .unwrap();
        id
    }

    fn listing(db: &Database, farmer: &str, crop: &str, county: &str, kg: i64) -> (String, SaturationLevel) {
        let id = Uuid::new_v4().to_string();
        let level = db
            .insert_listing(&NewListing {
                id: &id,
                farmer_id: farmer,
                crop_type: crop,
                quantity_kg: kg,
                location: county,
                lat: None,
                lng: None,
                grade: Grade::A,
                price_per_kg: 50,
                image_url: None,
            })
            .unwrap();
        (id, level)
    }

    fn reserve(db: &Database, listing_id: &str, buyer: &str, quantity: i64) -> Reservation {
        let id = Uuid::new_v4().to_string();
        db.reserve_order(&NewOrder {
            id: &id,
            listing_id,
            buyer_id: buyer,
            quantity,
            phone: "254712345678",
        })
        .unwrap()
    }

    fn reserved(reservation: Reservation) -> OrderRow {
        match reservation {
            Reservation::Reserved(row) => row,
            _ => panic!("expected reservation to succeed"),
        }
    }

    #[test]
    fn role_specific_stats_start_at_zero() {
        let db = db();
        let buyer = user(&db, UserRole::Buyer);
        let row = db.get_user_by_id(&buyer).unwrap().unwrap();
        assert_eq!(row.total_amount_spent, Some(0));
        assert_eq!(row.total_amount_earned, None);

        let by_email = db.get_user_by_email(&row.email).unwrap().unwrap();
        assert_eq!(by_email.id, buyer);
        assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_rejected() {
        let db = db();
        assert!(db.create_user("a", "A", "dup@example.com", "254700000001", UserRole::Buyer, "h").unwrap());
        assert!(!db.create_user("b", "B", "dup@example.com", "254700000002", UserRole::Buyer, "h").unwrap());
        assert!(db.get_user_by_id("b").unwrap().is_none());
    }

    #[test]
    fn profile_update_is_partial() {
        let db = db();
        let id = user(&db, UserRole::Farmer);
        assert!(db.update_profile(&id, None, Some("254799999999")).unwrap());
        let row = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(row.name, "Test User");
        assert_eq!(row.phone, "254799999999");
        assert!(!db.update_profile("missing", Some("X"), None).unwrap());
    }

    #[test]
    fn saturation_reflects_existing_supply() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let (_, first) = listing(&db, &farmer, "Onions", "Meru", 600);
        let (_, second) = listing(&db, &farmer, "Onions", "Meru", 600);
        let (_, elsewhere) = listing(&db, &farmer, "Onions", "Embu", 600);
        assert_eq!(first, SaturationLevel::Low);
        assert_eq!(second, SaturationLevel::Medium);
        assert_eq!(elsewhere, SaturationLevel::Low);
        assert_eq!(db.crop_supply_kg("Onions", "Meru").unwrap(), 1200);
    }

    #[test]
    fn marketplace_filters() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        listing(&db, &farmer, "Beans", "Machakos", 100);
        listing(&db, &farmer, "Bananas", "Kisii", 100);
        let (sold_out, _) = listing(&db, &farmer, "Beans", "Kisii", 10);
        let buyer = user(&db, UserRole::Buyer);
        reserved(reserve(&db, &sold_out, &buyer, 10));

        let all = db.list_listings(&ListingFilter::default()).unwrap();
        assert_eq!(all.len(), 5 + 2);
        assert!(all.iter().all(|l| l.id != sold_out));

        let kisii = db
            .list_listings(&ListingFilter { county: Some("Kisii".into()), search: None })
            .unwrap();
        assert_eq!(kisii.len(), 1);
        assert_eq!(kisii[0].crop_type, "Bananas");
        assert_eq!(kisii[0].farmer_name, "Test User");

        let beans = db
            .list_listings(&ListingFilter { county: None, search: Some("bEaN".into()) })
            .unwrap();
        assert_eq!(beans.len(), 1);

        for wildcard in ["%", "_", "be_ns", "\\"] {
            let found = db
                .list_listings(&ListingFilter { county: None, search: Some(wildcard.into()) })
                .unwrap();
            assert!(found.is_empty(), "{:?} matched {} listings", wildcard, found.len());
        }

        assert_eq!(db.listings_for_farmer(&farmer).unwrap().len(), 3);
    }

    #[test]
    fn reservation_takes_stock() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Maize", "Bomet", 100);

        let order = reserved(reserve(&db, &listing_id, &buyer, 40));
        assert_eq!(order.status, "PENDING_PAYMENT");
        assert_eq!(order.total_amount, 2000);
        assert_eq!(order.farmer_id, farmer);
        assert_eq!(db.get_listing(&listing_id).unwrap().unwrap().quantity_kg, 60);

        match reserve(&db, &listing_id, &buyer, 61) {
            Reservation::InsufficientStock { available } => assert_eq!(available, 60),
            _ => panic!("expected insufficient stock"),
        }
        assert!(matches!(reserve(&db, "missing", &buyer, 1), Reservation::ListingNotFound));
    }

    #[test]
    fn transitions_are_guarded() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Tea", "Kericho", 100);
        let order = reserved(reserve(&db, &listing_id, &buyer, 10));

        assert!(!db.complete_order(&order.id, "B2C-X").unwrap());
        assert!(db.set_transaction_id(&order.id, "PH-1").unwrap());
        assert!(!db.set_transaction_id(&order.id, "PH-2").unwrap());
        assert_eq!(db.pending_payments().unwrap().len(), 1);

        assert!(db.mark_escrow_held(&order.id, "code").unwrap());
        assert!(!db.mark_escrow_held(&order.id, "other").unwrap());
        assert!(db.pending_payments().unwrap().is_empty());

        // Completion needs the release claim.
        assert!(!db.complete_order(&order.id, "B2C-X").unwrap());
        assert!(db.claim_settlement(&order.id, Settlement::Release).unwrap());
        assert!(db.complete_order(&order.id, "B2C-X").unwrap());
        assert!(!db.complete_order(&order.id, "B2C-Y").unwrap());
        assert!(!db.cancel_order(&order.id, OrderStatus::EscrowHeld, None).unwrap());
        assert!(!db.cancel_order(&order.id, OrderStatus::Completed, None).unwrap());

        let row = db.get_order(&order.id).unwrap().unwrap();
        assert_eq!(row.status, "COMPLETED");
        assert_eq!(row.disbursement_id.as_deref(), Some("B2C-X"));
        assert_eq!(row.qr_code_data.as_deref(), Some("code"));
    }

    #[test]
    fn completion_credits_both_parties() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Tea", "Kericho", 100);
        let order = reserved(reserve(&db, &listing_id, &buyer, 10));
        db.mark_escrow_held(&order.id, "code").unwrap();
        db.claim_settlement(&order.id, Settlement::Release).unwrap();
        assert!(db.complete_order(&order.id, "B2C-X").unwrap());

        let b = db.get_user_by_id(&buyer).unwrap().unwrap();
        assert_eq!(b.total_transactions, 1);
        assert_eq!(b.total_amount_spent, Some(500));
        assert_eq!(b.total_quantity_bought, Some(10));
        assert_eq!(b.total_amount_earned, None);

        let f = db.get_user_by_id(&farmer).unwrap().unwrap();
        assert_eq!(f.total_transactions, 1);
        assert_eq!(f.total_amount_earned, Some(500));
        assert_eq!(f.total_quantity_sold, Some(10));
    }

    #[test]
    fn cancellation_restores_stock() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Kale", "Nyeri", 100);

        let pending = reserved(reserve(&db, &listing_id, &buyer, 30));
        assert!(db.cancel_order(&pending.id, OrderStatus::PendingPayment, None).unwrap());
        assert_eq!(db.get_listing(&listing_id).unwrap().unwrap().quantity_kg, 100);

        let held = reserved(reserve(&db, &listing_id, &buyer, 20));
        db.mark_escrow_held(&held.id, "code").unwrap();
        assert!(!db.cancel_order(&held.id, OrderStatus::PendingPayment, None).unwrap());
        assert!(!db.cancel_order(&held.id, OrderStatus::EscrowHeld, Some("B2C-REFUND")).unwrap());
        assert!(db.claim_settlement(&held.id, Settlement::Refund).unwrap());
        assert!(db.cancel_order(&held.id, OrderStatus::EscrowHeld, Some("B2C-REFUND")).unwrap());

        let row = db.get_order(&held.id).unwrap().unwrap();
        assert_eq!(row.status, "CANCELLED");
        assert_eq!(row.disbursement_id.as_deref(), Some("B2C-REFUND"));
        assert_eq!(db.get_listing(&listing_id).unwrap().unwrap().quantity_kg, 100);
    }

    #[test]
    fn one_settlement_claim_per_order() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Coffee", "Kirinyaga", 100);
        let order = reserved(reserve(&db, &listing_id, &buyer, 10));

        assert!(!db.claim_settlement(&order.id, Settlement::Release).unwrap());
        db.mark_escrow_held(&order.id, "code").unwrap();

        assert!(db.claim_settlement(&order.id, Settlement::Release).unwrap());
        assert!(!db.claim_settlement(&order.id, Settlement::Release).unwrap());
        assert!(!db.claim_settlement(&order.id, Settlement::Refund).unwrap());
        assert!(!db.cancel_order(&order.id, OrderStatus::EscrowHeld, Some("B2C-R")).unwrap());

        // A failed payout hands the order back.
        assert!(!db.abandon_settlement(&order.id, Settlement::Refund).unwrap());
        assert!(db.abandon_settlement(&order.id, Settlement::Release).unwrap());
        assert!(db.claim_settlement(&order.id, Settlement::Refund).unwrap());
        assert!(!db.complete_order(&order.id, "B2C-X").unwrap());
        assert!(db.cancel_order(&order.id, OrderStatus::EscrowHeld, Some("B2C-R")).unwrap());
    }

    #[test]
    fn deleting_listing_keeps_orders() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let other = user(&db, UserRole::Farmer);
        let buyer = user(&db, UserRole::Buyer);
        let (listing_id, _) = listing(&db, &farmer, "Mangoes", "Kwale", 100);
        let order = reserved(reserve(&db, &listing_id, &buyer, 5));

        assert!(!db.delete_listing(&listing_id, &other).unwrap());
        assert!(db.delete_listing(&listing_id, &farmer).unwrap());
        assert!(db.get_listing(&listing_id).unwrap().is_none());

        assert_eq!(db.orders_for_buyer(&buyer).unwrap().len(), 1);
        assert_eq!(db.orders_for_farmer(&farmer).unwrap().len(), 1);

        // Cancelling after the listing is gone still succeeds.
        assert!(db.cancel_order(&order.id, OrderStatus::PendingPayment, None).unwrap());
    }

    #[test]
    fn rows_convert_to_models() {
        let db = db();
        let farmer = user(&db, UserRole::Farmer);
        let (listing_id, _) = listing(&db, &farmer, "Avocado", "Meru", 10);
        let model = db.get_listing(&listing_id).unwrap().unwrap().into_listing().unwrap();
        assert_eq!(model.grade, Grade::A);
        assert!(model.coordinates.is_none());

        let user = db.get_user_by_id(&farmer).unwrap().unwrap().into_user().unwrap();
        assert_eq!(user.role, UserRole::Farmer);
        assert_eq!(user.stats.total_quantity_sold, Some(0));
    }
}
