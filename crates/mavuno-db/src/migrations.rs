use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Owner of the built-in demo listings. Its password hash is not a valid
/// PHC string, so nobody can log in as it.
pub const DEMO_FARMER_ID: &str = "00000000-0000-0000-0000-0000000000f1";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                email                   TEXT NOT NULL UNIQUE,
                phone                   TEXT NOT NULL,
                role                    TEXT NOT NULL,
                password                TEXT NOT NULL,
                total_transactions      INTEGER NOT NULL DEFAULT 0,
                total_amount_spent      INTEGER,
                total_quantity_bought   INTEGER,
                total_amount_earned     INTEGER,
                total_quantity_sold     INTEGER,
                created_at              TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE listings (
                id                  TEXT PRIMARY KEY,
                farmer_id           TEXT NOT NULL REFERENCES users(id),
                crop_type           TEXT NOT NULL,
                quantity_kg         INTEGER NOT NULL CHECK (quantity_kg >= 0),
                location            TEXT NOT NULL,
                lat                 REAL,
                lng                 REAL,
                grade               TEXT NOT NULL,
                price_per_kg        INTEGER NOT NULL,
                image_url           TEXT,
                saturation_level    TEXT NOT NULL,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_listings_farmer ON listings(farmer_id);
            CREATE INDEX idx_listings_crop_location ON listings(crop_type, location);

            -- listing_id is not a foreign key: orders outlive their listing.
            CREATE TABLE orders (
                id                      TEXT PRIMARY KEY,
                listing_id              TEXT NOT NULL,
                buyer_id                TEXT NOT NULL REFERENCES users(id),
                farmer_id               TEXT NOT NULL REFERENCES users(id),
                crop_type               TEXT NOT NULL,
                price_per_kg            INTEGER NOT NULL,
                quantity                INTEGER NOT NULL,
                total_amount            INTEGER NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'PENDING_PAYMENT',
                phone                   TEXT NOT NULL,
                mpesa_transaction_id    TEXT,
                qr_code_data            TEXT,
                disbursement_id         TEXT,
                created_at              TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at              TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_orders_buyer ON orders(buyer_id, created_at);
            CREATE INDEX idx_orders_farmer ON orders(farmer_id, created_at);
            CREATE INDEX idx_orders_status ON orders(status);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (demo listings)");
        conn.execute(
            "INSERT INTO users (id, name, email, phone, role, password, total_amount_earned, total_quantity_sold)
             VALUES (?1, 'Mavuno Demo Farms', 'demo-farmer@mavuno.local', '254700000000', 'FARMER', '!', 0, 0)",
            [DEMO_FARMER_ID],
        )?;
        conn.execute_batch(&format!(
            "
            INSERT INTO listings (id, farmer_id, crop_type, quantity_kg, location, lat, lng, grade, price_per_kg, saturation_level)
            VALUES
                ('00000000-0000-0000-0000-00000000a001', '{farmer}', 'Potatoes', 2000, 'Nyandarua', -0.1804, 36.5230, 'A', 45, 'high'),
                ('00000000-0000-0000-0000-00000000a002', '{farmer}', 'Tomatoes', 500, 'Kirinyaga', -0.5591, 37.2834, 'B', 80, 'low'),
                ('00000000-0000-0000-0000-00000000a003', '{farmer}', 'Maize', 5000, 'Uasin Gishu', 0.5143, 35.2698, 'A', 38, 'high'),
                ('00000000-0000-0000-0000-00000000a004', '{farmer}', 'Avocado', 800, 'Murang''a', -0.7210, 37.1526, 'A', 120, 'medium'),
                ('00000000-0000-0000-0000-00000000a005', '{farmer}', 'Kale', 300, 'Kiambu', -1.1714, 36.8356, 'B', 30, 'low');

            INSERT INTO schema_version (version) VALUES (2);
            ",
            farmer = DEMO_FARMER_ID
        ))?;
    }

    if version < 3 {
        info!("Running migration v3 (escrow settlement claims)");
        conn.execute_batch(
            "
            -- Which payout (RELEASE or REFUND) owns an escrowed order while
            -- its B2C disbursement is in flight.
            ALTER TABLE orders ADD COLUMN settlement TEXT;

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
