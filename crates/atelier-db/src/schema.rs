//! Shipped schema for the workshop store.
//!
//! Every script uses guarded DDL so a migration interrupted before its
//! bookkeeping row was written can run again safely.

use crate::migrations::Migration;

pub const USERS_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'client'
        CHECK (role IN ('client', 'worker', 'operator', 'admin')),
    password_hash TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub const PRODUCTS_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    base_price REAL NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub const APPLICATIONS_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    product_id INTEGER REFERENCES products(id) ON DELETE SET NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new'
        CHECK (status IN ('new', 'in_review', 'offered', 'accepted', 'rejected', 'completed')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub const OFFERS_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS offers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
    worker_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    price REAL NOT NULL,
    deadline TEXT NOT NULL,
    comment TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'declined')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub const REVIEWS_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    application_id INTEGER REFERENCES applications(id) ON DELETE SET NULL,
    client_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    text TEXT,
    is_approved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

pub const LOOKUP_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status, created_at);
CREATE INDEX IF NOT EXISTS idx_applications_client ON applications(client_id);
CREATE INDEX IF NOT EXISTS idx_offers_application ON offers(application_id);
CREATE INDEX IF NOT EXISTS idx_offers_worker ON offers(worker_id);
CREATE INDEX IF NOT EXISTS idx_reviews_approved ON reviews(is_approved, created_at);
";

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create users",
        up: USERS_V1_SQL,
    },
    Migration {
        version: 2,
        description: "create products",
        up: PRODUCTS_V1_SQL,
    },
    Migration {
        version: 3,
        description: "create applications",
        up: APPLICATIONS_V1_SQL,
    },
    Migration {
        version: 4,
        description: "create offers",
        up: OFFERS_V1_SQL,
    },
    Migration {
        version: 5,
        description: "create reviews",
        up: REVIEWS_V1_SQL,
    },
    Migration {
        version: 6,
        description: "add lookup indexes",
        up: LOOKUP_INDEXES_SQL,
    },
];
