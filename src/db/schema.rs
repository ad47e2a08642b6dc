//! Database schema and migrations for tempbox.
//!
//! Migrations are applied to the active store only. The historical store is
//! expected to carry the same tables but is never migrated or written.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Addresses
    r#"
CREATE TABLE addresses (
    address         TEXT PRIMARY KEY,
    domain          TEXT NOT NULL,
    owner_id        INTEGER,                      -- NULL for orphan addresses
    is_anonymous    INTEGER NOT NULL DEFAULT 1,
    created_at      INTEGER NOT NULL,             -- Unix milliseconds
    expires_at      INTEGER NOT NULL              -- Unix milliseconds
);

CREATE INDEX idx_addresses_owner_id ON addresses(owner_id);
CREATE INDEX idx_addresses_expires_at ON addresses(expires_at);
"#,
    // v2: Messages
    r#"
CREATE TABLE messages (
    id                  TEXT PRIMARY KEY,
    address             TEXT NOT NULL REFERENCES addresses(address) ON DELETE CASCADE,
    sender              TEXT NOT NULL,
    subject             TEXT NOT NULL,
    body                TEXT NOT NULL,
    html                TEXT,
    received_at         INTEGER NOT NULL,         -- Unix milliseconds
    is_read             INTEGER NOT NULL DEFAULT 0,
    is_starred          INTEGER NOT NULL DEFAULT 0,
    spam_flag           INTEGER NOT NULL DEFAULT 0,
    deferred_delete_at  INTEGER                   -- set only by deferred_delete spam rules
);

CREATE INDEX idx_messages_address ON messages(address);
CREATE INDEX idx_messages_received_at ON messages(received_at);
CREATE INDEX idx_messages_deferred_delete_at ON messages(deferred_delete_at);
"#,
    // v3: Spam rules
    r#"
CREATE TABLE spam_rules (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL,
    rule_type           TEXT NOT NULL,            -- 'subject', 'sender', 'both'
    subject_pattern     TEXT,
    sender_pattern      TEXT,
    action              TEXT NOT NULL,            -- 'block', 'deferred_delete'
    delay_minutes       INTEGER,
    enabled             INTEGER NOT NULL DEFAULT 1,
    created_at          INTEGER NOT NULL          -- Unix milliseconds
);

CREATE INDEX idx_spam_rules_created_at ON spam_rules(created_at);
"#,
    // v4: Tombstones. A delete in the active store hides the historical row
    // with the same key; the trigger runs inside the deleting statement.
    r#"
CREATE TABLE tombstones (
    table_name  TEXT NOT NULL,
    record_key  TEXT NOT NULL,
    deleted_at  INTEGER NOT NULL,                 -- Unix milliseconds
    PRIMARY KEY (table_name, record_key)
);

CREATE TRIGGER addresses_tombstone AFTER DELETE ON addresses
BEGIN
    INSERT OR REPLACE INTO tombstones (table_name, record_key, deleted_at)
    VALUES ('addresses', OLD.address, CAST(strftime('%s', 'now') AS INTEGER) * 1000);
END;

CREATE TRIGGER messages_tombstone AFTER DELETE ON messages
BEGIN
    INSERT OR REPLACE INTO tombstones (table_name, record_key, deleted_at)
    VALUES ('messages', OLD.id, CAST(strftime('%s', 'now') AS INTEGER) * 1000);
END;

CREATE TRIGGER spam_rules_tombstone AFTER DELETE ON spam_rules
BEGIN
    INSERT OR REPLACE INTO tombstones (table_name, record_key, deleted_at)
    VALUES ('spam_rules', CAST(OLD.id AS TEXT), CAST(strftime('%s', 'now') AS INTEGER) * 1000);
END;
"#,
];
