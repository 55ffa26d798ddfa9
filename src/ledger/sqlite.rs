// 🗄️ SQLite ledger
//
// One rusqlite Connection, WAL journal, foreign keys with cascade deletes.
// Money is stored as decimal TEXT so nothing passes through a float.
// Every write appends an audit event inside the same savepoint, so writes
// nest cleanly inside `atomically`.

use super::audit::{self, create_events_table, insert_event, Event, EventKind, Subject};
use super::{validate_name, validate_new_item, validate_person, LedgerReader, LedgerStore};
use crate::error::{LedgerError, Result};
use crate::models::{
    Item, Meal, MealId, MealOverview, MealSnapshot, Member, MenuItem, NewItem, Payment,
    Restaurant,
};
use crate::money::{ensure_amount, Money};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteLedger {
    conn: Connection,
    actor: String,
}

impl SqliteLedger {
    /// Open (or create) the ledger file and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "ledger database opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Self {
            conn,
            actor: "api".to_string(),
        })
    }

    /// Name recorded as the actor on audit events
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn set_actor(&mut self, actor: &str) {
        self.actor = actor.to_string();
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn meal_history(&self, meal_id: MealId) -> Result<Vec<Event>> {
        audit::meal_history(&self.conn, meal_id)
    }

    pub fn history(&self, subject: Subject, id: i64) -> Result<Vec<Event>> {
        audit::history(&self.conn, subject, id)
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        audit::recent_events(&self.conn, limit)
    }

    fn record(
        conn: &Connection,
        actor: &str,
        kind: EventKind,
        subject_id: i64,
        data: serde_json::Value,
    ) -> Result<()> {
        insert_event(conn, &Event::on(kind, subject_id, data, actor))
    }

    /// Delete one row. The event is filed under the row's `parent` column
    /// (meal or restaurant) when given, else under the row itself.
    fn delete_row(
        &mut self,
        table: &str,
        entity: &'static str,
        kind: EventKind,
        parent: Option<&str>,
        id: i64,
    ) -> Result<()> {
        let sp = self.conn.savepoint()?;

        let subject_id: Option<i64> = sp
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", parent.unwrap_or("id"), table),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(subject_id) = subject_id else {
            return Err(LedgerError::NotFound { entity, id });
        };

        sp.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
        Self::record(&sp, &self.actor, kind, subject_id, serde_json::json!({ "id": id }))?;
        sp.commit()?;
        Ok(())
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases report "memory"
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "journal mode set");

    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS restaurants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS menu_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            restaurant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            price TEXT,
            FOREIGN KEY (restaurant_id) REFERENCES restaurants(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS meals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            restaurant TEXT NOT NULL,
            date TEXT NOT NULL,
            settled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meal_id INTEGER NOT NULL,
            person TEXT NOT NULL,
            description TEXT NOT NULL,
            amount TEXT NOT NULL,
            shared INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (meal_id) REFERENCES meals(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meal_id INTEGER NOT NULL,
            person TEXT NOT NULL,
            amount TEXT NOT NULL,
            FOREIGN KEY (meal_id) REFERENCES meals(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS import_rows (
            hash TEXT PRIMARY KEY,
            imported_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_meals_settled ON meals(settled);
        CREATE INDEX IF NOT EXISTS idx_meals_date ON meals(date);
        CREATE INDEX IF NOT EXISTS idx_items_meal ON items(meal_id);
        CREATE INDEX IF NOT EXISTS idx_payments_meal ON payments(meal_id);
        CREATE INDEX IF NOT EXISTS idx_menu_restaurant ON menu_items(restaurant_id);",
    )?;

    create_events_table(conn)?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn money_at(row: &Row, idx: usize) -> rusqlite::Result<Money> {
    let raw: String = row.get(idx)?;
    Money::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_money_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Money>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Money::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

const MEAL_COLUMNS: &str = "id, restaurant, date, settled, created_at";

fn meal_from_row(row: &Row) -> rusqlite::Result<Meal> {
    Ok(Meal {
        id: row.get(0)?,
        restaurant: row.get(1)?,
        date: date_at(row, 2)?,
        settled: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        meal_id: row.get(1)?,
        person: row.get(2)?,
        description: row.get(3)?,
        amount: money_at(row, 4)?,
        shared: row.get(5)?,
    })
}

fn payment_from_row(row: &Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        meal_id: row.get(1)?,
        person: row.get(2)?,
        amount: money_at(row, 3)?,
    })
}

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: timestamp_at(row, 2)?,
    })
}

fn menu_item_from_row(row: &Row) -> rusqlite::Result<MenuItem> {
    Ok(MenuItem {
        id: row.get(0)?,
        restaurant_id: row.get(1)?,
        name: row.get(2)?,
        price: optional_money_at(row, 3)?,
    })
}

// ============================================================================
// QUERIES (shared by plain reads and snapshot transactions)
// ============================================================================

fn query_unsettled_ids(conn: &Connection) -> Result<Vec<MealId>> {
    let mut stmt = conn.prepare("SELECT id FROM meals WHERE settled = 0 ORDER BY date, id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn query_meal(conn: &Connection, meal_id: MealId) -> Result<Option<Meal>> {
    let meal = conn
        .query_row(
            &format!("SELECT {} FROM meals WHERE id = ?1", MEAL_COLUMNS),
            [meal_id],
            meal_from_row,
        )
        .optional()?;
    Ok(meal)
}

fn query_items(conn: &Connection, meal_id: MealId) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT id, meal_id, person, description, amount, shared
         FROM items WHERE meal_id = ?1 ORDER BY id",
    )?;
    let items = stmt
        .query_map([meal_id], item_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

fn query_payments(conn: &Connection, meal_id: MealId) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT id, meal_id, person, amount FROM payments WHERE meal_id = ?1 ORDER BY id",
    )?;
    let payments = stmt
        .query_map([meal_id], payment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(payments)
}

fn require_meal(conn: &Connection, meal_id: MealId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM meals WHERE id = ?1)",
        [meal_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(LedgerError::MealNotFound(meal_id))
    }
}

/// INSERT OR IGNORE then SELECT: returns the member and whether it is new
fn ensure_member(conn: &Connection, name: &str) -> Result<(Member, bool)> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO members (name, created_at) VALUES (?1, ?2)",
        params![name, Utc::now().to_rfc3339()],
    )?;
    let member = conn.query_row(
        "SELECT id, name, created_at FROM members WHERE name = ?1",
        [name],
        member_from_row,
    )?;
    Ok((member, inserted > 0))
}

fn ensure_restaurant(conn: &Connection, name: &str) -> Result<(Restaurant, bool)> {
    let inserted = conn.execute("INSERT OR IGNORE INTO restaurants (name) VALUES (?1)", [name])?;
    let restaurant = conn.query_row(
        "SELECT id, name FROM restaurants WHERE name = ?1",
        [name],
        |row| {
            Ok(Restaurant {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )?;
    Ok((restaurant, inserted > 0))
}

// ============================================================================
// READ CONTRACT
// ============================================================================

impl LedgerReader for SqliteLedger {
    fn list_unsettled_meals(&self) -> Result<Vec<MealId>> {
        query_unsettled_ids(&self.conn)
    }

    fn list_items(&self, meal_id: MealId) -> Result<Vec<Item>> {
        query_items(&self.conn, meal_id)
    }

    fn list_payments(&self, meal_id: MealId) -> Result<Vec<Payment>> {
        query_payments(&self.conn, meal_id)
    }

    fn get_meal(&self, meal_id: MealId) -> Result<Option<Meal>> {
        query_meal(&self.conn, meal_id)
    }

    /// All reads happen inside one read transaction
    fn unsettled_snapshot(&self) -> Result<Vec<MealSnapshot>> {
        let tx = self.conn.unchecked_transaction()?;

        let mut snapshot = Vec::new();
        for meal_id in query_unsettled_ids(&tx)? {
            if let Some(meal) = query_meal(&tx, meal_id)? {
                let items = query_items(&tx, meal_id)?;
                let payments = query_payments(&tx, meal_id)?;
                snapshot.push(MealSnapshot::new(meal, items, payments));
            }
        }

        tx.commit()?;
        debug!(meals = snapshot.len(), "unsettled snapshot read");
        Ok(snapshot)
    }
}

// ============================================================================
// WRITE CONTRACT
// ============================================================================

impl LedgerStore for SqliteLedger {
    fn get_or_create_member(&mut self, name: &str) -> Result<Member> {
        let name = validate_name("Member", name)?;
        let tx = self.conn.savepoint()?;

        let (member, created) = ensure_member(&tx, &name)?;
        if created {
            Self::record(
                &tx,
                &self.actor,
                EventKind::MemberCreated,
                member.id,
                serde_json::json!({ "name": member.name }),
            )?;
        }

        tx.commit()?;
        Ok(member)
    }

    fn list_members(&self) -> Result<Vec<Member>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM members ORDER BY name")?;
        let members = stmt
            .query_map([], member_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    fn delete_member(&mut self, id: i64) -> Result<()> {
        self.delete_row("members", "Member", EventKind::MemberDeleted, None, id)
    }

    fn get_or_create_restaurant(&mut self, name: &str) -> Result<Restaurant> {
        let name = validate_name("Restaurant", name)?;
        let tx = self.conn.savepoint()?;

        let (restaurant, created) = ensure_restaurant(&tx, &name)?;
        if created {
            Self::record(
                &tx,
                &self.actor,
                EventKind::RestaurantCreated,
                restaurant.id,
                serde_json::json!({ "name": restaurant.name }),
            )?;
        }

        tx.commit()?;
        Ok(restaurant)
    }

    fn list_restaurants(&self) -> Result<Vec<Restaurant>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM restaurants ORDER BY name")?;
        let restaurants = stmt
            .query_map([], |row| {
                Ok(Restaurant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(restaurants)
    }

    fn delete_restaurant(&mut self, id: i64) -> Result<()> {
        self.delete_row("restaurants", "Restaurant", EventKind::RestaurantDeleted, None, id)
    }

    fn add_menu_item(
        &mut self,
        restaurant_id: i64,
        name: &str,
        price: Option<Money>,
    ) -> Result<MenuItem> {
        let name = validate_name("Menu item", name)?;
        let price = price.map(ensure_amount).transpose()?;

        let sp = self.conn.savepoint()?;

        let exists: bool = sp.query_row(
            "SELECT EXISTS(SELECT 1 FROM restaurants WHERE id = ?1)",
            [restaurant_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(LedgerError::NotFound {
                entity: "Restaurant",
                id: restaurant_id,
            });
        }

        sp.execute(
            "INSERT INTO menu_items (restaurant_id, name, price) VALUES (?1, ?2, ?3)",
            params![restaurant_id, name, price.map(|p| p.to_string())],
        )?;
        let id = sp.last_insert_rowid();

        Self::record(
            &sp,
            &self.actor,
            EventKind::MenuItemAdded,
            restaurant_id,
            serde_json::json!({
                "menu_item_id": id,
                "name": name,
                "price": price.map(|p| p.to_string()),
            }),
        )?;
        sp.commit()?;

        Ok(MenuItem {
            id,
            restaurant_id,
            name,
            price,
        })
    }

    fn list_menu(&self, restaurant_id: Option<i64>) -> Result<Vec<MenuItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, restaurant_id, name, price FROM menu_items
             WHERE ?1 IS NULL OR restaurant_id = ?1
             ORDER BY name",
        )?;
        let items = stmt
            .query_map([restaurant_id], menu_item_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn delete_menu_item(&mut self, id: i64) -> Result<()> {
        self.delete_row(
            "menu_items",
            "Menu item",
            EventKind::MenuItemDeleted,
            Some("restaurant_id"),
            id,
        )
    }

    fn create_meal(&mut self, restaurant: &str, date: NaiveDate) -> Result<Meal> {
        let name = validate_name("Restaurant", restaurant)?;
        let tx = self.conn.savepoint()?;

        let (restaurant, created) = ensure_restaurant(&tx, &name)?;
        if created {
            Self::record(
                &tx,
                &self.actor,
                EventKind::RestaurantCreated,
                restaurant.id,
                serde_json::json!({ "name": restaurant.name }),
            )?;
        }

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO meals (restaurant, date, settled, created_at) VALUES (?1, ?2, 0, ?3)",
            params![
                restaurant.name,
                date.format(DATE_FORMAT).to_string(),
                created_at.to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();

        Self::record(
            &tx,
            &self.actor,
            EventKind::MealCreated,
            id,
            serde_json::json!({ "restaurant": restaurant.name, "date": date }),
        )?;
        tx.commit()?;

        info!(meal_id = id, restaurant = %restaurant.name, %date, "meal created");

        Ok(Meal {
            id,
            restaurant: restaurant.name,
            date,
            settled: false,
            created_at,
        })
    }

    fn find_unsettled_meal(&self, restaurant: &str, date: NaiveDate) -> Result<Option<Meal>> {
        let meal = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM meals
                     WHERE settled = 0 AND restaurant = ?1 AND date = ?2
                     ORDER BY id LIMIT 1",
                    MEAL_COLUMNS
                ),
                params![restaurant.trim(), date.format(DATE_FORMAT).to_string()],
                meal_from_row,
            )
            .optional()?;
        Ok(meal)
    }

    fn list_meals(&self) -> Result<Vec<MealOverview>> {
        let mut totals: HashMap<MealId, (usize, Money)> = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT meal_id, amount FROM items")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, MealId>(0)?, money_at(row, 1)?)))?;
            for row in rows {
                let (meal_id, amount) = row?;
                let entry = totals.entry(meal_id).or_insert((0, Money::ZERO));
                entry.0 += 1;
                entry.1 = entry.1.saturating_add(amount);
            }
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM meals ORDER BY date DESC, created_at DESC, id DESC",
            MEAL_COLUMNS
        ))?;
        let meals = stmt
            .query_map([], meal_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(meals
            .into_iter()
            .map(|meal| {
                let (item_count, total) = totals.get(&meal.id).copied().unwrap_or((0, Money::ZERO));
                MealOverview {
                    meal,
                    item_count,
                    total,
                }
            })
            .collect())
    }

    fn delete_meal(&mut self, id: MealId) -> Result<()> {
        let tx = self.conn.savepoint()?;
        let changed = tx.execute("DELETE FROM meals WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(LedgerError::MealNotFound(id));
        }
        Self::record(&tx, &self.actor, EventKind::MealDeleted, id, serde_json::json!({}))?;
        tx.commit()?;
        Ok(())
    }

    fn set_meal_settled(&mut self, id: MealId, settled: bool) -> Result<()> {
        let tx = self.conn.savepoint()?;
        let changed = tx.execute(
            "UPDATE meals SET settled = ?1 WHERE id = ?2",
            params![settled, id],
        )?;
        if changed == 0 {
            return Err(LedgerError::MealNotFound(id));
        }
        let kind = if settled {
            EventKind::MealSettled
        } else {
            EventKind::MealUnsettled
        };
        Self::record(&tx, &self.actor, kind, id, serde_json::json!({}))?;
        tx.commit()?;
        Ok(())
    }

    fn settle_all_unsettled(&mut self) -> Result<usize> {
        let tx = self.conn.savepoint()?;

        let ids = query_unsettled_ids(&tx)?;
        tx.execute("UPDATE meals SET settled = 1 WHERE settled = 0", [])?;
        for id in &ids {
            Self::record(&tx, &self.actor, EventKind::MealSettled, *id, serde_json::json!({}))?;
        }

        tx.commit()?;
        info!(count = ids.len(), "all unsettled meals marked settled");
        Ok(ids.len())
    }

    fn add_item(&mut self, meal_id: MealId, item: NewItem) -> Result<Item> {
        let item = validate_new_item(item)?;
        let tx = self.conn.savepoint()?;

        require_meal(&tx, meal_id)?;
        if !item.shared {
            let (member, created) = ensure_member(&tx, &item.person)?;
            if created {
                Self::record(
                    &tx,
                    &self.actor,
                    EventKind::MemberCreated,
                    member.id,
                    serde_json::json!({ "name": member.name }),
                )?;
            }
        }

        tx.execute(
            "INSERT INTO items (meal_id, person, description, amount, shared)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meal_id,
                item.person,
                item.description,
                item.amount.to_string(),
                item.shared
            ],
        )?;
        let id = tx.last_insert_rowid();

        Self::record(
            &tx,
            &self.actor,
            EventKind::ItemAdded,
            meal_id,
            serde_json::json!({
                "item_id": id,
                "person": item.person,
                "description": item.description,
                "amount": item.amount.to_string(),
                "shared": item.shared,
            }),
        )?;
        tx.commit()?;

        Ok(Item {
            id,
            meal_id,
            person: item.person,
            description: item.description,
            amount: item.amount,
            shared: item.shared,
        })
    }

    fn delete_item(&mut self, id: i64) -> Result<()> {
        self.delete_row("items", "Item", EventKind::ItemDeleted, Some("meal_id"), id)
    }

    fn add_payment(&mut self, meal_id: MealId, person: &str, amount: Money) -> Result<Payment> {
        let amount = ensure_amount(amount)?;
        let person = validate_person(person)?;
        let tx = self.conn.savepoint()?;

        require_meal(&tx, meal_id)?;
        let (member, created) = ensure_member(&tx, &person)?;
        if created {
            Self::record(
                &tx,
                &self.actor,
                EventKind::MemberCreated,
                member.id,
                serde_json::json!({ "name": member.name }),
            )?;
        }

        tx.execute(
            "INSERT INTO payments (meal_id, person, amount) VALUES (?1, ?2, ?3)",
            params![meal_id, person, amount.to_string()],
        )?;
        let id = tx.last_insert_rowid();

        Self::record(
            &tx,
            &self.actor,
            EventKind::PaymentAdded,
            meal_id,
            serde_json::json!({
                "payment_id": id,
                "person": person,
                "amount": amount.to_string(),
            }),
        )?;
        tx.commit()?;

        Ok(Payment {
            id,
            meal_id,
            person,
            amount,
        })
    }

    fn delete_payment(&mut self, id: i64) -> Result<()> {
        self.delete_row("payments", "Payment", EventKind::PaymentDeleted, Some("meal_id"), id)
    }

    fn cleanup_settled_before(&mut self, cutoff: NaiveDate) -> Result<usize> {
        let cutoff_str = cutoff.format(DATE_FORMAT).to_string();
        let tx = self.conn.savepoint()?;

        let deleted = tx.execute(
            "DELETE FROM meals WHERE date < ?1 AND settled = 1",
            [&cutoff_str],
        )?;

        insert_event(&tx, &Event::cleanup(cutoff, deleted, &self.actor))?;
        tx.commit()?;

        info!(%cutoff, deleted, "retention cleanup finished");
        Ok(deleted)
    }

    fn record_import_row(&mut self, hash: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO import_rows (hash, imported_at) VALUES (?1, ?2)",
            params![hash, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// One IMMEDIATE transaction around `f`; the per-write savepoints nest
    /// inside it and are discarded on rollback
    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = f(self).and_then(|value| {
            self.conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        if result.is_err() && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::SettlementEngine;
    use rust_decimal_macros::dec;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    #[test]
    fn test_meal_roundtrip() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();
        let loaded = ledger.get_meal(meal.id).unwrap().unwrap();

        assert_eq!(loaded.restaurant, "Ramen Ya");
        assert_eq!(loaded.date, date(3, 2));
        assert!(!loaded.settled);
        assert_eq!(ledger.list_restaurants().unwrap().len(), 1);
    }

    #[test]
    fn test_amounts_survive_storage_exactly() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();

        ledger
            .add_item(meal.id, NewItem::personal("Alice", "Tonkotsu", dec!(0.1)))
            .unwrap();
        ledger
            .add_item(meal.id, NewItem::personal("Alice", "Egg", dec!(0.2)))
            .unwrap();

        let total: Money = ledger
            .list_items(meal.id)
            .unwrap()
            .iter()
            .map(|item| item.amount)
            .sum();
        assert_eq!(total, dec!(0.3));
    }

    #[test]
    fn test_add_item_get_or_creates_member() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();

        ledger.add_item(meal.id, NewItem::personal("Bob", "Shoyu", dec!(150))).unwrap();
        ledger.add_item(meal.id, NewItem::personal("Bob", "Gyoza", dec!(60))).unwrap();
        ledger.add_item(meal.id, NewItem::shared("Karaage", dec!(120))).unwrap();
        ledger.add_payment(meal.id, "Carol", dec!(330)).unwrap();

        let names: Vec<String> = ledger
            .list_members()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Bob".to_string(), "Carol".to_string()]);
    }

    #[test]
    fn test_add_item_to_missing_meal_fails() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        let err = ledger
            .add_item(42, NewItem::personal("Bob", "Shoyu", dec!(150)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::MealNotFound(42)));
        assert!(ledger.list_members().unwrap().is_empty());
    }

    #[test]
    fn test_delete_meal_cascades_items_and_payments() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();
        ledger.add_item(meal.id, NewItem::personal("Bob", "Shoyu", dec!(150))).unwrap();
        ledger.add_payment(meal.id, "Bob", dec!(150)).unwrap();

        ledger.delete_meal(meal.id).unwrap();

        let item_count: i64 = ledger
            .connection()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        let payment_count: i64 = ledger
            .connection()
            .query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(item_count, 0);
        assert_eq!(payment_count, 0);
        assert!(matches!(
            ledger.delete_meal(meal.id),
            Err(LedgerError::MealNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_feeds_settlement() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        let c = ledger.create_meal("Curry Corner", date(5, 1)).unwrap();
        ledger.add_item(c.id, NewItem::personal("Alice", "Katsu curry", dec!(200))).unwrap();
        ledger.add_payment(c.id, "Bob", dec!(200)).unwrap();

        let d = ledger.create_meal("Deli", date(5, 2)).unwrap();
        ledger.add_item(d.id, NewItem::personal("Bob", "Sandwich", dec!(50))).unwrap();
        ledger.add_payment(d.id, "Carol", dec!(50)).unwrap();

        let report = SettlementEngine::new().settle_from_ledger(&ledger).unwrap();

        assert_eq!(report.unsettled_count, 2);
        assert_eq!(report.balances["Alice"], dec!(-200));
        assert_eq!(report.balances["Bob"], dec!(150));
        assert_eq!(report.balances["Carol"], dec!(50));
        assert_eq!(report.transactions.len(), 2);
        assert_eq!(report.transactions[0].to, "Bob");

        ledger.settle_all_unsettled().unwrap();
        let after = SettlementEngine::new().settle_from_ledger(&ledger).unwrap();
        assert_eq!(after.unsettled_count, 0);
        assert!(after.balances.is_empty());
    }

    #[test]
    fn test_list_meals_totals_and_order() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let older = ledger.create_meal("Old Place", date(1, 5)).unwrap();
        let newer = ledger.create_meal("New Place", date(2, 5)).unwrap();
        ledger.add_item(newer.id, NewItem::personal("Alice", "Bowl", dec!(95.5))).unwrap();
        ledger.add_item(newer.id, NewItem::shared("Fries", dec!(40))).unwrap();

        let meals = ledger.list_meals().unwrap();

        assert_eq!(meals.len(), 2);
        assert_eq!(meals[0].meal.id, newer.id);
        assert_eq!(meals[0].item_count, 2);
        assert_eq!(meals[0].total, dec!(135.5));
        assert_eq!(meals[1].meal.id, older.id);
        assert_eq!(meals[1].total, dec!(0));
    }

    #[test]
    fn test_cleanup_settled_before() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let old = ledger.create_meal("Old", date(1, 1)).unwrap();
        let old_open = ledger.create_meal("Old but open", date(1, 2)).unwrap();
        let recent = ledger.create_meal("Recent", date(7, 1)).unwrap();
        ledger.set_meal_settled(old.id, true).unwrap();
        ledger.set_meal_settled(recent.id, true).unwrap();

        let deleted = ledger.cleanup_settled_before(date(3, 1)).unwrap();

        assert_eq!(deleted, 1);
        assert!(ledger.get_meal(old.id).unwrap().is_none());
        assert!(ledger.get_meal(old_open.id).unwrap().is_some());
        assert!(ledger.get_meal(recent.id).unwrap().is_some());
    }

    #[test]
    fn test_settle_and_unsettle_are_audited() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap().with_actor("tester");
        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();

        ledger.set_meal_settled(meal.id, true).unwrap();
        ledger.set_meal_settled(meal.id, false).unwrap();

        let events = ledger.meal_history(meal.id).unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();

        assert_eq!(
            kinds,
            vec![
                EventKind::MealCreated,
                EventKind::MealSettled,
                EventKind::MealUnsettled
            ]
        );
        assert!(events.iter().all(|e| e.actor == "tester"));
        assert!(!ledger.get_meal(meal.id).unwrap().unwrap().settled);
    }

    #[test]
    fn test_restaurant_delete_cascades_menu() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let restaurant = ledger.get_or_create_restaurant("Taqueria").unwrap();
        let again = ledger.get_or_create_restaurant("Taqueria").unwrap();
        assert_eq!(restaurant.id, again.id);

        let taco = ledger.add_menu_item(restaurant.id, "Al pastor", Some(dec!(45))).unwrap();
        ledger.add_menu_item(restaurant.id, "Horchata", None).unwrap();

        let menu = ledger.list_menu(Some(restaurant.id)).unwrap();
        assert_eq!(menu.len(), 2);
        assert_eq!(menu[0].id, taco.id);
        assert_eq!(menu[0].price, Some(dec!(45)));
        assert_eq!(menu[1].price, None);

        ledger.delete_restaurant(restaurant.id).unwrap();
        assert!(ledger.list_menu(None).unwrap().is_empty());
    }

    #[test]
    fn test_meal_history_covers_lines_and_their_deletion() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let meal = ledger.create_meal("Pho House", date(6, 9)).unwrap();
        let item = ledger.add_item(meal.id, NewItem::personal("Alice", "Pho", dec!(95))).unwrap();
        let payment = ledger.add_payment(meal.id, "Bob", dec!(95)).unwrap();

        ledger.delete_item(item.id).unwrap();
        ledger.delete_payment(payment.id).unwrap();

        let kinds: Vec<EventKind> = ledger
            .meal_history(meal.id)
            .unwrap()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::MealCreated,
                EventKind::ItemAdded,
                EventKind::PaymentAdded,
                EventKind::ItemDeleted,
                EventKind::PaymentDeleted
            ]
        );
    }

    #[test]
    fn test_menu_changes_are_audited() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let restaurant = ledger.get_or_create_restaurant("Taqueria").unwrap();
        let taco = ledger.add_menu_item(restaurant.id, "Al pastor", Some(dec!(45))).unwrap();
        ledger.delete_menu_item(taco.id).unwrap();

        let events = ledger.history(Subject::Restaurant, restaurant.id).unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();

        assert_eq!(
            kinds,
            vec![
                EventKind::RestaurantCreated,
                EventKind::MenuItemAdded,
                EventKind::MenuItemDeleted
            ]
        );
        assert_eq!(events[1].data["menu_item_id"], taco.id);
        assert_eq!(events[1].data["price"], "45");
        assert_eq!(events[2].data["id"], taco.id);
    }

    #[test]
    fn test_payment_rejects_reserved_name_and_huge_amounts() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let meal = ledger.create_meal("Ramen Ya", date(3, 2)).unwrap();

        assert!(ledger.add_payment(meal.id, "shared", dec!(30)).unwrap_err().is_client_error());
        assert!(matches!(
            ledger.add_payment(meal.id, "Bob", dec!(50000000000000000000000000000)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(ledger.list_payments(meal.id).unwrap().is_empty());
        assert!(ledger.list_members().unwrap().is_empty());
    }

    #[test]
    fn test_find_unsettled_meal_skips_settled() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let settled = ledger.create_meal("Curry Corner", date(6, 2)).unwrap();
        ledger.set_meal_settled(settled.id, true).unwrap();
        assert!(ledger.find_unsettled_meal("Curry Corner", date(6, 2)).unwrap().is_none());

        let open = ledger.create_meal("Curry Corner", date(6, 2)).unwrap();
        let found = ledger.find_unsettled_meal("Curry Corner", date(6, 2)).unwrap();
        assert_eq!(found.map(|meal| meal.id), Some(open.id));
        assert!(ledger.find_unsettled_meal("Curry Corner", date(6, 3)).unwrap().is_none());
    }

    #[test]
    fn test_atomically_rolls_back_rows_hashes_and_events() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        let result: Result<()> = ledger.atomically(|ledger| {
            assert!(ledger.record_import_row("row-1")?);
            let meal = ledger.create_meal("Noodle Bar", date(6, 6))?;
            ledger.add_payment(meal.id, "Alice", dec!(80))?;
            Err(LedgerError::Validation("stop".to_string()))
        });

        assert!(result.is_err());
        assert!(ledger.list_meals().unwrap().is_empty());
        assert!(ledger.list_members().unwrap().is_empty());
        assert!(ledger.recent_events(10).unwrap().is_empty());
        assert!(ledger.record_import_row("row-1").unwrap());

        let meal = ledger
            .atomically(|ledger| ledger.create_meal("Noodle Bar", date(6, 6)))
            .unwrap();
        assert!(ledger.get_meal(meal.id).unwrap().is_some());
    }

    #[test]
    fn test_menu_item_for_missing_restaurant() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        assert!(matches!(
            ledger.add_menu_item(5, "Ghost dish", None),
            Err(LedgerError::NotFound { entity: "Restaurant", id: 5 })
        ));
    }

    #[test]
    fn test_delete_missing_rows_report_not_found() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        assert!(ledger.delete_item(1).unwrap_err().is_not_found());
        assert!(ledger.delete_payment(1).unwrap_err().is_not_found());
        assert!(ledger.delete_member(1).unwrap_err().is_not_found());
        assert!(ledger.delete_menu_item(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_record_import_row() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();

        assert!(ledger.record_import_row("hash-1").unwrap());
        assert!(!ledger.record_import_row("hash-1").unwrap());
        assert!(ledger.record_import_row("hash-2").unwrap());
    }

    #[test]
    fn test_reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meals.db");

        {
            let mut ledger = SqliteLedger::open(&path).unwrap();
            let meal = ledger.create_meal("Bistro", date(4, 4)).unwrap();
            ledger.add_payment(meal.id, "Dana", dec!(88)).unwrap();
        }

        let ledger = SqliteLedger::open(&path).unwrap();
        let meals = ledger.list_meals().unwrap();
        assert_eq!(meals.len(), 1);
        let payments = ledger.list_payments(meals[0].meal.id).unwrap();
        assert_eq!(payments[0].amount, dec!(88));
    }
}
