// 📜 Audit trail
//
// Append-only `events` table, written in the same transaction as the change
// it describes. Items and payments are filed under their meal, menu items
// under their restaurant, so one query returns a meal's whole history.

use crate::error::Result;
use crate::models::MealId;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Record an event is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Meal,
    Member,
    Restaurant,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Meal => "meal",
            Subject::Member => "member",
            Subject::Restaurant => "restaurant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MealCreated,
    MealDeleted,
    MealSettled,
    MealUnsettled,
    ItemAdded,
    ItemDeleted,
    PaymentAdded,
    PaymentDeleted,
    MemberCreated,
    MemberDeleted,
    RestaurantCreated,
    RestaurantDeleted,
    MenuItemAdded,
    MenuItemDeleted,
    Cleanup,
}

impl EventKind {
    const ALL: [EventKind; 15] = [
        EventKind::MealCreated,
        EventKind::MealDeleted,
        EventKind::MealSettled,
        EventKind::MealUnsettled,
        EventKind::ItemAdded,
        EventKind::ItemDeleted,
        EventKind::PaymentAdded,
        EventKind::PaymentDeleted,
        EventKind::MemberCreated,
        EventKind::MemberDeleted,
        EventKind::RestaurantCreated,
        EventKind::RestaurantDeleted,
        EventKind::MenuItemAdded,
        EventKind::MenuItemDeleted,
        EventKind::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MealCreated => "meal_created",
            EventKind::MealDeleted => "meal_deleted",
            EventKind::MealSettled => "meal_settled",
            EventKind::MealUnsettled => "meal_unsettled",
            EventKind::ItemAdded => "item_added",
            EventKind::ItemDeleted => "item_deleted",
            EventKind::PaymentAdded => "payment_added",
            EventKind::PaymentDeleted => "payment_deleted",
            EventKind::MemberCreated => "member_created",
            EventKind::MemberDeleted => "member_deleted",
            EventKind::RestaurantCreated => "restaurant_created",
            EventKind::RestaurantDeleted => "restaurant_deleted",
            EventKind::MenuItemAdded => "menu_item_added",
            EventKind::MenuItemDeleted => "menu_item_deleted",
            EventKind::Cleanup => "cleanup",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    pub fn subject(self) -> Subject {
        match self {
            EventKind::MemberCreated | EventKind::MemberDeleted => Subject::Member,
            EventKind::RestaurantCreated
            | EventKind::RestaurantDeleted
            | EventKind::MenuItemAdded
            | EventKind::MenuItemDeleted => Subject::Restaurant,
            _ => Subject::Meal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// None for events spanning many records (cleanup)
    pub subject_id: Option<i64>,
    pub data: Value,
    pub actor: String,
}

impl Event {
    /// Event about the record `subject_id`, of the kind's subject
    pub fn on(kind: EventKind, subject_id: i64, data: Value, actor: &str) -> Self {
        Self::build(kind, Some(subject_id), data, actor)
    }

    pub fn cleanup(cutoff: NaiveDate, deleted: usize, actor: &str) -> Self {
        Self::build(
            EventKind::Cleanup,
            None,
            json!({ "cutoff": cutoff, "deleted": deleted }),
            actor,
        )
    }

    fn build(kind: EventKind, subject_id: Option<i64>, data: Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            subject_id,
            data,
            actor: actor.to_string(),
        }
    }

    pub fn subject(&self) -> Subject {
        self.kind.subject()
    }
}

pub fn create_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_id INTEGER,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_subject ON events(subject, subject_id);",
    )?;
    Ok(())
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (event_id, timestamp, kind, subject, subject_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.kind.as_str(),
            event.subject().as_str(),
            event.subject_id,
            serde_json::to_string(&event.data)?,
            event.actor,
        ],
    )?;
    Ok(())
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let data: String = row.get(4)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
        kind: EventKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown event kind '{}'", kind).into(),
            )
        })?,
        subject_id: row.get(3)?,
        data: serde_json::from_str(&data)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        actor: row.get(5)?,
    })
}

/// Everything recorded against one record, in the order it happened
pub fn history(conn: &Connection, subject: Subject, subject_id: i64) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, kind, subject_id, data, actor
         FROM events
         WHERE subject = ?1 AND subject_id = ?2
         ORDER BY id",
    )?;
    let events = stmt
        .query_map(params![subject.as_str(), subject_id], event_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Creation, items, payments, settlement and deletion of one meal
pub fn meal_history(conn: &Connection, meal_id: MealId) -> Result<Vec<Event>> {
    history(conn, Subject::Meal, meal_id)
}

/// Latest events of any kind, newest first
pub fn recent_events(conn: &Connection, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, kind, subject_id, data, actor
         FROM events ORDER BY id DESC LIMIT ?1",
    )?;
    let events = stmt
        .query_map([limit as i64], event_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}
