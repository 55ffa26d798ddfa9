// 🍱 Ledger records
//
// Plain data handed between the ledger, the settlement engine and the
// presentation layers. No behaviour beyond small helpers lives here.

use crate::money::{saturating_sum, Money};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type MealId = i64;

/// Consumer name recorded on shared items (they have no single consumer)
pub const SHARED_CONSUMER: &str = "shared";

/// One food-ordering event at a restaurant on a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: MealId,
    pub restaurant: String,
    pub date: NaiveDate,
    pub settled: bool,
    pub created_at: DateTime<Utc>,
}

/// One line of consumption within a meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub meal_id: MealId,
    /// Consumer, or SHARED_CONSUMER when `shared` is set
    pub person: String,
    pub description: String,
    pub amount: Money,
    pub shared: bool,
}

impl Item {
    /// Consumer name for personal items, None for shared ones
    pub fn consumer(&self) -> Option<&str> {
        if self.shared {
            None
        } else {
            Some(&self.person)
        }
    }
}

/// Money one person advanced on behalf of the group for a meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub meal_id: MealId,
    pub person: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: i64,
    pub restaurant_id: i64,
    pub name: String,
    pub price: Option<Money>,
}

/// Meal list row: the meal plus its item count and total spend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealOverview {
    #[serde(flatten)]
    pub meal: Meal,
    pub item_count: usize,
    pub total: Money,
}

/// Everything the settlement engine needs to know about one meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealSnapshot {
    pub meal: Meal,
    pub items: Vec<Item>,
    pub payments: Vec<Payment>,
}

impl MealSnapshot {
    pub fn new(meal: Meal, items: Vec<Item>, payments: Vec<Payment>) -> Self {
        Self { meal, items, payments }
    }

    pub fn total_spent(&self) -> Money {
        saturating_sum(self.items.iter().map(|item| item.amount))
    }

    pub fn total_paid(&self) -> Money {
        saturating_sum(self.payments.iter().map(|payment| payment.amount))
    }
}

/// New item as submitted by a caller, before it has an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub person: String,
    pub description: String,
    pub amount: Money,
    #[serde(default)]
    pub shared: bool,
}

impl NewItem {
    pub fn personal(person: &str, description: &str, amount: Money) -> Self {
        Self {
            person: person.to_string(),
            description: description.to_string(),
            amount,
            shared: false,
        }
    }

    pub fn shared(description: &str, amount: Money) -> Self {
        Self {
            person: SHARED_CONSUMER.to_string(),
            description: description.to_string(),
            amount,
            shared: true,
        }
    }
}
