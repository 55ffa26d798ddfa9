// 📒 Ledger - the repository the settlement engine reads from
//
// LedgerReader is the narrow read contract the engine depends on.
// LedgerStore adds the write path used by the server and the importer,
// including the idempotent get-or-create of members and restaurants.
//
// Two implementations:
// - SqliteLedger: rusqlite, WAL, cascade deletes, audit events
// - InMemoryLedger: BTreeMap-backed fake for tests and dry runs

pub mod audit;
pub mod memory;
pub mod sqlite;

pub use audit::{Event, EventKind, Subject};
pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use crate::error::{LedgerError, Result};
use crate::models::{
    Item, Meal, MealId, MealOverview, MealSnapshot, Member, MenuItem, NewItem, Payment,
    Restaurant, SHARED_CONSUMER,
};
use crate::money::{ensure_amount, Money};
use chrono::{Months, NaiveDate};

// ============================================================================
// READ CONTRACT
// ============================================================================

pub trait LedgerReader {
    /// Ids of every meal with settled == false
    fn list_unsettled_meals(&self) -> Result<Vec<MealId>>;

    fn list_items(&self, meal_id: MealId) -> Result<Vec<Item>>;

    fn list_payments(&self, meal_id: MealId) -> Result<Vec<Payment>>;

    fn get_meal(&self, meal_id: MealId) -> Result<Option<Meal>>;

    /// All unsettled meals with their items and payments.
    ///
    /// Implementations backed by shared storage should override this to read
    /// from a single point in time.
    fn unsettled_snapshot(&self) -> Result<Vec<MealSnapshot>> {
        let mut snapshot = Vec::new();

        for meal_id in self.list_unsettled_meals()? {
            // Deleted between the two reads
            let Some(meal) = self.get_meal(meal_id)? else {
                continue;
            };
            let items = self.list_items(meal_id)?;
            let payments = self.list_payments(meal_id)?;
            snapshot.push(MealSnapshot::new(meal, items, payments));
        }

        Ok(snapshot)
    }
}

// ============================================================================
// WRITE CONTRACT
// ============================================================================

pub trait LedgerStore: LedgerReader {
    // Members
    fn get_or_create_member(&mut self, name: &str) -> Result<Member>;
    fn list_members(&self) -> Result<Vec<Member>>;
    fn delete_member(&mut self, id: i64) -> Result<()>;

    // Restaurants and menus
    fn get_or_create_restaurant(&mut self, name: &str) -> Result<Restaurant>;
    fn list_restaurants(&self) -> Result<Vec<Restaurant>>;
    /// Also deletes the restaurant's menu
    fn delete_restaurant(&mut self, id: i64) -> Result<()>;
    fn add_menu_item(
        &mut self,
        restaurant_id: i64,
        name: &str,
        price: Option<Money>,
    ) -> Result<MenuItem>;
    /// Menu of one restaurant, or every menu item when `restaurant_id` is None
    fn list_menu(&self, restaurant_id: Option<i64>) -> Result<Vec<MenuItem>>;
    fn delete_menu_item(&mut self, id: i64) -> Result<()>;

    // Meals
    /// Get-or-creates the restaurant as well
    fn create_meal(&mut self, restaurant: &str, date: NaiveDate) -> Result<Meal>;
    /// Oldest unsettled meal at `restaurant` on `date`
    fn find_unsettled_meal(&self, restaurant: &str, date: NaiveDate) -> Result<Option<Meal>>;
    /// Newest date first
    fn list_meals(&self) -> Result<Vec<MealOverview>>;
    /// Also deletes the meal's items and payments
    fn delete_meal(&mut self, id: MealId) -> Result<()>;
    fn set_meal_settled(&mut self, id: MealId, settled: bool) -> Result<()>;
    /// Returns how many meals were marked settled
    fn settle_all_unsettled(&mut self) -> Result<usize>;

    // Items and payments
    /// Get-or-creates the consumer as a member unless the item is shared
    fn add_item(&mut self, meal_id: MealId, item: NewItem) -> Result<Item>;
    fn delete_item(&mut self, id: i64) -> Result<()>;
    /// Get-or-creates the payer as a member. The shared sentinel is not a payer.
    fn add_payment(&mut self, meal_id: MealId, person: &str, amount: Money) -> Result<Payment>;
    fn delete_payment(&mut self, id: i64) -> Result<()>;

    // Retention
    /// Delete settled meals dated strictly before `cutoff`; returns the count
    fn cleanup_settled_before(&mut self, cutoff: NaiveDate) -> Result<usize>;

    // Import bookkeeping
    /// Record an import row hash. False when it was already recorded.
    fn record_import_row(&mut self, hash: &str) -> Result<bool>;

    /// Run `f` as one unit: when it returns an error, none of its writes
    /// (import row hashes included) are kept
    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>;
}

// ============================================================================
// SHARED VALIDATION
// ============================================================================

/// Trim a name and reject empty ones
pub fn validate_name(kind: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed.to_string())
}

/// A person who can eat or pay. The shared sentinel is reserved.
pub fn validate_person(name: &str) -> Result<String> {
    let person = validate_name("Person", name)?;
    if person == SHARED_CONSUMER {
        return Err(LedgerError::Validation(format!(
            "'{}' is reserved for shared items",
            SHARED_CONSUMER
        )));
    }
    Ok(person)
}

/// Normalize a new item: shared items get the shared consumer sentinel,
/// personal items need a consumer name, amounts must not be negative.
pub fn validate_new_item(item: NewItem) -> Result<NewItem> {
    let amount = ensure_amount(item.amount)?;
    let description = validate_name("Item", &item.description)?;

    let person = if item.shared {
        SHARED_CONSUMER.to_string()
    } else {
        validate_person(&item.person)?
    };

    Ok(NewItem {
        person,
        description,
        amount,
        shared: item.shared,
    })
}

/// Oldest meal date kept by retention: `today` minus `months`
pub fn retention_cutoff(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}
