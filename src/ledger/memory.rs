// In-memory ledger. Same contract as SqliteLedger, no file, no process-wide
// state. Used by tests and by `meal-ledger import --dry-run`.

use super::{validate_name, validate_new_item, validate_person, LedgerReader, LedgerStore};
use crate::error::{LedgerError, Result};
use crate::models::{
    Item, Meal, MealId, MealOverview, Member, MenuItem, NewItem, Payment, Restaurant,
};
use crate::money::{ensure_amount, saturating_sum, Money};
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct InMemoryLedger {
    next_id: i64,
    members: BTreeMap<i64, Member>,
    restaurants: BTreeMap<i64, Restaurant>,
    menu: BTreeMap<i64, MenuItem>,
    meals: BTreeMap<MealId, Meal>,
    items: BTreeMap<i64, Item>,
    payments: BTreeMap<i64, Payment>,
    import_rows: HashSet<String>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_meal(&self, meal_id: MealId) -> Result<()> {
        if self.meals.contains_key(&meal_id) {
            Ok(())
        } else {
            Err(LedgerError::MealNotFound(meal_id))
        }
    }
}

impl LedgerReader for InMemoryLedger {
    fn list_unsettled_meals(&self) -> Result<Vec<MealId>> {
        Ok(self
            .meals
            .values()
            .filter(|meal| !meal.settled)
            .map(|meal| meal.id)
            .collect())
    }

    fn list_items(&self, meal_id: MealId) -> Result<Vec<Item>> {
        Ok(self
            .items
            .values()
            .filter(|item| item.meal_id == meal_id)
            .cloned()
            .collect())
    }

    fn list_payments(&self, meal_id: MealId) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .values()
            .filter(|payment| payment.meal_id == meal_id)
            .cloned()
            .collect())
    }

    fn get_meal(&self, meal_id: MealId) -> Result<Option<Meal>> {
        Ok(self.meals.get(&meal_id).cloned())
    }
}

impl LedgerStore for InMemoryLedger {
    fn get_or_create_member(&mut self, name: &str) -> Result<Member> {
        let name = validate_name("Member", name)?;

        if let Some(existing) = self.members.values().find(|m| m.name == name) {
            return Ok(existing.clone());
        }

        let member = Member {
            id: self.allocate_id(),
            name,
            created_at: Utc::now(),
        };
        self.members.insert(member.id, member.clone());
        Ok(member)
    }

    fn list_members(&self) -> Result<Vec<Member>> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(members)
    }

    fn delete_member(&mut self, id: i64) -> Result<()> {
        self.members
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::NotFound { entity: "Member", id })
    }

    fn get_or_create_restaurant(&mut self, name: &str) -> Result<Restaurant> {
        let name = validate_name("Restaurant", name)?;

        if let Some(existing) = self.restaurants.values().find(|r| r.name == name) {
            return Ok(existing.clone());
        }

        let restaurant = Restaurant {
            id: self.allocate_id(),
            name,
        };
        self.restaurants.insert(restaurant.id, restaurant.clone());
        Ok(restaurant)
    }

    fn list_restaurants(&self) -> Result<Vec<Restaurant>> {
        let mut restaurants: Vec<Restaurant> = self.restaurants.values().cloned().collect();
        restaurants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(restaurants)
    }

    fn delete_restaurant(&mut self, id: i64) -> Result<()> {
        if self.restaurants.remove(&id).is_none() {
            return Err(LedgerError::NotFound { entity: "Restaurant", id });
        }
        self.menu.retain(|_, item| item.restaurant_id != id);
        Ok(())
    }

    fn add_menu_item(
        &mut self,
        restaurant_id: i64,
        name: &str,
        price: Option<Money>,
    ) -> Result<MenuItem> {
        let name = validate_name("Menu item", name)?;
        let price = price.map(ensure_amount).transpose()?;

        if !self.restaurants.contains_key(&restaurant_id) {
            return Err(LedgerError::NotFound {
                entity: "Restaurant",
                id: restaurant_id,
            });
        }

        let item = MenuItem {
            id: self.allocate_id(),
            restaurant_id,
            name,
            price,
        };
        self.menu.insert(item.id, item.clone());
        Ok(item)
    }

    fn list_menu(&self, restaurant_id: Option<i64>) -> Result<Vec<MenuItem>> {
        let mut items: Vec<MenuItem> = self
            .menu
            .values()
            .filter(|item| restaurant_id.map_or(true, |id| item.restaurant_id == id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn delete_menu_item(&mut self, id: i64) -> Result<()> {
        self.menu
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::NotFound { entity: "Menu item", id })
    }

    fn create_meal(&mut self, restaurant: &str, date: NaiveDate) -> Result<Meal> {
        let restaurant = self.get_or_create_restaurant(restaurant)?;

        let meal = Meal {
            id: self.allocate_id(),
            restaurant: restaurant.name,
            date,
            settled: false,
            created_at: Utc::now(),
        };
        self.meals.insert(meal.id, meal.clone());
        Ok(meal)
    }

    fn find_unsettled_meal(&self, restaurant: &str, date: NaiveDate) -> Result<Option<Meal>> {
        let restaurant = restaurant.trim();
        Ok(self
            .meals
            .values()
            .find(|meal| !meal.settled && meal.date == date && meal.restaurant == restaurant)
            .cloned())
    }

    fn list_meals(&self) -> Result<Vec<MealOverview>> {
        let mut overviews: Vec<MealOverview> = self
            .meals
            .values()
            .map(|meal| {
                let items: Vec<&Item> = self
                    .items
                    .values()
                    .filter(|item| item.meal_id == meal.id)
                    .collect();
                MealOverview {
                    meal: meal.clone(),
                    item_count: items.len(),
                    total: saturating_sum(items.iter().map(|item| item.amount)),
                }
            })
            .collect();

        overviews.sort_by(|a, b| {
            b.meal
                .date
                .cmp(&a.meal.date)
                .then_with(|| b.meal.id.cmp(&a.meal.id))
        });
        Ok(overviews)
    }

    fn delete_meal(&mut self, id: MealId) -> Result<()> {
        if self.meals.remove(&id).is_none() {
            return Err(LedgerError::MealNotFound(id));
        }
        self.items.retain(|_, item| item.meal_id != id);
        self.payments.retain(|_, payment| payment.meal_id != id);
        Ok(())
    }

    fn set_meal_settled(&mut self, id: MealId, settled: bool) -> Result<()> {
        let meal = self.meals.get_mut(&id).ok_or(LedgerError::MealNotFound(id))?;
        meal.settled = settled;
        Ok(())
    }

    fn settle_all_unsettled(&mut self) -> Result<usize> {
        let mut count = 0;
        for meal in self.meals.values_mut().filter(|meal| !meal.settled) {
            meal.settled = true;
            count += 1;
        }
        Ok(count)
    }

    fn add_item(&mut self, meal_id: MealId, item: NewItem) -> Result<Item> {
        let item = validate_new_item(item)?;
        self.require_meal(meal_id)?;

        if !item.shared {
            self.get_or_create_member(&item.person)?;
        }

        let stored = Item {
            id: self.allocate_id(),
            meal_id,
            person: item.person,
            description: item.description,
            amount: item.amount,
            shared: item.shared,
        };
        self.items.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn delete_item(&mut self, id: i64) -> Result<()> {
        self.items
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::NotFound { entity: "Item", id })
    }

    fn add_payment(&mut self, meal_id: MealId, person: &str, amount: Money) -> Result<Payment> {
        let amount = ensure_amount(amount)?;
        let person = validate_person(person)?;
        self.require_meal(meal_id)?;
        let member = self.get_or_create_member(&person)?;

        let payment = Payment {
            id: self.allocate_id(),
            meal_id,
            person: member.name,
            amount,
        };
        self.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    fn delete_payment(&mut self, id: i64) -> Result<()> {
        self.payments
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::NotFound { entity: "Payment", id })
    }

    fn cleanup_settled_before(&mut self, cutoff: NaiveDate) -> Result<usize> {
        let expired: Vec<MealId> = self
            .meals
            .values()
            .filter(|meal| meal.settled && meal.date < cutoff)
            .map(|meal| meal.id)
            .collect();

        for id in &expired {
            self.delete_meal(*id)?;
        }
        Ok(expired.len())
    }

    fn record_import_row(&mut self, hash: &str) -> Result<bool> {
        Ok(self.import_rows.insert(hash.to_string()))
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let checkpoint = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = checkpoint;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, day).unwrap()
    }

    #[test]
    fn test_add_item_creates_member_once() {
        let mut ledger = InMemoryLedger::new();
        let meal = ledger.create_meal("Sushi Go", date(1)).unwrap();

        ledger.add_item(meal.id, NewItem::personal("Alice", "Salmon", dec!(120))).unwrap();
        ledger.add_item(meal.id, NewItem::personal("Alice", "Tuna", dec!(90))).unwrap();
        ledger.add_item(meal.id, NewItem::shared("Edamame", dec!(60))).unwrap();

        let members = ledger.list_members().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Alice");
    }

    #[test]
    fn test_add_item_to_missing_meal() {
        let mut ledger = InMemoryLedger::new();

        let err = ledger
            .add_item(99, NewItem::personal("Alice", "Salmon", dec!(120)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::MealNotFound(99)));
        assert!(ledger.list_members().unwrap().is_empty());
    }

    #[test]
    fn test_delete_meal_cascades() {
        let mut ledger = InMemoryLedger::new();
        let meal = ledger.create_meal("Sushi Go", date(1)).unwrap();
        ledger.add_item(meal.id, NewItem::personal("Alice", "Salmon", dec!(120))).unwrap();
        ledger.add_payment(meal.id, "Bob", dec!(120)).unwrap();

        ledger.delete_meal(meal.id).unwrap();

        assert!(ledger.list_items(meal.id).unwrap().is_empty());
        assert!(ledger.list_payments(meal.id).unwrap().is_empty());
        assert!(ledger.get_meal(meal.id).unwrap().is_none());
    }

    #[test]
    fn test_list_meals_newest_first_with_totals() {
        let mut ledger = InMemoryLedger::new();
        let older = ledger.create_meal("Bagel Bros", date(1)).unwrap();
        let newer = ledger.create_meal("Pizza Planet", date(3)).unwrap();
        ledger.add_item(newer.id, NewItem::personal("Alice", "Slice", dec!(45))).unwrap();
        ledger.add_item(newer.id, NewItem::shared("Wings", dec!(80))).unwrap();

        let meals = ledger.list_meals().unwrap();

        assert_eq!(meals[0].meal.id, newer.id);
        assert_eq!(meals[0].item_count, 2);
        assert_eq!(meals[0].total, dec!(125));
        assert_eq!(meals[1].meal.id, older.id);
        assert_eq!(meals[1].item_count, 0);
    }

    #[test]
    fn test_settle_all_and_snapshot() {
        let mut ledger = InMemoryLedger::new();
        let a = ledger.create_meal("A", date(1)).unwrap();
        let b = ledger.create_meal("B", date(2)).unwrap();
        ledger.set_meal_settled(a.id, true).unwrap();

        assert_eq!(ledger.unsettled_snapshot().unwrap().len(), 1);
        assert_eq!(ledger.settle_all_unsettled().unwrap(), 1);
        assert!(ledger.unsettled_snapshot().unwrap().is_empty());

        ledger.set_meal_settled(b.id, false).unwrap();
        assert_eq!(ledger.list_unsettled_meals().unwrap(), vec![b.id]);
    }

    #[test]
    fn test_cleanup_only_removes_old_settled_meals() {
        let mut ledger = InMemoryLedger::new();
        let old_settled = ledger.create_meal("Old", date(1)).unwrap();
        let old_open = ledger.create_meal("Old open", date(2)).unwrap();
        let recent_settled = ledger.create_meal("Recent", date(20)).unwrap();
        ledger.set_meal_settled(old_settled.id, true).unwrap();
        ledger.set_meal_settled(recent_settled.id, true).unwrap();

        let deleted = ledger.cleanup_settled_before(date(10)).unwrap();

        assert_eq!(deleted, 1);
        assert!(ledger.get_meal(old_settled.id).unwrap().is_none());
        assert!(ledger.get_meal(old_open.id).unwrap().is_some());
        assert!(ledger.get_meal(recent_settled.id).unwrap().is_some());
    }

    #[test]
    fn test_restaurant_menu_cascade() {
        let mut ledger = InMemoryLedger::new();
        let meal = ledger.create_meal("Dim Sum Palace", date(5)).unwrap();
        let restaurant = ledger.get_or_create_restaurant("Dim Sum Palace").unwrap();
        assert_eq!(ledger.list_restaurants().unwrap().len(), 1);
        assert_eq!(meal.restaurant, restaurant.name);

        ledger.add_menu_item(restaurant.id, "Har gow", Some(dec!(58))).unwrap();
        ledger.add_menu_item(restaurant.id, "Tea", None).unwrap();
        assert_eq!(ledger.list_menu(Some(restaurant.id)).unwrap().len(), 2);

        ledger.delete_restaurant(restaurant.id).unwrap();
        assert!(ledger.list_menu(None).unwrap().is_empty());
    }

    #[test]
    fn test_record_import_row_is_idempotent() {
        let mut ledger = InMemoryLedger::new();

        assert!(ledger.record_import_row("abc").unwrap());
        assert!(!ledger.record_import_row("abc").unwrap());
    }

    #[test]
    fn test_negative_payment_rejected() {
        let mut ledger = InMemoryLedger::new();
        let meal = ledger.create_meal("A", date(1)).unwrap();

        assert!(ledger.add_payment(meal.id, "Bob", dec!(-5)).is_err());
        assert!(ledger.add_payment(meal.id, "  ", dec!(5)).is_err());
    }

    #[test]
    fn test_payment_bounds_and_reserved_payer() {
        let mut ledger = InMemoryLedger::new();
        let meal = ledger.create_meal("A", date(1)).unwrap();
        let huge = crate::money::from_f64(5e28).unwrap();

        assert!(matches!(
            ledger.add_payment(meal.id, "Bob", huge),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(ledger.add_payment(meal.id, "shared", dec!(10)).is_err());
        assert!(ledger.list_payments(meal.id).unwrap().is_empty());
        assert!(ledger.list_members().unwrap().is_empty());
    }

    #[test]
    fn test_find_unsettled_meal() {
        let mut ledger = InMemoryLedger::new();
        let settled = ledger.create_meal("Taco Stand", date(4)).unwrap();
        ledger.set_meal_settled(settled.id, true).unwrap();
        assert!(ledger.find_unsettled_meal("Taco Stand", date(4)).unwrap().is_none());

        let open = ledger.create_meal("Taco Stand", date(4)).unwrap();
        ledger.create_meal("Taco Stand", date(5)).unwrap();

        let found = ledger.find_unsettled_meal(" Taco Stand ", date(4)).unwrap().unwrap();
        assert_eq!(found.id, open.id);
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        let mut ledger = InMemoryLedger::new();

        let result: Result<()> = ledger.atomically(|ledger| {
            assert!(ledger.record_import_row("row-1")?);
            let meal = ledger.create_meal("Noodle Bar", date(6))?;
            ledger.add_item(meal.id, NewItem::personal("Alice", "Ramen", dec!(90)))?;
            Err(LedgerError::Validation("stop".to_string()))
        });

        assert!(result.is_err());
        assert!(ledger.list_meals().unwrap().is_empty());
        assert!(ledger.list_members().unwrap().is_empty());
        assert!(ledger.record_import_row("row-1").unwrap());
    }
}
