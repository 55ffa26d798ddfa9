// ⚖️ Balance aggregation
//
// Folds unsettled meals into one signed balance per person:
//   balance = payments advanced - personal items - share of shared items
// Negative means the person owes into the pool, positive means they are owed.

use crate::models::MealSnapshot;
use crate::money::{saturating_sum, Money};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One (payer, amount) line of a meal summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub person: String,
    pub amount: Money,
}

/// Per-meal spending/payment overview for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealSummary {
    pub meal_id: i64,
    pub restaurant: String,
    pub date: NaiveDate,
    pub total_spent: Money,
    pub total_paid: Money,
    pub payments: Vec<PaymentLine>,
    /// Something was spent but nobody recorded paying for it
    pub missing_payer: bool,
    /// Shared items exist but no one ordered a personal item,
    /// so the shared cost is charged to nobody
    pub unattributed_shared: bool,
}

/// Balances plus the per-meal summaries produced along the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSheet {
    pub balances: BTreeMap<String, Money>,
    pub summaries: Vec<MealSummary>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one meal into the running balances and return its summary
    pub fn apply_meal(&mut self, snapshot: &MealSnapshot) -> &MealSummary {
        let meal = &snapshot.meal;

        let participants: BTreeSet<&str> =
            snapshot.items.iter().filter_map(|item| item.consumer()).collect();

        let shared_total = saturating_sum(
            snapshot
                .items
                .iter()
                .filter(|item| item.shared)
                .map(|item| item.amount),
        );
        let has_shared = snapshot.items.iter().any(|item| item.shared);

        let unattributed_shared = has_shared && participants.is_empty();
        if unattributed_shared {
            warn!(
                meal_id = meal.id,
                restaurant = %meal.restaurant,
                shared_total = %shared_total,
                "meal has shared items but no personal participants; shared cost is not attributed"
            );
        }

        // An empty participant set divides by one
        let participant_count = Decimal::from(participants.len().max(1));
        let shared_per_person = shared_total / participant_count;

        for item in &snapshot.items {
            if let Some(person) = item.consumer() {
                self.credit(person, -item.amount);
            }
        }

        for person in &participants {
            self.credit(person, -shared_per_person);
        }

        for payment in &snapshot.payments {
            self.credit(&payment.person, payment.amount);
        }

        let total_spent = snapshot.total_spent();
        let total_paid = snapshot.total_paid();

        debug!(
            meal_id = meal.id,
            participants = participants.len(),
            %total_spent,
            %total_paid,
            "meal folded into balances"
        );

        self.summaries.push(MealSummary {
            meal_id: meal.id,
            restaurant: meal.restaurant.clone(),
            date: meal.date,
            total_spent,
            total_paid,
            payments: snapshot
                .payments
                .iter()
                .map(|payment| PaymentLine {
                    person: payment.person.clone(),
                    amount: payment.amount,
                })
                .collect(),
            missing_payer: total_spent > Decimal::ZERO && snapshot.payments.is_empty(),
            unattributed_shared,
        });

        // Just pushed
        &self.summaries[self.summaries.len() - 1]
    }

    // Clamps instead of panicking; stored amounts are bounded by MAX_AMOUNT,
    // so only hand-built snapshots can get here
    fn credit(&mut self, person: &str, amount: Money) {
        let balance = self.balances.entry(person.to_string()).or_default();
        match balance.checked_add(amount) {
            Some(next) => *balance = next,
            None => {
                warn!(person, %amount, "balance overflowed; clamping");
                *balance = balance.saturating_add(amount);
            }
        }
    }
}

/// Aggregate balances over every unsettled meal in `meals`.
/// Settled meals are skipped.
pub fn aggregate(meals: &[MealSnapshot]) -> BalanceSheet {
    let mut sheet = BalanceSheet::new();

    for snapshot in meals {
        if snapshot.meal.settled {
            debug!(meal_id = snapshot.meal.id, "skipping settled meal");
            continue;
        }
        sheet.apply_meal(snapshot);
    }

    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, Meal, Payment, SHARED_CONSUMER};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct MealBuilder {
        snapshot: MealSnapshot,
        next_id: i64,
    }

    impl MealBuilder {
        fn new(id: i64) -> Self {
            Self {
                snapshot: MealSnapshot::new(
                    Meal {
                        id,
                        restaurant: format!("Restaurant {}", id),
                        date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
                        settled: false,
                        created_at: Utc::now(),
                    },
                    Vec::new(),
                    Vec::new(),
                ),
                next_id: 1,
            }
        }

        fn item(mut self, person: &str, amount: Money) -> Self {
            self.snapshot.items.push(Item {
                id: self.next_id,
                meal_id: self.snapshot.meal.id,
                person: person.to_string(),
                description: "dish".to_string(),
                amount,
                shared: false,
            });
            self.next_id += 1;
            self
        }

        fn shared(mut self, amount: Money) -> Self {
            self.snapshot.items.push(Item {
                id: self.next_id,
                meal_id: self.snapshot.meal.id,
                person: SHARED_CONSUMER.to_string(),
                description: "shared dish".to_string(),
                amount,
                shared: true,
            });
            self.next_id += 1;
            self
        }

        fn paid(mut self, person: &str, amount: Money) -> Self {
            self.snapshot.payments.push(Payment {
                id: self.next_id,
                meal_id: self.snapshot.meal.id,
                person: person.to_string(),
                amount,
            });
            self.next_id += 1;
            self
        }

        fn settled(mut self) -> Self {
            self.snapshot.meal.settled = true;
            self
        }

        fn build(self) -> MealSnapshot {
            self.snapshot
        }
    }

    #[test]
    fn test_personal_items_and_payment() {
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(300))
            .paid("Bob", dec!(300))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Alice"], dec!(-300));
        assert_eq!(sheet.balances["Bob"], dec!(300));
    }

    #[test]
    fn test_conservation_without_shared_items() {
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(120.5))
            .item("Bob", dec!(80))
            .item("Alice", dec!(15))
            .paid("Carol", dec!(150))
            .paid("Bob", dec!(40))
            .build();

        let expected = meal.total_paid() - meal.total_spent();
        let sheet = aggregate(&[meal]);
        let sum: Money = sheet.balances.values().copied().sum();

        assert_eq!(sum, expected);
        assert_eq!(sum, dec!(-25.5));
    }

    #[test]
    fn test_shared_cost_even_split() {
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(0))
            .item("Bob", dec!(0))
            .item("Carol", dec!(0))
            .shared(dec!(300))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Alice"], dec!(-100));
        assert_eq!(sheet.balances["Bob"], dec!(-100));
        assert_eq!(sheet.balances["Carol"], dec!(-100));
    }

    #[test]
    fn test_shared_cost_counts_distinct_participants() {
        // Alice ordered twice but is one participant
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(50))
            .item("Alice", dec!(30))
            .item("Bob", dec!(40))
            .shared(dec!(100))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Alice"], dec!(-130));
        assert_eq!(sheet.balances["Bob"], dec!(-90));
    }

    #[test]
    fn test_shared_cost_skips_payers_who_did_not_eat() {
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(100))
            .shared(dec!(60))
            .paid("Dave", dec!(160))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Alice"], dec!(-160));
        assert_eq!(sheet.balances["Dave"], dec!(160));
    }

    #[test]
    fn test_single_participant_pays_own_shared_meal() {
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(100))
            .shared(dec!(60))
            .paid("Alice", dec!(160))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Alice"], dec!(0));
        assert!(!sheet.summaries[0].unattributed_shared);
    }

    #[test]
    fn test_shared_without_participants_is_flagged_not_charged() {
        let meal = MealBuilder::new(1)
            .shared(dec!(90))
            .paid("Bob", dec!(90))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances.len(), 1);
        assert_eq!(sheet.balances["Bob"], dec!(90));
        assert!(sheet.summaries[0].unattributed_shared);
    }

    #[test]
    fn test_balances_accumulate_across_meals() {
        let meal_c = MealBuilder::new(1)
            .item("Alice", dec!(200))
            .paid("Bob", dec!(200))
            .build();
        let meal_d = MealBuilder::new(2)
            .item("Bob", dec!(50))
            .paid("Carol", dec!(50))
            .build();

        let sheet = aggregate(&[meal_c, meal_d]);

        assert_eq!(sheet.balances["Alice"], dec!(-200));
        assert_eq!(sheet.balances["Bob"], dec!(150));
        assert_eq!(sheet.balances["Carol"], dec!(50));
        assert_eq!(sheet.summaries.len(), 2);
    }

    #[test]
    fn test_settled_meals_are_ignored() {
        let open = MealBuilder::new(1)
            .item("Alice", dec!(100))
            .paid("Bob", dec!(100))
            .build();
        let closed = MealBuilder::new(2)
            .item("Bob", dec!(500))
            .paid("Alice", dec!(500))
            .settled()
            .build();

        let sheet = aggregate(&[open, closed]);

        assert_eq!(sheet.balances["Alice"], dec!(-100));
        assert_eq!(sheet.balances["Bob"], dec!(100));
        assert_eq!(sheet.summaries.len(), 1);
    }

    #[test]
    fn test_summary_flags_missing_payer() {
        let unpaid = MealBuilder::new(1).item("Alice", dec!(75)).build();
        let payment_only = MealBuilder::new(2).paid("Bob", dec!(40)).build();

        let sheet = aggregate(&[unpaid, payment_only]);

        let first = &sheet.summaries[0];
        assert!(first.missing_payer);
        assert_eq!(first.total_spent, dec!(75));
        assert!(first.payments.is_empty());

        let second = &sheet.summaries[1];
        assert!(!second.missing_payer);
        assert_eq!(second.total_spent, dec!(0));
        assert_eq!(second.total_paid, dec!(40));
        assert_eq!(
            second.payments,
            vec![PaymentLine {
                person: "Bob".to_string(),
                amount: dec!(40)
            }]
        );
    }

    #[test]
    fn test_huge_payments_clamp_instead_of_panicking() {
        let huge = crate::money::from_f64(5e28).unwrap();
        let meal = MealBuilder::new(1)
            .item("Alice", dec!(10))
            .paid("Bob", huge)
            .paid("Bob", huge)
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["Bob"], Decimal::MAX);
        assert_eq!(sheet.balances["Alice"], dec!(-10));
        assert_eq!(sheet.summaries[0].total_paid, Decimal::MAX);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let meal = MealBuilder::new(1)
            .item("alice", dec!(10))
            .paid("Alice", dec!(10))
            .build();

        let sheet = aggregate(&[meal]);

        assert_eq!(sheet.balances["alice"], dec!(-10));
        assert_eq!(sheet.balances["Alice"], dec!(10));
    }
}
