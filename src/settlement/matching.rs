// 🤝 Debt matching
//
// Greedy largest-debtor / largest-creditor pairing. Not the theoretical
// minimum number of transfers, but deterministic and usually close.
//
// Ordering: both sides are sorted by amount, descending, with a stable sort
// over the balance map's iteration order (ascending name). Equal amounts
// therefore resolve alphabetically.

use crate::money::{round_whole, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A suggested one-way payment from a debtor to a creditor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    /// Whole currency units
    pub amount: Money,
}

#[derive(Debug)]
struct Position<'a> {
    person: &'a str,
    remaining: Money,
}

/// Split balances into (debtors, creditors), each sorted largest first.
/// Debtors carry the absolute amount owed.
fn partition<'a>(
    balances: &'a BTreeMap<String, Money>,
    tolerance: Money,
) -> (Vec<Position<'a>>, Vec<Position<'a>>) {
    let mut debtors = Vec::new();
    let mut creditors = Vec::new();

    for (person, balance) in balances {
        if *balance < -tolerance {
            debtors.push(Position {
                person,
                remaining: -*balance,
            });
        } else if *balance > tolerance {
            creditors.push(Position {
                person,
                remaining: *balance,
            });
        }
    }

    // sort_by is stable
    debtors.sort_by(|a, b| b.remaining.cmp(&a.remaining));
    creditors.sort_by(|a, b| b.remaining.cmp(&a.remaining));

    (debtors, creditors)
}

fn exhausted(remaining: Money, tolerance: Money) -> bool {
    remaining < tolerance || remaining <= Decimal::ZERO
}

/// Pair debtors with creditors until either side runs out.
///
/// Each step moves `min(debtor, creditor)`; the emitted transfer is rounded
/// to whole units but the running remainders are not, so rounding never
/// compounds. Transfers that round to zero are dropped.
pub fn match_transfers(balances: &BTreeMap<String, Money>, tolerance: Money) -> Vec<Transfer> {
    match_with_residual(balances, tolerance).0
}

/// Same as `match_transfers`, also returning the rounding residual:
/// the sum of emitted (rounded) amounts minus the exact amounts matched.
pub fn match_with_residual(
    balances: &BTreeMap<String, Money>,
    tolerance: Money,
) -> (Vec<Transfer>, Money) {
    let (mut debtors, mut creditors) = partition(balances, tolerance);
    let mut transfers = Vec::new();
    let mut residual = Decimal::ZERO;

    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let amount = debtors[i].remaining.min(creditors[j].remaining);

        if amount > tolerance {
            let rounded = round_whole(amount);
            if rounded > Decimal::ZERO {
                transfers.push(Transfer {
                    from: debtors[i].person.to_string(),
                    to: creditors[j].person.to_string(),
                    amount: rounded,
                });
            }
            residual += rounded - amount;
        }

        debtors[i].remaining -= amount;
        creditors[j].remaining -= amount;

        if exhausted(debtors[i].remaining, tolerance) {
            i += 1;
        }
        if exhausted(creditors[j].remaining, tolerance) {
            j += 1;
        }
    }

    (transfers, residual)
}

/// Balances left after every transfer is carried out
pub fn apply_transfers(
    balances: &BTreeMap<String, Money>,
    transfers: &[Transfer],
) -> BTreeMap<String, Money> {
    let mut adjusted = balances.clone();
    for transfer in transfers {
        let from = adjusted.entry(transfer.from.clone()).or_default();
        *from = from.saturating_add(transfer.amount);
        let to = adjusted.entry(transfer.to.clone()).or_default();
        *to = to.saturating_sub(transfer.amount);
    }
    adjusted
}
