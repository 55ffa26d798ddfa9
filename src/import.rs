// 📥 CSV bulk import
//
// Columns: date,restaurant,kind,person,description,amount,shared
// kind is "item" or "payment". Rows with the same (date, restaurant) land in
// one meal, reusing an unsettled meal already in the ledger. Every row is
// hashed and recorded in the store, so importing the same file twice adds
// nothing the second time.
//
// The whole file is validated before anything is written, and the writes run
// in one store transaction: an import either lands completely or not at all.

use crate::error::{LedgerError, Result};
use crate::ledger::{validate_name, validate_new_item, validate_person, LedgerStore};
use crate::models::{MealId, NewItem};
use crate::money::{ensure_amount, parse_amount, Money};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Item,
    Payment,
}

impl RowKind {
    fn as_str(&self) -> &'static str {
        match self {
            RowKind::Item => "item",
            RowKind::Payment => "payment",
        }
    }
}

/// One CSV line as written by the user
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub date: String,
    pub restaurant: String,
    pub kind: RowKind,
    #[serde(default)]
    pub person: String,
    #[serde(default)]
    pub description: String,
    pub amount: String,
    #[serde(default)]
    pub shared: String,
}

impl ImportRow {
    /// SHA-256 over the row's normalized fields plus how many identical rows
    /// came before it in the same file
    pub fn idempotency_hash(&self, occurrence: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.date.trim(),
            self.restaurant.trim(),
            self.kind.as_str(),
            self.person.trim(),
            self.description.trim(),
            self.amount.trim(),
            self.is_shared(),
            occurrence
        ));
        format!("{:x}", hasher.finalize())
    }

    pub fn is_shared(&self) -> bool {
        matches!(
            self.shared.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y" | "x"
        )
    }

    fn parse_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| LedgerError::Validation(format!("invalid date '{}'", self.date)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub meals_created: usize,
    pub items_added: usize,
    pub payments_added: usize,
    pub duplicates_skipped: usize,
}

impl ImportSummary {
    pub fn rows_written(&self) -> usize {
        self.items_added + self.payments_added
    }
}

enum Entry {
    Item(NewItem),
    Payment { person: String, amount: Money },
}

/// A validated row, ready to write
struct PlannedRow {
    hash: String,
    date: NaiveDate,
    restaurant: String,
    entry: Entry,
}

/// Put the line number in front of a row's validation message
fn at_line(line: usize, err: LedgerError) -> LedgerError {
    match err {
        LedgerError::Validation(msg) => LedgerError::Validation(format!("line {}: {}", line, msg)),
        LedgerError::InvalidAmount(msg) => {
            LedgerError::InvalidAmount(format!("line {}: {}", line, msg))
        }
        other => other,
    }
}

fn parse_entry(row: &ImportRow) -> Result<Entry> {
    let amount = ensure_amount(parse_amount(&row.amount)?)?;

    match row.kind {
        RowKind::Item => {
            let item = if row.is_shared() {
                NewItem::shared(&row.description, amount)
            } else {
                NewItem::personal(&row.person, &row.description, amount)
            };
            Ok(Entry::Item(validate_new_item(item)?))
        }
        RowKind::Payment => Ok(Entry::Payment {
            person: validate_person(&row.person)?,
            amount,
        }),
    }
}

pub fn import_csv<S: LedgerStore>(store: &mut S, csv_path: &Path) -> Result<ImportSummary> {
    let rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(csv_path)?;
    info!(path = %csv_path.display(), "importing csv");
    import_rows(store, rdr)
}

pub fn import_reader<S: LedgerStore, R: Read>(store: &mut S, reader: R) -> Result<ImportSummary> {
    let rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    import_rows(store, rdr)
}

fn import_rows<S: LedgerStore, R: Read>(
    store: &mut S,
    rdr: csv::Reader<R>,
) -> Result<ImportSummary> {
    let rows = plan_rows(rdr)?;
    debug!(rows = rows.len(), "csv validated");

    let summary = store.atomically(move |store| write_rows(store, rows))?;

    if summary.duplicates_skipped > 0 {
        warn!(skipped = summary.duplicates_skipped, "rows already imported were skipped");
    }
    info!(
        meals = summary.meals_created,
        items = summary.items_added,
        payments = summary.payments_added,
        "import finished"
    );

    Ok(summary)
}

/// Parse and validate every row; nothing is written
fn plan_rows<R: Read>(mut rdr: csv::Reader<R>) -> Result<Vec<PlannedRow>> {
    let mut rows = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, result) in rdr.deserialize::<ImportRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = result?;

        let base_hash = row.idempotency_hash(0);
        let occurrence = seen.entry(base_hash).or_insert(0);
        let hash = row.idempotency_hash(*occurrence);
        *occurrence += 1;

        let date = row.parse_date().map_err(|e| at_line(line, e))?;
        let restaurant =
            validate_name("Restaurant", &row.restaurant).map_err(|e| at_line(line, e))?;
        let entry = parse_entry(&row).map_err(|e| at_line(line, e))?;

        rows.push(PlannedRow {
            hash,
            date,
            restaurant,
            entry,
        });
    }

    Ok(rows)
}

fn write_rows<S: LedgerStore>(store: &mut S, rows: Vec<PlannedRow>) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut meals: HashMap<(NaiveDate, String), MealId> = HashMap::new();

    for row in rows {
        if !store.record_import_row(&row.hash)? {
            debug!(hash = %row.hash, "duplicate row skipped");
            summary.duplicates_skipped += 1;
            continue;
        }

        let key = (row.date, row.restaurant);
        let meal_id = match meals.get(&key) {
            Some(id) => *id,
            None => {
                let id = match store.find_unsettled_meal(&key.1, key.0)? {
                    Some(meal) => {
                        debug!(meal_id = meal.id, "adding rows to existing meal");
                        meal.id
                    }
                    None => {
                        summary.meals_created += 1;
                        store.create_meal(&key.1, key.0)?.id
                    }
                };
                meals.insert(key, id);
                id
            }
        };

        match row.entry {
            Entry::Item(item) => {
                store.add_item(meal_id, item)?;
                summary.items_added += 1;
            }
            Entry::Payment { person, amount } => {
                store.add_payment(meal_id, &person, amount)?;
                summary.payments_added += 1;
            }
        }
    }

    Ok(summary)
}
