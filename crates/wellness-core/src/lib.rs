use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_MAX_STATES: usize = 50_000_000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PlannerError {
    #[error("invalid key: field `{field}` is missing or not a finite number on record {index}")]
    InvalidKey { field: String, index: usize },
    #[error("invalid budget: {0} is negative")]
    InvalidBudget(i64),
    #[error("duplicate catalog label: {0}")]
    DuplicateLabel(String),
    #[error("resource limit exceeded: {states} selection states exceed the limit of {limit}")]
    ResourceLimitExceeded { states: u128, limit: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            Self::Descending
        } else {
            Self::Ascending
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }

    /// Whether the front of the left run goes first. Ties go left.
    fn keeps_left(self, left: f64, right: f64) -> bool {
        match self {
            Self::Ascending => left <= right,
            Self::Descending => left >= right,
        }
    }
}

impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subject row: an insertion-ordered mapping from field name to value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64).filter(|value| value.is_finite())
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Numeric lookup used by [`rank`]. Any collection element that can name a
/// numeric field can be ranked.
pub trait RankKey {
    fn rank_key(&self, field: &str) -> Option<f64>;
}

impl RankKey for Record {
    fn rank_key(&self, field: &str) -> Option<f64> {
        self.number(field)
    }
}

impl RankKey for Map<String, Value> {
    fn rank_key(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }
}

impl<T: RankKey + ?Sized> RankKey for &T {
    fn rank_key(&self, field: &str) -> Option<f64> {
        (**self).rank_key(field)
    }
}

struct Keyed<'a, T> {
    key: f64,
    record: &'a T,
}

/// Order records by a numeric field with a stable merge sort.
///
/// The result borrows every input record exactly once. Records with equal
/// keys keep their input order in both directions.
///
/// # Errors
/// Returns [`PlannerError::InvalidKey`] for the first record whose `field` is
/// absent, non-numeric, or not finite. Nothing is ordered in that case.
pub fn rank<'a, T: RankKey>(
    records: &'a [T],
    field: &str,
    direction: SortDirection,
) -> Result<Vec<&'a T>, PlannerError> {
    let keyed = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record
                .rank_key(field)
                .filter(|key| key.is_finite())
                .map(|key| Keyed { key, record })
                .ok_or_else(|| PlannerError::InvalidKey { field: field.to_string(), index })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(merge_sort(keyed, direction).into_iter().map(|entry| entry.record).collect())
}

fn merge_sort<T>(mut entries: Vec<Keyed<'_, T>>, direction: SortDirection) -> Vec<Keyed<'_, T>> {
    if entries.len() <= 1 {
        return entries;
    }

    let right = entries.split_off(entries.len() / 2);
    let left = merge_sort(entries, direction);
    let right = merge_sort(right, direction);
    merge(left, right, direction)
}

fn merge<'a, T>(
    left: Vec<Keyed<'a, T>>,
    right: Vec<Keyed<'a, T>>,
    direction: SortDirection,
) -> Vec<Keyed<'a, T>> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    while let (Some(lhs), Some(rhs)) =
        (left.peek().map(|entry| entry.key), right.peek().map(|entry| entry.key))
    {
        let next = if direction.keeps_left(lhs, rhs) { left.next() } else { right.next() };
        merged.extend(next);
    }

    merged.extend(left);
    merged.extend(right);
    merged
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct CandidateItem {
    pub label: String,
    pub cost: u64,
    pub benefit: u64,
}

impl CandidateItem {
    #[must_use]
    pub fn new(label: impl Into<String>, cost: u64, benefit: u64) -> Self {
        Self { label: label.into(), cost, benefit }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct SelectionResult {
    pub total_benefit: u64,
    pub total_cost: u64,
    /// Chosen labels in catalog order.
    pub selected_labels: Vec<String>,
}

impl SelectionResult {
    /// Map the selected labels back onto catalog entries.
    #[must_use]
    pub fn resolve<'a>(&self, catalog: &'a [CandidateItem]) -> Vec<&'a CandidateItem> {
        self.selected_labels
            .iter()
            .filter_map(|label| catalog.iter().find(|item| &item.label == label))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResourceLimits {
    pub max_states: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { max_states: DEFAULT_MAX_STATES }
    }
}

/// The intervention catalog the planner ships with.
#[must_use]
pub fn reference_catalog() -> Vec<CandidateItem> {
    vec![
        CandidateItem::new("Time Management Workshop", 1200, 15),
        CandidateItem::new("Therapy Sessions (Package)", 3000, 40),
        CandidateItem::new("Meditation App Subscription", 800, 10),
        CandidateItem::new("Yoga Classes (Monthly)", 1500, 20),
        CandidateItem::new("Ergonomic Consulting", 2000, 25),
        CandidateItem::new("Premium Mental Health Plan", 4000, 60),
    ]
}

/// Pick the catalog subset with the highest total benefit whose total cost
/// fits in `budget`, using the default [`ResourceLimits`].
///
/// # Errors
/// See [`optimize_selection_with_limits`].
pub fn optimize_selection(
    catalog: &[CandidateItem],
    budget: i64,
) -> Result<SelectionResult, PlannerError> {
    optimize_selection_with_limits(catalog, budget, &ResourceLimits::default())
}

/// 0/1 knapsack over `catalog`. Each item is taken whole or not at all.
///
/// When including an item ties with excluding it, the item is excluded.
///
/// # Errors
/// Returns [`PlannerError::InvalidBudget`] for a negative budget,
/// [`PlannerError::DuplicateLabel`] when two items share a label, and
/// [`PlannerError::ResourceLimitExceeded`] when the selection table would hold
/// more than `limits.max_states` states.
pub fn optimize_selection_with_limits(
    catalog: &[CandidateItem],
    budget: i64,
    limits: &ResourceLimits,
) -> Result<SelectionResult, PlannerError> {
    if budget < 0 {
        return Err(PlannerError::InvalidBudget(budget));
    }
    ensure_unique_labels(catalog)?;

    let budget = budget.unsigned_abs();
    if catalog.is_empty() || budget == 0 {
        return Ok(SelectionResult::default());
    }

    let table = SelectionTable::fill(catalog, budget, limits)?;
    Ok(table.reconstruct(catalog))
}

fn ensure_unique_labels(catalog: &[CandidateItem]) -> Result<(), PlannerError> {
    let mut seen = BTreeSet::new();
    for item in catalog {
        if !seen.insert(item.label.as_str()) {
            return Err(PlannerError::DuplicateLabel(item.label.clone()));
        }
    }
    Ok(())
}

fn gcd(mut lhs: u64, mut rhs: u64) -> u64 {
    while rhs != 0 {
        (lhs, rhs) = (rhs, lhs % rhs);
    }
    lhs
}

fn widen(value: usize) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

/// Zero-filled table of `cells` entries, or `None` when the allocator refuses.
fn allocate<T: Clone>(cells: usize, fill: T) -> Option<Vec<T>> {
    let mut table = Vec::new();
    table.try_reserve_exact(cells).ok()?;
    table.resize(cells, fill);
    Some(table)
}

/// Bottom-up selection table. Row `i` covers the first `i` items, column `b`
/// is the remaining capacity in units of `unit`.
struct SelectionTable {
    unit: u64,
    width: usize,
    rows: usize,
    best: Vec<u64>,
    taken: Vec<bool>,
}

impl SelectionTable {
    fn fill(
        catalog: &[CandidateItem],
        budget: u64,
        limits: &ResourceLimits,
    ) -> Result<Self, PlannerError> {
        let total_cost = catalog.iter().fold(0_u64, |sum, item| sum.saturating_add(item.cost));
        let unit = match catalog.iter().map(|item| item.cost).fold(0, gcd) {
            0 => 1,
            unit => unit,
        };
        let capacity = budget.min(total_cost) / unit;

        let states = (widen(catalog.len()) + 1) * (u128::from(capacity) + 1);
        let exceeded = || PlannerError::ResourceLimitExceeded { states, limit: limits.max_states };
        if states > widen(limits.max_states) {
            return Err(exceeded());
        }
        let width = usize::try_from(capacity + 1).map_err(|_| exceeded())?;
        let cells = usize::try_from(states).map_err(|_| exceeded())?;

        let mut best = allocate(cells, 0_u64).ok_or_else(exceeded)?;
        let mut taken = allocate(cells, false).ok_or_else(exceeded)?;
        for (row, item) in catalog.iter().enumerate() {
            let previous = row * width;
            let current = previous + width;
            let weight = usize::try_from(item.cost / unit).ok();

            for column in 0..width {
                let exclude = best[previous + column];
                best[current + column] = exclude;

                let Some(weight) = weight.filter(|weight| *weight <= column) else {
                    continue;
                };
                let include = best[previous + column - weight].saturating_add(item.benefit);
                if include > exclude {
                    best[current + column] = include;
                    taken[current + column] = true;
                }
            }
        }

        tracing::debug!(
            items = catalog.len(),
            budget,
            unit,
            capacity,
            states = cells,
            "filled selection table"
        );

        Ok(Self { unit, width, rows: catalog.len() + 1, best, taken })
    }

    fn reconstruct(&self, catalog: &[CandidateItem]) -> SelectionResult {
        let mut column = self.width - 1;
        let total_benefit = self.best[(self.rows - 1) * self.width + column];

        let mut chosen = Vec::new();
        for row in (1..self.rows).rev() {
            if !self.taken[row * self.width + column] {
                continue;
            }
            let item = &catalog[row - 1];
            // A taken cell always had room for the item's weight.
            column -= usize::try_from(item.cost / self.unit).unwrap_or(column);
            chosen.push(item);
        }
        chosen.reverse();

        SelectionResult {
            total_benefit,
            total_cost: chosen.iter().map(|item| item.cost).sum(),
            selected_labels: chosen.into_iter().map(|item| item.label.clone()).collect(),
        }
    }
}
