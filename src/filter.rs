//! Drop pregnancies that can't be used for the analysis.
use crate::{
    cohort::CohortTable,
    qc::{Bounds, ConflictCheck},
};
use qu::ick_use::*;
use term_data_table::{Cell, Row, Table};

pub const FINAL_SET_FILE: &str = "final_set.csv";
pub const FILTERED_SET_FILE: &str = "final_set_free_conflicts.csv";

/// How many rows each step removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCounts {
    pub original: usize,
    pub dropped_by_age: usize,
    pub after_age: usize,
    pub dropped_by_conflicts: usize,
    pub remaining: usize,
}

impl FilterCounts {
    pub fn term_table(&self) -> Table<'_> {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Step"))
                .with_cell(Cell::from("Rows")),
        );
        for (label, count) in [
            ("original", self.original),
            ("dropped: age missing or out of range", self.dropped_by_age),
            ("after age filter", self.after_age),
            ("dropped: abortive/delivery conflicts", self.dropped_by_conflicts),
            ("remaining", self.remaining),
        ] {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label))
                    .with_cell(Cell::from(count.to_string())),
            );
        }
        table
    }
}

/// Keep pregnancies with a plausible age, then drop those flagged as conflicting.
///
/// Conflicts are dropped one row at a time: other pregnancies of the same patient stay.
pub fn remove_flagged(table: &CohortTable, bounds: &Bounds) -> Result<(CohortTable, FilterCounts)> {
    // fails early if `c_abortive` is missing
    let check = ConflictCheck::new(table)?;

    let original = table.len();
    let aged = table.filter(|row| bounds.age_in_range(row.age));
    let after_age = aged.len();
    let kept = aged.filter(|row| !check.is_conflicted(row));

    let counts = FilterCounts {
        original,
        dropped_by_age: original - after_age,
        after_age,
        dropped_by_conflicts: after_age - kept.len(),
        remaining: kept.len(),
    };
    event!(Level::INFO, "original rows: {}", counts.original);
    event!(
        Level::INFO,
        "dropped {} rows with a missing or implausible age",
        counts.dropped_by_age
    );
    event!(Level::INFO, "rows after age filter: {}", counts.after_age);
    event!(
        Level::INFO,
        "dropped {} rows with conflicting outcomes",
        counts.dropped_by_conflicts
    );
    event!(Level::INFO, "final rows: {}", counts.remaining);
    Ok((kept, counts))
}
