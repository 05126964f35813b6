//! Quality control reports.
//!
//! Nothing here changes the data: findings are written out (one csv per finding, plus a json
//! summary of counts) for someone to look at.
use crate::{
    cohort::{key_counts, CohortRow, CohortTable},
    conditions::{conflict_columns, ABORTIVE},
    config::QcConfig,
    episode::Window,
    save_csv, PatientId, Range, Visit, Visits,
};
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs, io,
    path::Path,
};
use term_data_table::{Cell, Row, Table};

pub const VISIT_COMPLETENESS_FILE: &str = "qc_pregvisit_completeness_fail.csv";
pub const VISIT_AGE_FILE: &str = "qc_pregvisit_age_oob_rows.csv";
pub const VISIT_AGE_PATIENTS_FILE: &str = "qc_pregvisit_age_oob_patients_all_rows.csv";
pub const VISIT_DATE_FILE: &str = "qc_pregvisit_date_window_violations.csv";
pub const VISIT_SUMMARY_FILE: &str = "qc_pregvisit_summary.json";

pub const PREGNANCY_COMPLETENESS_FILE: &str = "qc_pregnancy_completeness_fail.csv";
pub const PREGNANCY_AGE_FILE: &str = "qc_pregnancy_age_oob_rows.csv";
pub const PREGNANCY_AGE_PATIENTS_FILE: &str = "qc_pregnancy_age_oob_patients_all_rows.csv";
pub const PREGNANCY_DUPLICATES_FILE: &str = "qc_pregnancy_duplicates_rows.csv";
pub const PREGNANCY_DUPLICATES_SUMMARY_FILE: &str = "qc_pregnancy_duplicates_summary.csv";
pub const PREGNANCY_CONFLICTS_FILE: &str = "qc_final_validation.csv";
pub const PREGNANCY_SUMMARY_FILE: &str = "qc_pregnancy_summary.json";

/// Plausibility bounds, shared by the reports and the filter.
#[derive(Debug, Clone)]
pub struct Bounds {
    pub ages: Range<i32>,
    pub dates: Range<NaiveDate>,
}

impl Bounds {
    pub fn new(qc: &QcConfig) -> Result<Self> {
        Ok(Self {
            ages: qc.age_range()?,
            dates: qc.date_range()?,
        })
    }

    /// Known and outside the plausible range. A missing age is not out of range.
    pub fn age_out_of_range(&self, age: Option<i32>) -> bool {
        matches!(age, Some(age) if !self.ages.contains(&age))
    }

    /// Known and within the plausible range.
    pub fn age_in_range(&self, age: Option<i32>) -> bool {
        self.ages.contains_opt(age.as_ref())
    }

    fn date_out_of_range(&self, date: Option<NaiveDate>) -> bool {
        matches!(date, Some(date) if !self.dates.contains(&date))
    }
}

/// Rows of those patients that have any of `rows`.
fn all_patient_rows<T>(
    items: &[T],
    rows: &[usize],
    patient: impl Fn(&T) -> Option<PatientId>,
) -> Vec<usize> {
    let patients: BTreeSet<PatientId> = rows.iter().filter_map(|idx| patient(&items[*idx])).collect();
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| matches!(patient(item), Some(id) if patients.contains(&id)))
        .map(|(idx, _)| idx)
        .collect()
}

// Visit level

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitQcSummary {
    pub rows_total: usize,
    pub completeness_fail: usize,
    pub age_out_of_range: usize,
    pub temporal_out_of_range: usize,
}

/// Indices (into the visit table) of rows with each problem.
#[derive(Debug, Clone)]
pub struct VisitQc {
    pub rows_total: usize,
    pub completeness_fail: Vec<usize>,
    pub age_out_of_range: Vec<usize>,
    pub age_out_of_range_patients: Vec<usize>,
    pub temporal_out_of_range: Vec<usize>,
}

impl VisitQc {
    pub fn run(visits: &Visits, bounds: &Bounds) -> Self {
        let indices = |f: &dyn Fn(&Visit) -> bool| -> Vec<usize> {
            visits
                .iter()
                .enumerate()
                .filter(|(_, v)| f(v))
                .map(|(idx, _)| idx)
                .collect()
        };
        let completeness_fail = indices(&|v| {
            v.patient_id.is_none()
                || v.clinical_date().is_none()
                || v.age.is_none()
                || v.age_risk.is_none()
                || v.dom.is_none()
                || v.subsid.is_none()
                || v.all_diagnoses_missing()
        });
        let age_out_of_range = indices(&|v| bounds.age_out_of_range(v.age));
        let age_out_of_range_patients =
            all_patient_rows(&visits[..], &age_out_of_range, |v: &Visit| v.patient_id);
        let temporal_out_of_range = indices(&|v| {
            bounds.date_out_of_range(v.clinical_date())
                || bounds.date_out_of_range(v.episode_start)
                || bounds.date_out_of_range(v.termination)
        });
        let qc = Self {
            rows_total: visits.len(),
            completeness_fail,
            age_out_of_range,
            age_out_of_range_patients,
            temporal_out_of_range,
        };
        event!(Level::INFO, "visit quality control: {:?}", qc.summary());
        qc
    }

    pub fn summary(&self) -> VisitQcSummary {
        VisitQcSummary {
            rows_total: self.rows_total,
            completeness_fail: self.completeness_fail.len(),
            age_out_of_range: self.age_out_of_range.len(),
            temporal_out_of_range: self.temporal_out_of_range.len(),
        }
    }

    pub fn save(&self, visits: &Visits, dir: &Path) -> Result {
        visits.save_table_rows(&self.completeness_fail, dir.join(VISIT_COMPLETENESS_FILE))?;
        visits.save_table_rows(&self.age_out_of_range, dir.join(VISIT_AGE_FILE))?;
        visits.save_table_rows(
            &self.age_out_of_range_patients,
            dir.join(VISIT_AGE_PATIENTS_FILE),
        )?;
        visits.save_table_rows(&self.temporal_out_of_range, dir.join(VISIT_DATE_FILE))?;
        save_json(&self.summary(), dir.join(VISIT_SUMMARY_FILE))
    }

    pub fn term_table(&self) -> Table<'_> {
        counts_table(&[
            ("rows", self.rows_total),
            ("incomplete", self.completeness_fail.len()),
            ("age out of range", self.age_out_of_range.len()),
            (
                "rows of patients with an age out of range",
                self.age_out_of_range_patients.len(),
            ),
            ("dates outside study period", self.temporal_out_of_range.len()),
        ])
    }
}

// Pregnancy level

/// Finds pregnancies that ended abortively but also have delivery or labour complications
/// during the pregnancy.
#[derive(Debug, Clone)]
pub struct ConflictCheck {
    abortive: usize,
    conflicts: Vec<usize>,
}

impl ConflictCheck {
    /// Fails if the table has no `c_abortive` column. Conflict columns that aren't in the table
    /// are skipped.
    pub fn new(table: &CohortTable) -> Result<Self> {
        let abortive_column = Window::During.column(ABORTIVE);
        let abortive = table
            .flag_index(&abortive_column)
            .with_context(|| format!("column `{}` is required", abortive_column))?;
        let conflicts: Vec<usize> = conflict_columns()
            .filter_map(|column| table.flag_index(&column))
            .collect();
        event!(
            Level::DEBUG,
            "checking {} conflict columns",
            conflicts.len()
        );
        Ok(Self {
            abortive,
            conflicts,
        })
    }

    /// Missing conflict flags count as 0.
    pub fn is_conflicted(&self, row: &CohortRow) -> bool {
        row.flags[self.abortive] == Some(1)
            && self
                .conflicts
                .iter()
                .map(|idx| u32::from(row.flags[*idx].unwrap_or(0)))
                .sum::<u32>()
                > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PregnancyQcSummary {
    pub rows_total: usize,
    pub completeness_fail: usize,
    pub age_out_of_range: usize,
    pub duplicate_pstv01_npreg_keys: usize,
    pub validation_conflicts: usize,
}

/// A (patient, pregnancy order) key that appears more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateKey {
    #[serde(rename = "PSTV01")]
    pub patient_id: Option<PatientId>,
    pub n_preg: Option<u32>,
    pub dup_count: usize,
}

#[derive(Debug, Clone)]
pub struct PregnancyQc {
    pub rows_total: usize,
    pub completeness_fail: Vec<usize>,
    pub age_out_of_range: Vec<usize>,
    pub age_out_of_range_patients: Vec<usize>,
    pub duplicate_rows: Vec<usize>,
    /// Most repeated first.
    pub duplicate_keys: Vec<DuplicateKey>,
    pub conflicts: Vec<usize>,
}

impl PregnancyQc {
    pub fn run(table: &CohortTable, bounds: &Bounds) -> Result<Self> {
        let check = ConflictCheck::new(table)?;
        let indices = |f: &dyn Fn(&CohortRow) -> bool| -> Vec<usize> {
            table
                .iter()
                .enumerate()
                .filter(|(_, row)| f(row))
                .map(|(idx, _)| idx)
                .collect()
        };

        // a table without flag columns fails every row
        let completeness_fail =
            indices(&|row| row.demographics_missing() || row.flags.iter().all(Option::is_none));
        let age_out_of_range = indices(&|row| bounds.age_out_of_range(row.age));
        let age_out_of_range_patients =
            all_patient_rows(&table[..], &age_out_of_range, |row: &CohortRow| row.patient_id);

        let counts = key_counts(table);
        let duplicate_rows = indices(&|row| counts[&(row.patient_id, row.n_preg)] > 1);
        let mut duplicate_keys: Vec<DuplicateKey> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((patient_id, n_preg), dup_count)| DuplicateKey {
                patient_id,
                n_preg,
                dup_count,
            })
            .collect();
        duplicate_keys.sort_by(|a, b| {
            b.dup_count
                .cmp(&a.dup_count)
                .then_with(|| (a.patient_id, a.n_preg).cmp(&(b.patient_id, b.n_preg)))
        });
        if !duplicate_keys.is_empty() {
            event!(
                Level::WARN,
                "{} (patient, n_preg) keys appear more than once ({} rows)",
                duplicate_keys.len(),
                duplicate_rows.len()
            );
        }

        let conflicts = indices(&|row| check.is_conflicted(row));
        let qc = Self {
            rows_total: table.len(),
            completeness_fail,
            age_out_of_range,
            age_out_of_range_patients,
            duplicate_rows,
            duplicate_keys,
            conflicts,
        };
        event!(Level::INFO, "pregnancy quality control: {:?}", qc.summary());
        Ok(qc)
    }

    pub fn summary(&self) -> PregnancyQcSummary {
        PregnancyQcSummary {
            rows_total: self.rows_total,
            completeness_fail: self.completeness_fail.len(),
            age_out_of_range: self.age_out_of_range.len(),
            duplicate_pstv01_npreg_keys: self.duplicate_keys.len(),
            validation_conflicts: self.conflicts.len(),
        }
    }

    pub fn save(&self, table: &CohortTable, dir: &Path) -> Result {
        let subset = |idxs: &[usize]| {
            CohortTable::new(
                table.flag_columns().to_vec(),
                idxs.iter().map(|idx| table[*idx].clone()).collect(),
            )
        };
        subset(&self.completeness_fail)?.save(dir.join(PREGNANCY_COMPLETENESS_FILE))?;
        subset(&self.age_out_of_range)?.save(dir.join(PREGNANCY_AGE_FILE))?;
        subset(&self.age_out_of_range_patients)?.save(dir.join(PREGNANCY_AGE_PATIENTS_FILE))?;
        subset(&self.duplicate_rows)?.save(dir.join(PREGNANCY_DUPLICATES_FILE))?;
        save_csv(
            self.duplicate_keys.iter(),
            dir.join(PREGNANCY_DUPLICATES_SUMMARY_FILE),
        )?;
        subset(&self.conflicts)?.save(dir.join(PREGNANCY_CONFLICTS_FILE))?;
        save_json(&self.summary(), dir.join(PREGNANCY_SUMMARY_FILE))
    }

    pub fn term_table(&self) -> Table<'_> {
        counts_table(&[
            ("rows", self.rows_total),
            ("incomplete", self.completeness_fail.len()),
            ("age out of range", self.age_out_of_range.len()),
            (
                "rows of patients with an age out of range",
                self.age_out_of_range_patients.len(),
            ),
            ("repeated (patient, n_preg) keys", self.duplicate_keys.len()),
            ("abortive/delivery conflicts", self.conflicts.len()),
        ])
    }
}

fn counts_table<'a>(rows: &[(&'a str, usize)]) -> Table<'a> {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Check"))
            .with_cell(Cell::from("Rows")),
    );
    for (label, count) in rows {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label.to_string()))
                .with_cell(Cell::from(count.to_string())),
        );
    }
    table
}

fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(value: &T, path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = io::BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer_pretty(out, value)?;
        Ok(())
    }
    let path = path.as_ref();
    inner(value, path).with_context(|| format!("unable to save summary to \"{}\"", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Source;

    fn bounds() -> Bounds {
        Bounds::new(&QcConfig::default()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn visit(patient_id: Option<PatientId>, age: Option<i32>, when: Option<NaiveDate>) -> Visit {
        Visit {
            patient_id,
            source: Source::PrimaryCare,
            primary_care_date: when,
            hospital_date: None,
            diagnoses: [Some("Z34".into()), None, None, None],
            age,
            age_risk: crate::age_risk(age),
            dom: Some(0),
            subsid: Some(1),
            n_preg: None,
            termination: None,
            episode_start: None,
            outcome: None,
        }
    }

    #[test]
    fn visit_checks() {
        let mut late = visit(Some(4), Some(30), date(2020, 1, 1));
        late.episode_start = date(2014, 12, 31);
        let visits = Visits::new(vec![
            visit(Some(1), Some(30), date(2020, 1, 1)),
            visit(None, Some(30), date(2020, 1, 1)),
            visit(Some(2), Some(60), date(2020, 1, 1)),
            visit(Some(2), Some(40), date(2021, 1, 1)),
            visit(Some(3), None, date(2024, 1, 1)),
            late,
        ]);
        let qc = VisitQc::run(&visits, &bounds());
        assert_eq!(qc.completeness_fail, [1, 4]);
        assert_eq!(qc.age_out_of_range, [2]);
        assert_eq!(qc.age_out_of_range_patients, [2, 3]);
        assert_eq!(qc.temporal_out_of_range, [4, 5]);
        assert_eq!(
            qc.summary(),
            VisitQcSummary {
                rows_total: 6,
                completeness_fail: 2,
                age_out_of_range: 1,
                temporal_out_of_range: 2,
            }
        );

        let dir = tempfile::tempdir().unwrap();
        qc.save(&visits, dir.path()).unwrap();
        let summary: VisitQcSummary = serde_json::from_str(
            &fs::read_to_string(dir.path().join(VISIT_SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(summary, qc.summary());
        let reloaded = Visits::load_table(dir.path().join(VISIT_AGE_PATIENTS_FILE)).unwrap();
        assert_eq!(reloaded.len(), 2);

        let printed = qc.term_table().to_string();
        assert!(printed.contains("incomplete"));
    }

    fn row(patient_id: u64, n_preg: u32, age: i32, flags: Vec<Option<u8>>) -> CohortRow {
        CohortRow {
            patient_id: Some(patient_id),
            subsid: Some(0),
            age: Some(age),
            dom: Some(1),
            age_risk: Some(0),
            n_preg: Some(n_preg),
            ref_year: Some(2020),
            flags,
        }
    }

    #[test]
    fn pregnancy_checks() {
        let columns = vec!["c_abortive".into(), "c_normal".into(), "c_pph".into()];
        let table = CohortTable::new(
            columns,
            vec![
                row(1, 1, 30, vec![Some(1), Some(1), None]),
                row(1, 1, 30, vec![Some(1), Some(0), None]),
                row(2, 1, 11, vec![Some(0), Some(1), Some(1)]),
                row(2, 2, 13, vec![Some(1), None, Some(1)]),
                row(3, 1, 25, vec![None, None, None]),
            ],
        )
        .unwrap();
        let qc = PregnancyQc::run(&table, &bounds()).unwrap();
        assert_eq!(qc.completeness_fail, [4]);
        assert_eq!(qc.age_out_of_range, [2]);
        assert_eq!(qc.age_out_of_range_patients, [2, 3]);
        assert_eq!(qc.duplicate_rows, [0, 1]);
        assert_eq!(
            qc.duplicate_keys,
            [DuplicateKey {
                patient_id: Some(1),
                n_preg: Some(1),
                dup_count: 2
            }]
        );
        assert_eq!(qc.conflicts, [0, 3]);

        let dir = tempfile::tempdir().unwrap();
        qc.save(&table, dir.path()).unwrap();
        let conflicts = CohortTable::load(dir.path().join(PREGNANCY_CONFLICTS_FILE)).unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[1].n_preg, Some(2));

        let printed = qc.term_table().to_string();
        assert!(printed.contains("Check"));
    }

    #[test]
    fn abortive_column_is_required() {
        let table = CohortTable::new(vec!["c_normal".into()], vec![]).unwrap();
        assert!(PregnancyQc::run(&table, &bounds()).is_err());
    }
}
