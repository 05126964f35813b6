//! Odds of an abortive outcome, for exposed against unexposed units.
//!
//! The same table is produced at three levels: per pregnancy (from the conflict-free cohort
//! table), per patient and per visit (both from the visit table).
use crate::{
    cohort::{is_flag_column, CohortRow, CohortTable},
    conditions::{ConditionKind, Conditions, ABORTIVE},
    episode::Window,
    fold::{Fold, Max},
    icd10::IcdCode,
    save_csv,
    util::{percent, round_to},
    PatientId, Range, Visit, Visits,
};
use noisy_float::prelude::*;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{cmp::Reverse, collections::BTreeMap, fmt, path::Path};
use term_data_table::{Cell, Row, Table};

/// The demographic exposures, in output order.
pub const DEMOGRAPHICS: [&str; 3] = ["age_risk", "dom", "subsid"];

/// A 2x2 table.
///
/// `a`: outcome and exposed, `b`: outcome and unexposed, `c`: no outcome and exposed, `d`: no
/// outcome and unexposed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contingency {
    pub a: u64,
    pub b: u64,
    pub c: u64,
    pub d: u64,
}

impl Contingency {
    pub fn new(a: u64, b: u64, c: u64, d: u64) -> Self {
        Self { a, b, c, d }
    }

    /// Count one unit.
    pub fn add(&mut self, outcome: bool, exposed: bool) {
        match (outcome, exposed) {
            (true, true) => self.a += 1,
            (true, false) => self.b += 1,
            (false, true) => self.c += 1,
            (false, false) => self.d += 1,
        }
    }

    pub fn has_zero(&self) -> bool {
        self.a == 0 || self.b == 0 || self.c == 0 || self.d == 0
    }

    /// Units with the outcome that were exposed, as a percentage.
    pub fn prevalence_outcome(&self) -> Option<f64> {
        percent(self.a as usize, (self.a + self.b) as usize)
    }

    /// Units without the outcome that were exposed, as a percentage.
    pub fn prevalence_no_outcome(&self) -> Option<f64> {
        percent(self.c as usize, (self.c + self.d) as usize)
    }

    /// The odds ratio with a Wald interval on the log scale, using critical value `z`.
    ///
    /// If any cell is empty, 0.5 is added to every cell (Haldane-Anscombe).
    pub fn odds_ratio(&self, z: f64) -> OddsRatio {
        let corrected = self.has_zero();
        let shift = if corrected { 0.5 } else { 0. };
        let [a, b, c, d] = [self.a, self.b, self.c, self.d].map(|v| v as f64 + shift);
        let estimate = (a * d) / (b * c);
        let se = (1. / a + 1. / b + 1. / c + 1. / d).sqrt();
        let ln = estimate.ln();
        OddsRatio {
            estimate,
            ci_lower: (ln - z * se).exp(),
            ci_upper: (ln + z * se).exp(),
            corrected,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OddsRatio {
    pub estimate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Whether the continuity correction was applied.
    pub corrected: bool,
}

impl OddsRatio {
    /// The interval excludes 1.
    pub fn is_significant(&self) -> bool {
        self.ci_lower > 1. || self.ci_upper < 1.
    }
}

/// Which analysis to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum OddsLevel {
    Pregnancy,
    Individual,
    Visit,
}

impl OddsLevel {
    pub fn file_name(self) -> &'static str {
        match self {
            OddsLevel::Pregnancy => "or_preg_abort_combined.csv",
            OddsLevel::Individual => "or_abortus_individual_level.csv",
            OddsLevel::Visit => "or_abortus_visit_level.csv",
        }
    }
}

impl fmt::Display for OddsLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            OddsLevel::Pregnancy => "pregnancy",
            OddsLevel::Individual => "individual",
            OddsLevel::Visit => "visit",
        })
    }
}

/// Pair rows sort before group rows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnalysisType {
    #[serde(rename = "n_preg_pair")]
    OrderPair,
    #[serde(rename = "preg_group")]
    Group,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    Significant,
    #[serde(rename = "Not Significant")]
    NotSignificant,
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Significance::Significant => "Significant",
            Significance::NotSignificant => "Not Significant",
        })
    }
}

/// One line of the odds ratio table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRow {
    pub analysis_type: AnalysisType,
    pub label: String,
    pub rank: usize,
    pub odds_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub significance: Significance,
    pub prevalence_abortus_pct: Option<f64>,
    pub prevalence_non_abortus_pct: Option<f64>,
    pub cell_a: u64,
    pub cell_b: u64,
    pub cell_c: u64,
    pub cell_d: u64,
    pub ref_n_preg: Option<u32>,
    pub cmp_n_preg: Option<u32>,
}

impl OddsRow {
    fn new(analysis_type: AnalysisType, label: String, cells: Contingency, z: f64) -> Self {
        let or = cells.odds_ratio(z);
        let (prevalence_abortus_pct, prevalence_non_abortus_pct) = match analysis_type {
            AnalysisType::Group => (cells.prevalence_outcome(), cells.prevalence_no_outcome()),
            AnalysisType::OrderPair => (None, None),
        };
        OddsRow {
            analysis_type,
            label,
            rank: 0,
            odds_ratio: round_to(or.estimate, 3),
            ci_lower: round_to(or.ci_lower, 3),
            ci_upper: round_to(or.ci_upper, 3),
            significance: if or.is_significant() {
                Significance::Significant
            } else {
                Significance::NotSignificant
            },
            prevalence_abortus_pct,
            prevalence_non_abortus_pct,
            cell_a: cells.a,
            cell_b: cells.b,
            cell_c: cells.c,
            cell_d: cells.d,
            ref_n_preg: None,
            cmp_n_preg: None,
        }
    }

    /// Recompute from the cells, so ranking isn't affected by rounding.
    fn odds_ratio_unrounded(&self) -> f64 {
        Contingency::new(self.cell_a, self.cell_b, self.cell_c, self.cell_d)
            .odds_ratio(1.)
            .estimate
    }
}

/// One unit of analysis, with its exposure to each variable (`None` for unknown).
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub outcome: bool,
    pub order: Option<u32>,
    pub exposures: Vec<Option<bool>>,
}

/// Units sharing a list of exposure variables.
#[derive(Debug, Clone)]
pub struct Units {
    pub labels: Vec<String>,
    pub units: Vec<Unit>,
    /// Leave out variables that no unit was exposed to.
    pub exposed_only: bool,
}

impl Units {
    /// The odds ratio table: order pairs first, then variables ranked by effect size.
    pub fn odds_ratios(&self, max_order: u32, z: f64) -> Vec<OddsRow> {
        let mut rows = self.order_pairs(max_order, z);
        rows.extend(self.groups(z));
        rows
    }

    fn groups(&self, z: f64) -> Vec<OddsRow> {
        let mut tables = vec![Contingency::default(); self.labels.len()];
        for unit in self.units.iter() {
            for (table, exposed) in tables.iter_mut().zip(unit.exposures.iter()) {
                if let Some(exposed) = exposed {
                    table.add(unit.outcome, *exposed);
                }
            }
        }
        let mut rows: Vec<OddsRow> = self
            .labels
            .iter()
            .zip(tables)
            .filter(|(_, cells)| !self.exposed_only || cells.a + cells.c > 0)
            .map(|(label, cells)| OddsRow::new(AnalysisType::Group, label.clone(), cells, z))
            .collect();
        // strongest effect first, ties keep variable order
        rows.sort_by_key(|row| {
            let effect = row.odds_ratio_unrounded().ln().abs();
            Reverse(r64(effect))
        });
        rank(&mut rows);
        rows
    }

    fn order_pairs(&self, max_order: u32, z: f64) -> Vec<OddsRow> {
        let mut counts: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
        for unit in self.units.iter() {
            let Some(order) = unit.order else { continue };
            if !(1..=max_order).contains(&order) {
                continue;
            }
            let entry = counts.entry(order).or_default();
            if unit.outcome {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
        let Some(&(ref_outcome, ref_no_outcome)) = counts.get(&1) else {
            return vec![];
        };
        let mut rows: Vec<OddsRow> = counts
            .range(2..)
            .map(|(order, (outcome, no_outcome))| {
                let cells = Contingency::new(ref_outcome, ref_no_outcome, *outcome, *no_outcome);
                let mut row = OddsRow::new(
                    AnalysisType::OrderPair,
                    format!("n_preg_1_vs_{}", order),
                    cells,
                    z,
                );
                row.ref_n_preg = Some(1);
                row.cmp_n_preg = Some(*order);
                row
            })
            .collect();
        rank(&mut rows);
        rows
    }
}

fn rank(rows: &mut [OddsRow]) {
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx + 1;
    }
}

/// How to read one exposure from a cohort row.
#[derive(Debug, Copy, Clone)]
enum Column {
    Flag(usize),
    AgeRisk,
    Dom,
    Subsid,
}

impl Column {
    fn value(self, row: &CohortRow) -> Option<u8> {
        match self {
            Column::Flag(idx) => row.flags[idx],
            Column::AgeRisk => row.age_risk,
            Column::Dom => row.dom,
            Column::Subsid => row.subsid,
        }
    }
}

fn binary(v: Option<u8>) -> Option<bool> {
    match v {
        Some(0) => Some(false),
        Some(1) => Some(true),
        _ => None,
    }
}

/// Pregnancies from the cohort table.
///
/// The outcome is `c_abortive`. Exposures are the pregnancy-complication flags (ordered by
/// column name), the demographics, then abortion before and after the pregnancy. Pregnancies
/// with an unknown outcome are left out; an unknown exposure only leaves the pregnancy out of
/// that variable.
pub fn pregnancy_units(table: &CohortTable, conditions: &Conditions) -> Result<Units> {
    let outcome_column = Window::During.column(ABORTIVE);
    let outcome = table
        .flag_index(&outcome_column)
        .with_context(|| format!("column `{}` is required", outcome_column))?;

    let mut complications: Vec<(&str, usize)> = table
        .flag_columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| is_flag_column(name))
        .filter(|(_, name)| {
            let group = &name[2..];
            group != ABORTIVE
                && matches!(conditions.get(group), Some(g) if g.kind == ConditionKind::Pregnancy)
        })
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();
    complications.sort();

    let mut columns: Vec<(String, Column)> = complications
        .into_iter()
        .map(|(name, idx)| (name.to_owned(), Column::Flag(idx)))
        .collect();
    columns.extend([
        (DEMOGRAPHICS[0].to_owned(), Column::AgeRisk),
        (DEMOGRAPHICS[1].to_owned(), Column::Dom),
        (DEMOGRAPHICS[2].to_owned(), Column::Subsid),
    ]);
    for window in [Window::Before, Window::After] {
        let name = window.column(ABORTIVE);
        if let Some(idx) = table.flag_index(&name) {
            columns.push((name, Column::Flag(idx)));
        }
    }

    let units: Vec<Unit> = table
        .iter()
        .filter_map(|row| {
            let outcome = binary(row.flags[outcome])?;
            Some(Unit {
                outcome,
                order: row.n_preg,
                exposures: columns
                    .iter()
                    .map(|(_, column)| binary(column.value(row)))
                    .collect(),
            })
        })
        .collect();
    event!(
        Level::INFO,
        "{} of {} pregnancies have a known outcome, {} exposure variables",
        units.len(),
        table.len(),
        columns.len()
    );
    Ok(Units {
        labels: columns.into_iter().map(|(name, _)| name).collect(),
        units,
        exposed_only: false,
    })
}

/// Pregnancy groups, then the demographics.
fn visit_labels(conditions: &Conditions) -> Vec<String> {
    conditions
        .of_kind(ConditionKind::Pregnancy)
        .map(|g| g.name.to_string())
        .chain(DEMOGRAPHICS.iter().map(|d| d.to_string()))
        .collect()
}

/// Visits with a plausible age and at least one valid diagnosis code.
///
/// The outcome is an abortive code on the visit. Exposures are the pregnancy groups coded on the
/// visit and its demographics.
pub fn visit_units(visits: &Visits, conditions: &Conditions, ages: &Range<i32>) -> Units {
    let abortive = conditions.abortive();
    let units: Vec<Unit> = visits
        .iter()
        .filter(|v| ages.contains_opt(v.age.as_ref()) && v.has_valid_code())
        .map(|v| {
            let codes = v.codes();
            let mut exposures: Vec<Option<bool>> = conditions
                .of_kind(ConditionKind::Pregnancy)
                .map(|g| Some(g.matches(&codes)))
                .collect();
            exposures.extend([v.age_risk, v.dom, v.subsid].map(|d| Some(d == Some(1))));
            Unit {
                outcome: abortive.matches(&codes),
                order: v.n_preg,
                exposures,
            }
        })
        .collect();
    event!(
        Level::INFO,
        "{} of {} visits used for the visit-level odds ratios",
        units.len(),
        visits.len()
    );
    Units {
        labels: visit_labels(conditions),
        units,
        exposed_only: true,
    }
}

/// Patients, looking at all their visits with a plausible age.
///
/// Patients need at least one valid diagnosis code. The outcome is an abortive code on any visit.
/// Exposures are the pregnancy groups coded on any visit, and the largest value of each
/// demographic.
pub fn individual_units(visits: &Visits, conditions: &Conditions, ages: &Range<i32>) -> Units {
    let abortive = conditions.abortive();
    let groups: Vec<_> = conditions.of_kind(ConditionKind::Pregnancy).collect();

    let mut patients: BTreeMap<PatientId, Vec<&Visit>> = BTreeMap::new();
    for visit in visits.iter() {
        if let (Some(id), true) = (visit.patient_id, ages.contains_opt(visit.age.as_ref())) {
            patients.entry(id).or_default().push(visit);
        }
    }

    let units: Vec<Unit> = patients
        .values()
        .filter_map(|visits| {
            let codes: Vec<Option<IcdCode>> = visits
                .iter()
                .flat_map(|v| v.codes())
                .filter(Option::is_some)
                .collect();
            if codes.is_empty() {
                return None;
            }
            let mut exposures: Vec<Option<bool>> =
                groups.iter().map(|g| Some(g.matches(&codes))).collect();
            exposures.extend(
                [
                    Max::fold(visits.iter().map(|v| v.age_risk)),
                    Max::fold(visits.iter().map(|v| v.dom)),
                    Max::fold(visits.iter().map(|v| v.subsid)),
                ]
                .map(|d| Some(d == Some(1))),
            );
            Some(Unit {
                outcome: abortive.matches(&codes),
                order: Max::fold(visits.iter().map(|v| v.n_preg)),
                exposures,
            })
        })
        .collect();
    event!(
        Level::INFO,
        "{} of {} patients used for the individual-level odds ratios",
        units.len(),
        patients.len()
    );
    Units {
        labels: visit_labels(conditions),
        units,
        exposed_only: true,
    }
}

pub fn save(rows: &[OddsRow], path: impl AsRef<Path>) -> Result {
    save_csv(rows.iter(), path)
}

pub fn term_table(rows: &[OddsRow]) -> Table<'_> {
    let mut table = Table::new().with_row(
        ["", "Variable", "OR", "95% CI", "", "a", "b", "c", "d"]
            .into_iter()
            .fold(Row::new(), |row, h| row.with_cell(Cell::from(h))),
    );
    for row in rows {
        let significant = match row.significance {
            Significance::Significant => "*",
            Significance::NotSignificant => "",
        };
        table.add_row(
            Row::new()
                .with_cell(Cell::from(row.rank.to_string()))
                .with_cell(Cell::from(row.label.clone()))
                .with_cell(Cell::from(format!("{:.3}", row.odds_ratio)))
                .with_cell(Cell::from(format!(
                    "{:.3} - {:.3}",
                    row.ci_lower, row.ci_upper
                )))
                .with_cell(Cell::from(significant))
                .with_cell(Cell::from(row.cell_a.to_string()))
                .with_cell(Cell::from(row.cell_b.to_string()))
                .with_cell(Cell::from(row.cell_c.to_string()))
                .with_cell(Cell::from(row.cell_d.to_string())),
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Source;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn plain_odds_ratio() {
        let or = Contingency::new(10, 20, 5, 40).odds_ratio(1.96);
        assert!(!or.corrected);
        assert!(close(or.estimate, 4.));
        let se = (1. / 10. + 1. / 20. + 1. / 5. + 1. / 40f64).sqrt();
        assert!(close(or.ci_lower, (4f64.ln() - 1.96 * se).exp()));
        assert!(close(or.ci_upper, (4f64.ln() + 1.96 * se).exp()));
        assert!(or.is_significant());
    }

    #[test]
    fn haldane_correction() {
        let or = Contingency::new(0, 10, 5, 10).odds_ratio(1.96);
        assert!(or.corrected);
        assert!(close(or.estimate, (0.5 * 10.5) / (10.5 * 5.5)));
        assert!(or.estimate.is_finite() && or.ci_lower > 0.);
    }

    #[test]
    fn prevalence() {
        let cells = Contingency::new(1, 2, 0, 0);
        assert_eq!(cells.prevalence_outcome(), Some(33.3));
        assert_eq!(cells.prevalence_no_outcome(), None);
    }

    fn unit(outcome: bool, order: Option<u32>, exposures: &[Option<bool>]) -> Unit {
        Unit {
            outcome,
            order,
            exposures: exposures.to_vec(),
        }
    }

    #[test]
    fn ranking_and_pairs() {
        let units = Units {
            labels: vec!["weak".into(), "none".into(), "strong".into()],
            units: vec![
                unit(true, Some(1), &[Some(true), Some(false), Some(true)]),
                unit(true, Some(2), &[Some(false), Some(false), Some(true)]),
                unit(false, Some(1), &[Some(true), Some(false), Some(false)]),
                unit(false, Some(2), &[Some(false), None, Some(false)]),
                unit(false, Some(9), &[None, Some(false), Some(false)]),
            ],
            exposed_only: false,
        };
        let rows = units.odds_ratios(7, 1.96);
        let labels: Vec<_> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["n_preg_1_vs_2", "strong", "weak", "none"]);
        let ranks: Vec<_> = rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 1, 2, 3]);

        let pair = &rows[0];
        assert_eq!(pair.analysis_type, AnalysisType::OrderPair);
        assert_eq!((pair.cell_a, pair.cell_b, pair.cell_c, pair.cell_d), (1, 1, 1, 1));
        assert_eq!((pair.ref_n_preg, pair.cmp_n_preg), (Some(1), Some(2)));
        assert_eq!(pair.prevalence_abortus_pct, None);

        let weak = &rows[2];
        assert_eq!((weak.cell_a, weak.cell_b, weak.cell_c, weak.cell_d), (1, 1, 1, 1));
        assert_eq!(weak.odds_ratio, 1.);
        assert_eq!(weak.significance, Significance::NotSignificant);
        assert_eq!(weak.prevalence_abortus_pct, Some(50.));

        // the unknown exposure is skipped
        let none = &rows[3];
        assert_eq!(none.cell_a + none.cell_b + none.cell_c + none.cell_d, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("or.csv");
        save(&rows, &path).unwrap();
        let reloaded: Vec<OddsRow> = crate::load_csv(&path).unwrap();
        assert_eq!(reloaded, rows);
    }

    #[test]
    fn exposed_only() {
        let units = Units {
            labels: vec!["seen".into(), "unseen".into()],
            units: vec![
                unit(true, None, &[Some(true), Some(false)]),
                unit(false, None, &[Some(false), Some(false)]),
            ],
            exposed_only: true,
        };
        let rows = units.odds_ratios(7, 1.96);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "seen");
    }

    fn row(n_preg: u32, flags: Vec<Option<u8>>) -> CohortRow {
        CohortRow {
            patient_id: Some(1),
            subsid: Some(1),
            age: Some(30),
            dom: Some(0),
            age_risk: None,
            n_preg: Some(n_preg),
            ref_year: Some(2020),
            flags,
        }
    }

    #[test]
    fn pregnancy_level_columns() {
        let columns = ["b_dm", "c_prom", "b_abortive", "c_abortive", "a_abortive", "a_heg"];
        let table = CohortTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![
                row(1, vec![Some(1), Some(1), Some(0), Some(1), Some(0), Some(0)]),
                row(2, vec![Some(0), Some(0), Some(0), None, Some(0), Some(1)]),
                row(1, vec![Some(0), Some(0), Some(1), Some(0), Some(0), Some(0)]),
            ],
        )
        .unwrap();
        let units = pregnancy_units(&table, Conditions::builtin()).unwrap();
        assert_eq!(
            units.labels,
            ["a_heg", "c_prom", "age_risk", "dom", "subsid", "b_abortive", "a_abortive"]
        );
        assert_eq!(units.units.len(), 2);
        assert_eq!(
            units.units[0].exposures,
            [
                Some(false),
                Some(true),
                None,
                Some(false),
                Some(true),
                Some(false),
                Some(false)
            ]
        );
    }

    fn visit(patient_id: u64, age: i32, codes: [Option<&str>; 4], n_preg: Option<u32>) -> Visit {
        Visit {
            patient_id: Some(patient_id),
            source: Source::Both,
            primary_care_date: None,
            hospital_date: None,
            diagnoses: codes.map(|c| c.map(Into::into)),
            age: Some(age),
            age_risk: crate::age_risk(Some(age)),
            dom: Some(1),
            subsid: Some(0),
            n_preg,
            termination: None,
            episode_start: None,
            outcome: None,
        }
    }

    #[test]
    fn visit_and_individual_levels() {
        let visits = Visits::new(vec![
            visit(1, 30, [Some("O03"), None, None, None], Some(1)),
            visit(1, 30, [None, Some("O42.1"), None, None], None),
            visit(2, 40, [Some("O80"), None, None, None], Some(1)),
            visit(2, 41, [Some("xx"), None, None, None], None),
            visit(3, 60, [Some("O03"), None, None, None], Some(1)),
        ]);
        let conditions = Conditions::builtin();
        let ages = Range::new(12, Some(56)).unwrap();

        let by_visit = visit_units(&visits, conditions, &ages);
        assert_eq!(by_visit.units.len(), 3);
        assert_eq!(
            by_visit.units.iter().filter(|u| u.outcome).count(),
            1
        );
        let rows = by_visit.odds_ratios(7, 1.96);
        let labels: Vec<_> = rows
            .iter()
            .filter(|r| r.analysis_type == AnalysisType::Group)
            .map(|r| r.label.as_str())
            .collect();
        assert!(labels.contains(&"prom"));
        assert!(labels.contains(&"abortive"));
        assert!(labels.contains(&"dom"));
        assert!(!labels.contains(&"subsid"));

        let by_patient = individual_units(&visits, conditions, &ages);
        assert_eq!(by_patient.units.len(), 2);
        assert!(by_patient.units[0].outcome);
        assert!(!by_patient.units[1].outcome);
        let prom = by_patient.labels.iter().position(|l| l == "prom").unwrap();
        assert_eq!(by_patient.units[0].exposures[prom], Some(true));
        let age_risk = by_patient.labels.iter().position(|l| l == "age_risk").unwrap();
        assert_eq!(by_patient.units[1].exposures[age_risk], Some(true));
        assert_eq!(by_patient.units[1].order, Some(1));
    }
}
