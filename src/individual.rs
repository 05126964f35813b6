//! One row per patient, collapsing all of their visits.
use crate::{
    fold::{Fold, Max},
    load_csv, save_csv, PatientId, Range, Visits,
};
use itertools::Itertools;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FILTERED_VISITS_FILE: &str = "pregnancy_by_visit_filtered.csv";
pub const INDIVIDUALS_FILE: &str = "pregnancy_by_individual.csv";

/// Patient details, for a visit or for a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRow {
    #[serde(rename = "PSTV01")]
    pub patient_id: PatientId,
    pub age: Option<i32>,
    pub age_risk: Option<u8>,
    pub dom: Option<u8>,
    pub subsid: Option<u8>,
    pub n_preg: Option<u32>,
}

/// Visits of known patients with a plausible age, ordered by patient.
pub fn filtered_visits(visits: &Visits, ages: &Range<i32>) -> Vec<PatientRow> {
    let mut rows: Vec<PatientRow> = visits
        .iter()
        .filter(|v| ages.contains_opt(v.age.as_ref()))
        .filter_map(|v| {
            Some(PatientRow {
                patient_id: v.patient_id?,
                age: v.age,
                age_risk: v.age_risk,
                dom: v.dom,
                subsid: v.subsid,
                n_preg: v.n_preg,
            })
        })
        .collect();
    rows.sort_by_key(|row| row.patient_id);
    event!(
        Level::INFO,
        "{} of {} visits kept for the individual-level table",
        rows.len(),
        visits.len()
    );
    rows
}

/// Collapse visit rows (sorted by patient) into one row per patient, taking the largest value
/// of each column.
pub fn individuals(rows: &[PatientRow]) -> Vec<PatientRow> {
    let grouped = rows.iter().group_by(|row| row.patient_id);
    let out: Vec<PatientRow> = grouped
        .into_iter()
        .map(|(patient_id, group)| {
            let group: Vec<&PatientRow> = group.collect();
            PatientRow {
                patient_id,
                age: Max::fold(group.iter().map(|r| r.age)),
                age_risk: Max::fold(group.iter().map(|r| r.age_risk)),
                dom: Max::fold(group.iter().map(|r| r.dom)),
                subsid: Max::fold(group.iter().map(|r| r.subsid)),
                n_preg: Max::fold(group.iter().map(|r| r.n_preg)),
            }
        })
        .collect();
    event!(Level::INFO, "{} individuals", out.len());
    out
}

pub fn load(path: impl AsRef<Path>) -> Result<Vec<PatientRow>> {
    load_csv(path)
}

pub fn save(rows: &[PatientRow], path: impl AsRef<Path>) -> Result {
    save_csv(rows.iter(), path)
}
