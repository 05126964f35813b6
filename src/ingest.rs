//! Loading the four claims extracts and linking them into visits.
//!
//! Hospital visits are joined to their supplementary diagnoses (one visit per supplementary
//! diagnosis), then matched to primary care visits on the patient and referral keys. Anything
//! unmatched on either side is kept as a visit from one source. Finally membership details are
//! attached by patient.
//!
//! The extracts are read as CSV exports with a header row. Exports in other formats (e.g. Stata
//! `.dta`) need converting first.
use crate::{
    age_at_visit, age_risk, check_columns, config::Paths, dom, load_csv, subsid,
    util::{opt_date, opt_patient_id, opt_visit_key, opt_whole, optional_string},
    ArcStr, PatientId, Source, Visit, Visits,
};
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::Deserialize;
use std::{collections::HashMap, path::Path};

pub const PRIMARY_CARE_COLUMNS: &[&str] =
    &["PSTV01", "FKP02", "FKP03", "FKP04", "FKP05", "FKP13", "FKP14A"];
pub const HOSPITAL_COLUMNS: &[&str] = &[
    "PSTV01", "FKP02", "FKL02", "FKL03", "FKL04", "FKL05", "FKL09", "FKL11", "FKL14", "FKL15A",
    "FKL17A",
];
pub const SECONDARY_COLUMNS: &[&str] = &["FKL02", "FKL24A"];
pub const MEMBERSHIP_COLUMNS: &[&str] = &["PSTV01", "PSTV03", "PSTV08", "PSTV18"];

/// A primary care visit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrimaryCareVisit {
    #[serde(rename = "PSTV01", deserialize_with = "opt_patient_id")]
    pub patient_id: Option<PatientId>,
    /// Referral key, shared with the hospital visit it referred to.
    #[serde(rename = "FKP02", deserialize_with = "opt_visit_key")]
    pub visit_key: Option<ArcStr>,
    #[serde(rename = "FKP03", deserialize_with = "opt_date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "FKP05", deserialize_with = "opt_whole")]
    pub province: Option<i64>,
    #[serde(rename = "FKP14A", deserialize_with = "optional_string")]
    pub diagnosis: Option<ArcStr>,
}

/// A hospital visit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HospitalVisit {
    #[serde(rename = "PSTV01", deserialize_with = "opt_patient_id")]
    pub patient_id: Option<PatientId>,
    #[serde(rename = "FKP02", deserialize_with = "opt_visit_key")]
    pub referral_key: Option<ArcStr>,
    /// Hospital visit key, used to find supplementary diagnoses.
    #[serde(rename = "FKL02", deserialize_with = "opt_visit_key")]
    pub visit_key: Option<ArcStr>,
    #[serde(rename = "FKL03", deserialize_with = "opt_date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "FKL05", deserialize_with = "opt_whole")]
    pub province: Option<i64>,
    #[serde(rename = "FKL15A", deserialize_with = "optional_string")]
    pub diagnosis: Option<ArcStr>,
    #[serde(rename = "FKL17A", deserialize_with = "optional_string")]
    pub secondary_diagnosis: Option<ArcStr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupplementaryDiagnosis {
    #[serde(rename = "FKL02", deserialize_with = "opt_visit_key")]
    pub visit_key: Option<ArcStr>,
    #[serde(rename = "FKL24A", deserialize_with = "optional_string")]
    pub diagnosis: Option<ArcStr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Member {
    #[serde(rename = "PSTV01", deserialize_with = "opt_patient_id")]
    pub patient_id: Option<PatientId>,
    #[serde(rename = "PSTV03", deserialize_with = "opt_date")]
    pub birth_date: Option<NaiveDate>,
    /// Membership segment; 2 and 3 are subsidised.
    #[serde(rename = "PSTV08", deserialize_with = "opt_whole")]
    pub segment: Option<i64>,
}

/// The four source tables, as loaded.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub primary_care: Vec<PrimaryCareVisit>,
    pub hospital: Vec<HospitalVisit>,
    pub supplementary: Vec<SupplementaryDiagnosis>,
    pub membership: Vec<Member>,
}

impl SourceTables {
    /// Load all four tables. Every missing column is reported before any data is read.
    pub fn load(paths: &Paths) -> Result<Self> {
        let primary_care = paths.input(&paths.primary_care);
        let hospital = paths.input(&paths.hospital);
        let supplementary = paths.input(&paths.hospital_secondary);
        let membership = paths.input(&paths.membership);

        let mut errors = vec![];
        for (path, columns) in [
            (&primary_care, PRIMARY_CARE_COLUMNS),
            (&hospital, HOSPITAL_COLUMNS),
            (&supplementary, SECONDARY_COLUMNS),
            (&membership, MEMBERSHIP_COLUMNS),
        ] {
            if let Err(e) = check_columns(path, columns) {
                errors.push(format!("{:#}", e));
            }
        }
        ensure!(errors.is_empty(), "{}", errors.join("\n"));

        let tables = Self {
            primary_care: load_table(&primary_care)?,
            hospital: load_table(&hospital)?,
            supplementary: load_table(&supplementary)?,
            membership: load_table(&membership)?,
        };
        event!(
            Level::INFO,
            "loaded {} primary care visits, {} hospital visits, {} supplementary diagnoses, \
             {} members",
            tables.primary_care.len(),
            tables.hospital.len(),
            tables.supplementary.len(),
            tables.membership.len()
        );
        Ok(tables)
    }

    /// Join the tables into visits.
    pub fn link(&self) -> Visits {
        // hospital -> supplementary diagnoses
        let mut supplementary: HashMap<&str, Vec<Option<ArcStr>>> = HashMap::new();
        for row in self.supplementary.iter() {
            if let Some(key) = row.visit_key.as_deref() {
                supplementary
                    .entry(key)
                    .or_insert_with(Vec::new)
                    .push(row.diagnosis.clone());
            }
        }
        let mut hospital = Vec::with_capacity(self.hospital.len());
        for visit in self.hospital.iter() {
            match visit
                .visit_key
                .as_deref()
                .and_then(|key| supplementary.get(key))
            {
                Some(diagnoses) => {
                    for diagnosis in diagnoses {
                        hospital.push((visit, diagnosis.clone()));
                    }
                }
                None => hospital.push((visit, None)),
            }
        }
        event!(
            Level::DEBUG,
            "{} hospital rows after adding supplementary diagnoses",
            hospital.len()
        );

        // hospital <-> primary care
        let mut primary_by_key: HashMap<(PatientId, &str), Vec<usize>> = HashMap::new();
        for (idx, visit) in self.primary_care.iter().enumerate() {
            if let (Some(patient_id), Some(key)) = (visit.patient_id, visit.visit_key.as_deref()) {
                primary_by_key
                    .entry((patient_id, key))
                    .or_insert_with(Vec::new)
                    .push(idx);
            }
        }
        let mut primary_matched = vec![false; self.primary_care.len()];
        let mut linked: Vec<(Option<&PrimaryCareVisit>, Option<(&HospitalVisit, Option<ArcStr>)>)> =
            Vec::with_capacity(hospital.len() + self.primary_care.len());
        for (visit, supplementary) in hospital {
            let matches = match (visit.patient_id, visit.referral_key.as_deref()) {
                (Some(patient_id), Some(key)) => primary_by_key.get(&(patient_id, key)),
                _ => None,
            };
            match matches {
                Some(idxs) => {
                    for idx in idxs {
                        primary_matched[*idx] = true;
                        linked.push((
                            Some(&self.primary_care[*idx]),
                            Some((visit, supplementary.clone())),
                        ));
                    }
                }
                None => linked.push((None, Some((visit, supplementary)))),
            }
        }
        let matched = primary_matched.iter().filter(|m| **m).count();
        for (visit, matched) in self.primary_care.iter().zip(primary_matched) {
            if !matched {
                linked.push((Some(visit), None));
            }
        }
        event!(
            Level::INFO,
            "{} primary care visits matched a hospital visit, {} linked visits in total",
            matched,
            linked.len()
        );

        // -> membership
        let mut members: HashMap<PatientId, &Member> = HashMap::new();
        let mut duplicates = 0;
        for member in self.membership.iter() {
            if let Some(patient_id) = member.patient_id {
                if members.contains_key(&patient_id) {
                    duplicates += 1;
                } else {
                    members.insert(patient_id, member);
                }
            }
        }
        if duplicates > 0 {
            event!(
                Level::WARN,
                "{} repeated membership records ignored (the first record for each patient is used)",
                duplicates
            );
        }

        let visits: Visits = linked
            .into_iter()
            .map(|(primary, hospital)| {
                let patient_id = hospital
                    .as_ref()
                    .and_then(|(h, _)| h.patient_id)
                    .or_else(|| primary.and_then(|p| p.patient_id));
                let member = patient_id.and_then(|id| members.get(&id)).copied();
                build_visit(patient_id, primary, hospital, member)
            })
            .collect();
        let without_member = visits
            .iter()
            .filter(|v| v.patient_id.map_or(true, |id| !members.contains_key(&id)))
            .count();
        if without_member > 0 {
            event!(
                Level::WARN,
                "{} visits have no membership record",
                without_member
            );
        }
        visits
    }
}

fn build_visit(
    patient_id: Option<PatientId>,
    primary: Option<&PrimaryCareVisit>,
    hospital: Option<(&HospitalVisit, Option<ArcStr>)>,
    member: Option<&Member>,
) -> Visit {
    let source = match (primary.is_some(), hospital.is_some()) {
        (true, true) => Source::Both,
        (false, true) => Source::Hospital,
        _ => Source::PrimaryCare,
    };
    let primary_care_date = primary.and_then(|p| p.date);
    let hospital_date = hospital.as_ref().and_then(|(h, _)| h.date);
    let age = age_at_visit(
        member.and_then(|m| m.birth_date),
        hospital_date,
        primary_care_date,
    );
    let (hospital_dx, hospital_secondary_dx, supplementary_dx) = match hospital.as_ref() {
        Some((h, supplementary)) => (
            h.diagnosis.clone(),
            h.secondary_diagnosis.clone(),
            supplementary.clone(),
        ),
        None => (None, None, None),
    };
    Visit {
        patient_id,
        source,
        primary_care_date,
        hospital_date,
        diagnoses: [
            primary.and_then(|p| p.diagnosis.clone()),
            hospital_dx,
            hospital_secondary_dx,
            supplementary_dx,
        ],
        age,
        age_risk: age_risk(age),
        dom: dom(
            hospital.as_ref().and_then(|(h, _)| h.province),
            primary.and_then(|p| p.province),
        ),
        subsid: subsid(member.and_then(|m| m.segment)),
        n_preg: None,
        termination: None,
        episode_start: None,
        outcome: None,
    }
}

fn load_table<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let rows: Vec<T> = load_csv(path)?;
    event!(
        Level::DEBUG,
        "read {} rows from \"{}\"",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn key(s: &str) -> Option<ArcStr> {
        Some(s.into())
    }

    fn tables() -> SourceTables {
        SourceTables {
            primary_care: vec![
                PrimaryCareVisit {
                    patient_id: Some(1),
                    visit_key: key("r1"),
                    date: date(2020, 3, 1),
                    province: Some(91),
                    diagnosis: key("Z34"),
                },
                PrimaryCareVisit {
                    patient_id: Some(2),
                    visit_key: key("r2"),
                    date: date(2021, 1, 1),
                    province: None,
                    diagnosis: key("J06"),
                },
                // null keys never match
                PrimaryCareVisit {
                    patient_id: Some(3),
                    visit_key: None,
                    date: date(2021, 1, 1),
                    province: Some(31),
                    diagnosis: None,
                },
            ],
            hospital: vec![
                HospitalVisit {
                    patient_id: Some(1),
                    referral_key: key("r1"),
                    visit_key: key("h1"),
                    date: date(2020, 3, 4),
                    province: Some(31),
                    diagnosis: key("O80"),
                    secondary_diagnosis: None,
                },
                HospitalVisit {
                    patient_id: Some(3),
                    referral_key: None,
                    visit_key: key("h2"),
                    date: date(2021, 1, 2),
                    province: None,
                    diagnosis: key("O03"),
                    secondary_diagnosis: None,
                },
            ],
            supplementary: vec![
                SupplementaryDiagnosis {
                    visit_key: key("h1"),
                    diagnosis: key("O72"),
                },
                SupplementaryDiagnosis {
                    visit_key: key("h1"),
                    diagnosis: key("O70"),
                },
            ],
            membership: vec![
                Member {
                    patient_id: Some(1),
                    birth_date: date(1984, 6, 1),
                    segment: Some(2),
                },
                Member {
                    patient_id: Some(1),
                    birth_date: date(1990, 1, 1),
                    segment: Some(1),
                },
                Member {
                    patient_id: Some(3),
                    birth_date: date(2010, 1, 1),
                    segment: Some(5),
                },
            ],
        }
    }

    #[test]
    fn joins() {
        let visits = tables().link();
        // 2 (h1 x supplementary) + 1 (h2) + 2 unmatched primary care
        assert_eq!(visits.len(), 5);

        let p1: Vec<_> = visits.visits_for_patient(1).collect();
        assert_eq!(p1.len(), 2);
        for visit in p1.iter() {
            assert_eq!(visit.source, Source::Both);
            assert_eq!(visit.clinical_date(), date(2020, 3, 1));
            // hospital date wins for age; first membership record wins
            assert_eq!(visit.age, Some(36));
            assert_eq!(visit.age_risk, Some(1));
            assert_eq!(visit.dom, Some(0));
            assert_eq!(visit.subsid, Some(1));
        }
        assert_eq!(p1[0].diagnoses[3].as_deref(), Some("O72"));
        assert_eq!(p1[1].diagnoses[3].as_deref(), Some("O70"));
        assert_eq!(p1[0].diagnoses[0].as_deref(), Some("Z34"));

        let p2: Vec<_> = visits.visits_for_patient(2).collect();
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].source, Source::PrimaryCare);
        assert_eq!(p2[0].age, None);
        assert_eq!(p2[0].dom, None);
        assert_eq!(p2[0].subsid, None);

        let p3: Vec<_> = visits.visits_for_patient(3).collect();
        assert_eq!(p3.len(), 2);
        assert!(p3.iter().any(|v| v.source == Source::Hospital));
        assert!(p3.iter().any(|v| v.source == Source::PrimaryCare));
        assert!(p3.iter().all(|v| v.age == Some(11) && v.subsid == Some(0)));
    }

    #[test]
    fn missing_columns_fail_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            input_dir: dir.path().to_owned(),
            ..Paths::default()
        };
        let write = |name: &std::path::PathBuf, header: &str| {
            std::fs::write(paths.input(name), format!("{}\n", header)).unwrap();
        };
        write(&paths.primary_care, "PSTV01,FKP02,FKP03,FKP04,FKP05,FKP13");
        write(
            &paths.hospital,
            "PSTV01,FKP02,FKL02,FKL03,FKL04,FKL05,FKL09,FKL11,FKL14,FKL17A",
        );
        write(&paths.hospital_secondary, "FKL02,FKL24A");
        write(&paths.membership, "PSTV01,PSTV03,PSTV08,PSTV18");

        let msg = format!("{:#}", SourceTables::load(&paths).unwrap_err());
        assert!(msg.contains("FKP14A"), "{}", msg);
        assert!(msg.contains("FKL15A"), "{}", msg);
        assert!(!msg.contains("PSTV18"), "{}", msg);
    }
}
