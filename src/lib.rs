pub mod cohort;
pub mod conditions;
pub mod config;
pub mod episode;
pub mod filter;
pub mod fold;
pub mod icd10;
pub mod individual;
pub mod ingest;
pub mod odds;
pub mod qc;
pub mod summary;
mod range;
mod util;

pub use anyhow::{Context, Error};
use chrono::{Datelike, NaiveDate};
use itertools::Either;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io, iter,
    ops::Deref,
    path::Path,
    sync::Arc,
};

pub use crate::{
    config::Config,
    episode::{DiagnosisField, Episode, Episodes, Outcome, Segmenter},
    icd10::IcdCode,
    range::{Bands, Range, Tally},
    util::{header, path_exists},
};
use crate::util::{opt_date, opt_patient_id, opt_whole, optional_string, ser_opt_date};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// Provinces whose residents are counted as living in the main islands (`dom = 0`).
pub const CORE_PROVINCES: [i64; 7] = [31, 32, 33, 34, 35, 36, 51];
/// Membership segments that are government subsidised (`subsid = 1`).
pub const SUBSIDISED_SEGMENTS: [i64; 2] = [2, 3];

/// Which source tables a visit was found in.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Source {
    #[serde(rename = "primary_care")]
    PrimaryCare,
    #[serde(rename = "hospital")]
    Hospital,
    /// A hospital visit with a matching primary care referral.
    #[serde(rename = "both")]
    Both,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::PrimaryCare => f.write_str("primary care"),
            Source::Hospital => f.write_str("hospital"),
            Source::Both => f.write_str("primary care + hospital"),
        }
    }
}

/// One clinical encounter, after linking the source tables.
///
/// Demographics are derived when the visit is linked. Episode fields (`n_preg`, `termination`,
/// `episode_start`, `outcome`) are empty until episodes are assigned by `Visits::assign_episodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub patient_id: Option<PatientId>,
    pub source: Source,
    pub primary_care_date: Option<NaiveDate>,
    pub hospital_date: Option<NaiveDate>,
    /// Raw diagnosis fields, in `DiagnosisField` order.
    pub diagnoses: [Option<ArcStr>; 4],
    pub age: Option<i32>,
    pub age_risk: Option<u8>,
    pub dom: Option<u8>,
    pub subsid: Option<u8>,
    /// Which pregnancy this visit terminates (only set for qualifying visits).
    pub n_preg: Option<u32>,
    /// Set on the visit that anchors an episode.
    pub termination: Option<NaiveDate>,
    /// Set on the visit that anchors an episode.
    pub episode_start: Option<NaiveDate>,
    /// Set on the visit that anchors an episode.
    pub outcome: Option<Outcome>,
}

impl Visit {
    /// The earliest of the two visit dates.
    pub fn clinical_date(&self) -> Option<NaiveDate> {
        match (self.primary_care_date, self.hospital_date) {
            (Some(p), Some(h)) => Some(p.min(h)),
            (p, h) => p.or(h),
        }
    }

    /// Normalized diagnosis codes, in `DiagnosisField` order.
    pub fn codes(&self) -> [Option<IcdCode>; 4] {
        let code = |idx: usize| self.diagnoses[idx].as_deref().and_then(IcdCode::normalize);
        [code(0), code(1), code(2), code(3)]
    }

    /// True if at least one diagnosis field holds a valid code.
    pub fn has_valid_code(&self) -> bool {
        self.codes().iter().any(Option::is_some)
    }

    /// True if every diagnosis field is empty.
    pub fn all_diagnoses_missing(&self) -> bool {
        self.diagnoses.iter().all(Option::is_none)
    }

    /// Clear any episode information.
    fn clear_episode(&mut self) {
        self.n_preg = None;
        self.termination = None;
        self.episode_start = None;
        self.outcome = None;
    }
}

/// Year of visit minus year of birth, using the hospital date where there is one.
pub fn age_at_visit(
    birth_date: Option<NaiveDate>,
    hospital_date: Option<NaiveDate>,
    primary_care_date: Option<NaiveDate>,
) -> Option<i32> {
    let visit = hospital_date.or(primary_care_date)?;
    Some(visit.year() - birth_date?.year())
}

/// `1` for pregnancies under 20 or over 35.
pub fn age_risk(age: Option<i32>) -> Option<u8> {
    age.map(|age| u8::from(age < 20 || age > 35))
}

/// `0` for residents of the core provinces, `1` otherwise. The hospital's province wins.
pub fn dom(hospital_province: Option<i64>, primary_care_province: Option<i64>) -> Option<u8> {
    let province = hospital_province.or(primary_care_province)?;
    Some(u8::from(!CORE_PROVINCES.contains(&province)))
}

/// `1` for subsidised membership segments.
pub fn subsid(segment: Option<i64>) -> Option<u8> {
    segment.map(|segment| u8::from(SUBSIDISED_SEGMENTS.contains(&segment)))
}

/// A row of the visit-level table, as written to csv.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VisitRow {
    #[serde(rename = "PSTV01", deserialize_with = "opt_patient_id")]
    patient_id: Option<PatientId>,
    source: Source,
    #[serde(rename = "FKP03", deserialize_with = "opt_date", serialize_with = "ser_opt_date")]
    primary_care_date: Option<NaiveDate>,
    #[serde(rename = "FKL03", deserialize_with = "opt_date", serialize_with = "ser_opt_date")]
    hospital_date: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_date", serialize_with = "ser_opt_date")]
    combined_date: Option<NaiveDate>,
    #[serde(rename = "FKP14A", deserialize_with = "optional_string")]
    primary_care_dx: Option<ArcStr>,
    #[serde(rename = "FKL15A", deserialize_with = "optional_string")]
    hospital_dx: Option<ArcStr>,
    #[serde(rename = "FKL17A", deserialize_with = "optional_string")]
    hospital_secondary_dx: Option<ArcStr>,
    #[serde(rename = "FKL24A", deserialize_with = "optional_string")]
    supplementary_dx: Option<ArcStr>,
    #[serde(deserialize_with = "opt_whole")]
    age: Option<i64>,
    #[serde(deserialize_with = "opt_whole")]
    age_risk: Option<i64>,
    #[serde(deserialize_with = "opt_whole")]
    dom: Option<i64>,
    #[serde(deserialize_with = "opt_whole")]
    subsid: Option<i64>,
    #[serde(deserialize_with = "opt_whole")]
    n_preg: Option<i64>,
    #[serde(deserialize_with = "opt_date", serialize_with = "ser_opt_date")]
    fin_g: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_date", serialize_with = "ser_opt_date")]
    ref_start: Option<NaiveDate>,
    #[serde(default)]
    outcome: Option<Outcome>,
}

impl From<&Visit> for VisitRow {
    fn from(v: &Visit) -> Self {
        let [primary_care_dx, hospital_dx, hospital_secondary_dx, supplementary_dx] =
            v.diagnoses.clone();
        Self {
            patient_id: v.patient_id,
            source: v.source,
            primary_care_date: v.primary_care_date,
            hospital_date: v.hospital_date,
            combined_date: v.clinical_date(),
            primary_care_dx,
            hospital_dx,
            hospital_secondary_dx,
            supplementary_dx,
            age: v.age.map(i64::from),
            age_risk: v.age_risk.map(i64::from),
            dom: v.dom.map(i64::from),
            subsid: v.subsid.map(i64::from),
            n_preg: v.n_preg.map(i64::from),
            fin_g: v.termination,
            ref_start: v.episode_start,
            outcome: v.outcome,
        }
    }
}

impl From<VisitRow> for Visit {
    fn from(row: VisitRow) -> Self {
        // flags outside their domain are treated as missing
        let flag = |v: Option<i64>| v.and_then(|v| u8::try_from(v).ok()).filter(|v| *v <= 1);
        Self {
            patient_id: row.patient_id,
            source: row.source,
            primary_care_date: row.primary_care_date,
            hospital_date: row.hospital_date,
            diagnoses: [
                row.primary_care_dx,
                row.hospital_dx,
                row.hospital_secondary_dx,
                row.supplementary_dx,
            ],
            age: row.age.and_then(|v| i32::try_from(v).ok()),
            age_risk: flag(row.age_risk),
            dom: flag(row.dom),
            subsid: flag(row.subsid),
            n_preg: row.n_preg.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0),
            termination: row.fin_g,
            episode_start: row.ref_start,
            outcome: row.outcome,
        }
    }
}

/// The linked visits, cached between steps.
pub const VISITS_FILE: &str = "visits.bin";
/// The visit-level table.
pub const VISIT_TABLE_FILE: &str = "pregnancy_by_visit.csv";

/// Columns the visit-level table must have.
pub const VISIT_TABLE_COLUMNS: &[&str] = &[
    "PSTV01", "source", "FKP03", "FKL03", "combined_date", "FKP14A", "FKL15A", "FKL17A", "FKL24A",
    "age", "age_risk", "dom", "subsid", "n_preg", "fin_g", "ref_start",
];

/// The linked visits, with a pre-built index for the patient key.
///
/// Visits without a patient key are kept (they matter for quality control) but are not indexed.
#[derive(Debug, Clone)]
pub struct Visits {
    els: Arc<Vec<Visit>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Visits {
    pub fn new(els: Vec<Visit>) -> Self {
        let mut this = Visits {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    /// Load the visit-level table written by `save_table`.
    pub fn load_table(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_columns(path, VISIT_TABLE_COLUMNS)?;
        let rows: Vec<VisitRow> = load_csv(path)?;
        Ok(Self::new(rows.into_iter().map(Into::into).collect()))
    }

    /// Write the visit-level table as csv.
    pub fn save_table(&self, path: impl AsRef<Path>) -> Result {
        save_csv(self.els.iter().map(VisitRow::from), path)
    }

    /// Write a subset of visits (by index) in the visit-level table format.
    pub fn save_table_rows(&self, idxs: &[usize], path: impl AsRef<Path>) -> Result {
        save_csv(
            idxs.iter().map(|idx| VisitRow::from(&self.els[*idx])),
            path,
        )
    }

    pub fn visits_for_patient(
        &self,
        patient_id: PatientId,
    ) -> impl Iterator<Item = &Visit> + Clone + '_ {
        let idxs = match self.id_idx.get(&patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| &self.els[*idx]))
    }

    /// All patient keys, in order.
    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.id_idx.keys().copied()
    }

    pub fn patient_count(&self) -> usize {
        self.id_idx.len()
    }

    /// Get a `Visits` object containing only visits that match the filter.
    pub fn filter(&self, f: impl Fn(&Visit) -> bool) -> Self {
        Visits::new(self.els.iter().filter(|v| f(v)).cloned().collect())
    }

    /// Segment each patient's visits into pregnancy episodes, and record the result on the
    /// visits.
    ///
    /// Any episode information already present is replaced.
    pub fn assign_episodes(&mut self, segmenter: &Segmenter) -> Episodes {
        let els = Arc::make_mut(&mut self.els);
        for visit in els.iter_mut() {
            visit.clear_episode();
        }

        let mut episodes = Vec::new();
        for (patient_id, idxs) in self.id_idx.iter() {
            let events: Vec<_> = idxs
                .iter()
                .map(|idx| episode::VisitEvent::from(&els[*idx]))
                .collect();
            let segmented = segmenter.segment(*patient_id, &events);
            for (idx, assignment) in idxs.iter().zip(segmented.assignments.iter()) {
                let Some(assignment) = assignment else {
                    continue
                };
                let visit = &mut els[*idx];
                visit.n_preg = Some(assignment.order);
                if assignment.anchor {
                    let episode = &segmented.episodes[assignment.order as usize - 1];
                    visit.termination = Some(episode.termination);
                    visit.episode_start = Some(episode.start);
                    visit.outcome = Some(episode.outcome);
                }
            }
            episodes.extend(segmented.episodes);
        }
        event!(
            Level::INFO,
            "found {} pregnancy episodes for {} patients",
            episodes.len(),
            self.id_idx.len()
        );
        Episodes::new(episodes)
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, visit) in self.els.iter().enumerate() {
            if let Some(patient_id) = visit.patient_id {
                self.id_idx
                    .entry(patient_id)
                    .or_insert_with(Vec::new)
                    .push(idx);
            }
        }
    }
}

impl Deref for Visits {
    type Target = [Visit];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl<'a> IntoIterator for &'a Visits {
    type IntoIter = <&'a [Visit] as IntoIterator>::IntoIter;
    type Item = &'a Visit;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Visit> for Visits {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Visit>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Load data into memory.
fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        create_parent(path)?;
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(contents, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Load a csv file, deserializing each row.
pub fn load_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening \"{}\"", path.display()))?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Write rows to a csv file with a header row.
pub fn save_csv<T: Serialize>(rows: impl IntoIterator<Item = T>, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(rows: impl IntoIterator<Item = T>, path: &Path) -> Result {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "csv")?;
    create_parent(path)?;
    inner(rows, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Open a csv file for writing records by hand.
pub(crate) fn csv_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    check_extension(path, "csv")?;
    create_parent(path)?;
    csv::Writer::from_path(path)
        .with_context(|| format!("unable to create \"{}\"", path.display()))
}

/// Check a csv file has all the columns we need, before we start reading it.
///
/// All missing columns are reported at once.
pub fn check_columns(path: impl AsRef<Path>, required: &[&str]) -> Result {
    let path = path.as_ref();
    let headers = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .and_then(|mut reader| reader.headers().cloned())
        .with_context(|| format!("reading header of \"{}\"", path.display()))?;
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    ensure!(
        missing.is_empty(),
        "\"{}\" is missing required column(s): {}",
        path.display(),
        missing.join(", ")
    );
    Ok(())
}

fn create_parent(path: &Path) -> Result {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("could not create parent")?;
    }
    if util::path_exists(path)? {
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(())
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
