//! Pregnancy-level tables: one row per patient for a given pregnancy order.
//!
//! Every visit of a patient is classified against the episode of the chosen order, and the
//! patient's visits are collapsed into one row of exposure flags.
use crate::{
    conditions::Conditions,
    csv_writer,
    episode::{Episode, Episodes, Segmenter},
    fold::{CappedSum, Fold, Max, Min},
    util::{parse_patient_id, parse_whole},
    PatientId, Visits,
};
use qu::ick_use::*;
use std::{collections::HashMap, fs, ops::Deref, path::Path, sync::Arc};

/// The columns before the exposure flags, in order.
pub const BASE_COLUMNS: [&str; 7] = [
    "PSTV01", "subsid", "age", "dom", "age_risk", "n_preg", "ref_year",
];

/// True for exposure flag columns (`b_..`, `c_..`, `a_..`).
pub fn is_flag_column(name: &str) -> bool {
    name.len() > 2 && (name.starts_with("b_") || name.starts_with("c_") || name.starts_with("a_"))
}

/// One pregnancy.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRow {
    pub patient_id: Option<PatientId>,
    pub subsid: Option<u8>,
    pub age: Option<i32>,
    pub dom: Option<u8>,
    pub age_risk: Option<u8>,
    pub n_preg: Option<u32>,
    pub ref_year: Option<i32>,
    /// Values for the table's flag columns.
    pub flags: Vec<Option<u8>>,
}

impl CohortRow {
    fn record(&self) -> Vec<String> {
        fn cell<T: ToString>(v: Option<T>) -> String {
            v.map(|v| v.to_string()).unwrap_or_default()
        }
        let mut record = vec![
            cell(self.patient_id),
            cell(self.subsid),
            cell(self.age),
            cell(self.dom),
            cell(self.age_risk),
            cell(self.n_preg),
            cell(self.ref_year),
        ];
        record.extend(self.flags.iter().copied().map(cell));
        record
    }

    /// True if any patient detail is missing.
    pub fn demographics_missing(&self) -> bool {
        self.patient_id.is_none()
            || self.age.is_none()
            || self.age_risk.is_none()
            || self.dom.is_none()
            || self.subsid.is_none()
    }
}

/// Pregnancies with a shared set of flag columns.
#[derive(Debug, Clone)]
pub struct CohortTable {
    flag_columns: Arc<Vec<String>>,
    rows: Vec<CohortRow>,
}

impl CohortTable {
    pub fn new(flag_columns: Vec<String>, rows: Vec<CohortRow>) -> Result<Self> {
        for (idx, row) in rows.iter().enumerate() {
            ensure!(
                row.flags.len() == flag_columns.len(),
                "row {} has {} flags, expected {}",
                idx,
                row.flags.len(),
                flag_columns.len()
            );
        }
        Ok(Self {
            flag_columns: Arc::new(flag_columns),
            rows,
        })
    }

    pub fn flag_columns(&self) -> &[String] {
        &self.flag_columns
    }

    pub fn flag_index(&self, column: &str) -> Option<usize> {
        self.flag_columns.iter().position(|c| c == column)
    }

    /// The value of the named flag in `row`. `None` if missing or there's no such column.
    pub fn flag(&self, row: &CohortRow, column: &str) -> Option<u8> {
        self.flag_index(column).and_then(|idx| row.flags[idx])
    }

    pub fn rows(&self) -> &[CohortRow] {
        &self.rows
    }

    /// A table with the same columns and only rows that match the filter.
    pub fn filter(&self, f: impl Fn(&CohortRow) -> bool) -> Self {
        Self {
            flag_columns: self.flag_columns.clone(),
            rows: self.rows.iter().filter(|row| f(row)).cloned().collect(),
        }
    }

    pub fn retain(&mut self, f: impl Fn(&CohortRow) -> bool) {
        self.rows.retain(f)
    }

    /// Stack tables with identical columns.
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a CohortTable>) -> Result<Self> {
        let mut tables = tables.into_iter();
        let Some(first) = tables.next() else {
            bail!("no tables to join")
        };
        let mut out = first.clone();
        for table in tables {
            ensure!(
                table.flag_columns == out.flag_columns,
                "can't join tables with different columns ({} vs {} columns)",
                BASE_COLUMNS.len() + table.flag_columns.len(),
                BASE_COLUMNS.len() + out.flag_columns.len()
            );
            out.rows.extend(table.rows.iter().cloned());
        }
        event!(
            Level::INFO,
            "joined table has {} rows and {} columns",
            out.rows.len(),
            BASE_COLUMNS.len() + out.flag_columns.len()
        );
        Ok(out)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<CohortTable> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_reader(fs::File::open(path)?);
            let headers = reader.headers()?.clone();
            let position = |name: &str| headers.iter().position(|h| h == name);

            let missing: Vec<&str> = BASE_COLUMNS
                .iter()
                .copied()
                .filter(|c| position(*c).is_none())
                .collect();
            ensure!(
                missing.is_empty(),
                "missing required column(s): {}",
                missing.join(", ")
            );
            let base: Vec<usize> = BASE_COLUMNS.iter().filter_map(|c| position(*c)).collect();
            let (flag_idxs, flag_columns): (Vec<usize>, Vec<String>) = headers
                .iter()
                .enumerate()
                .filter(|(_, h)| is_flag_column(h))
                .map(|(idx, h)| (idx, h.to_owned()))
                .unzip();
            let ignored = headers.len() - base.len() - flag_idxs.len();
            if ignored > 0 {
                event!(Level::DEBUG, "ignoring {} unrecognised columns", ignored);
            }

            let mut rows = Vec::new();
            let mut odd_flags = 0;
            for (line, record) in reader.records().enumerate() {
                let record = record?;
                let field = |idx: usize| record.get(idx).unwrap_or("");
                let whole = |idx: usize| parse_whole(field(idx));
                let patient_id = parse_patient_id(field(base[0]))
                    .map_err(Error::msg)
                    .with_context(|| format!("on row {}", line + 1))?;
                let flags = flag_idxs
                    .iter()
                    .map(|idx| {
                        let value = whole(*idx);
                        match value {
                            Some(0) => Some(0),
                            Some(1) => Some(1),
                            Some(_) => {
                                odd_flags += 1;
                                None
                            }
                            None => None,
                        }
                    })
                    .collect();
                rows.push(CohortRow {
                    patient_id,
                    subsid: whole(base[1]).and_then(|v| u8::try_from(v).ok()),
                    age: whole(base[2]).and_then(|v| i32::try_from(v).ok()),
                    dom: whole(base[3]).and_then(|v| u8::try_from(v).ok()),
                    age_risk: whole(base[4]).and_then(|v| u8::try_from(v).ok()),
                    n_preg: whole(base[5]).and_then(|v| u32::try_from(v).ok()),
                    ref_year: whole(base[6]).and_then(|v| i32::try_from(v).ok()),
                    flags,
                });
            }
            if odd_flags > 0 {
                event!(
                    Level::WARN,
                    "{} flag values other than 0 or 1 treated as missing",
                    odd_flags
                );
            }
            CohortTable::new(flag_columns, rows)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("while loading \"{}\"", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        fn inner(table: &CohortTable, path: &Path) -> Result {
            let mut writer = csv_writer(path)?;
            writer.write_record(
                BASE_COLUMNS
                    .iter()
                    .copied()
                    .chain(table.flag_columns.iter().map(String::as_str)),
            )?;
            for row in table.rows.iter() {
                writer.write_record(row.record())?;
            }
            writer.flush()?;
            Ok(())
        }
        let path = path.as_ref();
        inner(self, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
    }
}

impl Deref for CohortTable {
    type Target = [CohortRow];
    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

/// A cohort for one pregnancy order.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub order: u32,
    /// Whether first pregnancies from the washout year were dropped.
    pub washed: bool,
    pub table: CohortTable,
}

impl Cohort {
    /// `1st_washed.csv`, `2nd.csv`, ...
    pub fn file_name(&self) -> String {
        if self.washed {
            format!("{}_washed.csv", ordinal(self.order))
        } else {
            format!("{}.csv", ordinal(self.order))
        }
    }
}

/// `1st`, `2nd`, `3rd`, `4th`, ... `11th`, `12th`, `13th`, `21st`.
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Builds cohorts from segmented visits.
pub struct CohortBuilder<'a> {
    pub visits: &'a Visits,
    pub episodes: &'a Episodes,
    pub segmenter: &'a Segmenter,
    pub conditions: &'a Conditions,
}

impl<'a> CohortBuilder<'a> {
    /// One row per patient with an episode of this order, in patient order.
    pub fn build(&self, order: u32) -> CohortTable {
        let flag_columns = self.conditions.columns();
        let mut rows: Vec<CohortRow> = self
            .episodes
            .with_order(order)
            .map(|episode| self.row(episode, flag_columns.len()))
            .collect();
        rows.sort_by_key(|row| row.patient_id);
        event!(
            Level::INFO,
            "{} pregnancies of order {}",
            rows.len(),
            order
        );
        CohortTable {
            flag_columns: Arc::new(flag_columns),
            rows,
        }
    }

    /// Build all cohorts up to `max_order`, dropping first pregnancies that ended in
    /// `washout_year`.
    pub fn build_all(&self, max_order: u32, washout_year: Option<i32>) -> Vec<Cohort> {
        (1..=max_order)
            .map(|order| {
                let mut table = self.build(order);
                let washed = order == 1 && washout_year.is_some();
                if let (true, Some(year)) = (order == 1, washout_year) {
                    let dropped = washout(&mut table, year);
                    event!(
                        Level::INFO,
                        "washout: dropped {} first pregnancies ending in {}",
                        dropped,
                        year
                    );
                }
                Cohort {
                    order,
                    washed,
                    table,
                }
            })
            .collect()
    }

    fn row(&self, episode: &Episode, n_flags: usize) -> CohortRow {
        let mut flags = vec![CappedSum::default(); n_flags];
        let mut age = Min::default();
        let mut dom = Min::default();
        let mut age_risk = Min::default();
        let mut subsid = Max::default();

        for visit in self.visits.visits_for_patient(episode.patient_id) {
            age.push(visit.age);
            dom.push(visit.dom);
            age_risk.push(visit.age_risk);
            subsid.push(visit.subsid);

            let date = visit.clinical_date();
            let codes = visit.codes();
            let mut idx = 0;
            for group in self.conditions.iter() {
                let windows = group.policy().windows();
                if let (Some(date), true) = (date, group.matches(&codes)) {
                    if let Some(window) = self.segmenter.classify(date, episode, group.policy()) {
                        if let Some(offset) = windows.iter().position(|w| *w == window) {
                            flags[idx + offset].push(Some(1));
                        }
                    }
                }
                idx += windows.len();
            }
        }

        CohortRow {
            patient_id: Some(episode.patient_id),
            subsid: subsid.finish(),
            age: age.finish(),
            dom: dom.finish(),
            age_risk: age_risk.finish(),
            n_preg: Some(episode.order),
            ref_year: Some(episode.termination_year()),
            flags: flags.into_iter().map(|f| Some(f.finish())).collect(),
        }
    }
}

/// Drop rows whose pregnancy ended in `year`. Returns the number dropped.
pub fn washout(table: &mut CohortTable, year: i32) -> usize {
    let before = table.len();
    table.retain(|row| row.ref_year != Some(year));
    before - table.len()
}

/// Count rows per (patient, n_preg) key.
pub fn key_counts(table: &CohortTable) -> HashMap<(Option<PatientId>, Option<u32>), usize> {
    let mut counts = HashMap::new();
    for row in table.iter() {
        *counts.entry((row.patient_id, row.n_preg)).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SegmentationConfig, Source, Visit};
    use chrono::{Duration, NaiveDate};

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 1, 1).unwrap() + Duration::days(n)
    }

    fn visit(patient_id: PatientId, date: i64, codes: [&str; 4], age: i32) -> Visit {
        Visit {
            patient_id: Some(patient_id),
            source: Source::Hospital,
            primary_care_date: None,
            hospital_date: Some(day(date)),
            diagnoses: codes.map(|c| if c.is_empty() { None } else { Some(c.into()) }),
            age: Some(age),
            age_risk: crate::age_risk(Some(age)),
            dom: Some(1),
            subsid: Some(0),
            n_preg: None,
            termination: None,
            episode_start: None,
            outcome: None,
        }
    }

    #[test]
    fn ordinals() {
        let names: Vec<_> = [1, 2, 3, 4, 7, 11, 12, 13, 21, 22, 101].map(ordinal).to_vec();
        assert_eq!(
            names,
            ["1st", "2nd", "3rd", "4th", "7th", "11th", "12th", "13th", "21st", "22nd", "101st"]
        );
    }

    #[test]
    fn build_first_and_second() {
        let segmenter = Segmenter::new(&SegmentationConfig::default()).unwrap();
        let conditions = Conditions::builtin();
        let mut visits = Visits::new(vec![
            // chronic before the first pregnancy
            visit(1, -400, ["E11", "", "", ""], 25),
            // preeclampsia during the first pregnancy
            visit(1, -10, ["", "O14", "", ""], 26),
            // first pregnancy, delivered
            visit(1, 0, ["", "O80", "", ""], 26),
            // postpartum haemorrhage in the postpartum window: no pregnancy window
            visit(1, 20, ["", "O72", "", ""], 26),
            // second pregnancy, abortive
            visit(1, 400, ["O03", "", "", ""], 27),
            // another patient, no pregnancy
            visit(2, 0, ["J06", "", "", ""], 30),
        ]);
        let episodes = visits.assign_episodes(&segmenter);
        let builder = CohortBuilder {
            visits: &visits,
            episodes: &episodes,
            segmenter: &segmenter,
            conditions,
        };

        let first = builder.build(1);
        assert_eq!(first.len(), 1);
        let row = &first[0];
        assert_eq!(row.patient_id, Some(1));
        assert_eq!(row.age, Some(25));
        assert_eq!(row.n_preg, Some(1));
        assert_eq!(row.ref_year, Some(2019));
        assert_eq!(first.flag(row, "b_dm"), Some(1));
        assert_eq!(first.flag(row, "a_dm"), Some(0));
        assert_eq!(first.flag(row, "c_preecl"), Some(1));
        assert_eq!(first.flag(row, "c_normal"), Some(1));
        assert_eq!(first.flag(row, "c_pph"), Some(0));
        assert_eq!(first.flag(row, "a_pph"), Some(0));
        // the second pregnancy is after the first
        assert_eq!(first.flag(row, "a_abortive"), Some(1));

        let second = builder.build(2);
        let row = &second[0];
        assert_eq!(row.n_preg, Some(2));
        assert_eq!(row.ref_year, Some(2020));
        assert_eq!(second.flag(row, "c_abortive"), Some(1));
        assert_eq!(second.flag(row, "b_normal"), Some(1));
        assert_eq!(second.flag(row, "b_pph"), Some(1));
        assert_eq!(second.flag(row, "b_dm"), Some(1));

        assert!(builder.build(3).is_empty());

        let cohorts = builder.build_all(3, Some(2019));
        assert_eq!(cohorts[0].file_name(), "1st_washed.csv");
        assert!(cohorts[0].table.is_empty());
        assert_eq!(cohorts[1].file_name(), "2nd.csv");
        assert_eq!(cohorts[1].table.len(), 1);
        let all = CohortTable::concat(cohorts.iter().map(|c| &c.table)).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort.csv");
        let table = CohortTable::new(
            vec!["b_dm".into(), "c_abortive".into()],
            vec![
                CohortRow {
                    patient_id: Some(4),
                    subsid: Some(1),
                    age: Some(30),
                    dom: None,
                    age_risk: Some(0),
                    n_preg: Some(1),
                    ref_year: Some(2020),
                    flags: vec![Some(1), Some(0)],
                },
                CohortRow {
                    patient_id: None,
                    subsid: None,
                    age: None,
                    dom: None,
                    age_risk: None,
                    n_preg: None,
                    ref_year: None,
                    flags: vec![None, Some(1)],
                },
            ],
        )
        .unwrap();
        table.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("PSTV01,subsid,age,dom,age_risk,n_preg,ref_year,b_dm,c_abortive\n"));
        assert!(text.contains("4,1,30,,0,1,2020,1,0\n"));

        let loaded = CohortTable::load(&path).unwrap();
        assert_eq!(loaded.flag_columns(), table.flag_columns());
        assert_eq!(loaded.rows(), table.rows());
        assert!(loaded[1].demographics_missing());
    }

    #[test]
    fn load_requires_base_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "PSTV01,age,c_abortive\n1,30,1\n").unwrap();
        let err = format!("{:#}", CohortTable::load(&path).unwrap_err());
        assert!(err.contains("subsid"));
        assert!(err.contains("ref_year"));
    }

    #[test]
    fn concat_checks_columns() {
        let a = CohortTable::new(vec!["b_dm".into()], vec![]).unwrap();
        let b = CohortTable::new(vec!["a_dm".into()], vec![]).unwrap();
        assert!(CohortTable::concat([&a, &b]).is_err());
        assert!(CohortTable::concat([&a, &a]).is_ok());
    }
}
