//! Reconstructing pregnancy episodes from termination diagnoses.
//!
//! A visit *qualifies* if one of its diagnoses is an abortive or a delivery code. For each
//! patient, qualifying visits are walked in date order, and a visit starts a new episode (is an
//! *anchor*) if it is the first, or if it is at least `min_gap_days` after the previous
//! qualifying visit. Other qualifying visits are folded into the current episode.
use crate::{
    config::SegmentationConfig,
    icd10::{CodeSet, CodeSetMatcher, IcdCode},
    PatientId, Visit, Visits,
};
use chrono::{Datelike, Duration, NaiveDate};
use itertools::Either;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, iter, ops::Deref, sync::Arc};

/// How a pregnancy ended.
///
/// The order matters: when a visit has both kinds of code, the smaller (abortive) wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Abortive,
    Delivery,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Outcome::Abortive => "abortive",
            Outcome::Delivery => "delivery",
        })
    }
}

/// The diagnosis fields of a visit, in the order they are checked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosisField {
    PrimaryCare = 0,
    Hospital = 1,
    HospitalSecondary = 2,
    Supplementary = 3,
}

impl DiagnosisField {
    pub const ALL: [DiagnosisField; 4] = [
        DiagnosisField::PrimaryCare,
        DiagnosisField::Hospital,
        DiagnosisField::HospitalSecondary,
        DiagnosisField::Supplementary,
    ];
}

/// The two (disjoint) sets of codes that mark the end of a pregnancy.
#[derive(Debug, Clone)]
pub struct OutcomeCodes {
    abortive: CodeSetMatcher,
    delivery: CodeSetMatcher,
}

impl OutcomeCodes {
    pub fn new(abortive: CodeSet, delivery: CodeSet) -> Result<Self> {
        let overlap = &abortive - &(&abortive - &delivery);
        ensure!(
            overlap.is_empty(),
            "abortive and delivery codes overlap: {}",
            overlap
        );
        Ok(Self {
            abortive: abortive.into_matcher(),
            delivery: delivery.into_matcher(),
        })
    }

    /// Abortive O00-O07, delivery O80-O84.
    pub fn standard() -> Result<Self> {
        Self::new(CodeSet::parse(["O00-O07"])?, CodeSet::parse(["O80-O84"])?)
    }

    pub fn abortive(&self) -> &CodeSet {
        &self.abortive
    }

    pub fn delivery(&self) -> &CodeSet {
        &self.delivery
    }

    /// The outcome a visit's codes indicate, and the first field that indicated it.
    ///
    /// Abortive codes take precedence over delivery codes, wherever they appear.
    pub fn classify(&self, codes: &[Option<IcdCode>; 4]) -> Option<(Outcome, DiagnosisField)> {
        let first_match = |matcher: &CodeSetMatcher| {
            DiagnosisField::ALL
                .into_iter()
                .zip(codes.iter())
                .find_map(|(field, code)| match code {
                    Some(code) if matcher.contains(*code) => Some(field),
                    _ => None,
                })
        };
        if let Some(field) = first_match(&self.abortive) {
            return Some((Outcome::Abortive, field));
        }
        first_match(&self.delivery).map(|field| (Outcome::Delivery, field))
    }
}

/// The part of a visit the segmenter looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitEvent {
    pub date: Option<NaiveDate>,
    pub codes: [Option<IcdCode>; 4],
}

impl From<&Visit> for VisitEvent {
    fn from(visit: &Visit) -> Self {
        Self {
            date: visit.clinical_date(),
            codes: visit.codes(),
        }
    }
}

/// One reconstructed pregnancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub patient_id: PatientId,
    /// 1 for the patient's first pregnancy, 2 for the second, ...
    pub order: u32,
    /// The clinical date of the anchor visit.
    pub termination: NaiveDate,
    pub start: NaiveDate,
    pub outcome: Outcome,
}

impl Episode {
    pub fn termination_year(&self) -> i32 {
        self.termination.year()
    }
}

/// Where a qualifying visit ended up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub order: u32,
    pub anchor: bool,
}

/// The result of segmenting one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientEpisodes {
    pub episodes: Vec<Episode>,
    /// One entry per input event, `None` for events that don't qualify.
    pub assignments: Vec<Option<Assignment>>,
}

/// A time window relative to an episode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    Before,
    During,
    After,
}

impl Window {
    /// The prefix of exposure columns for this window.
    pub fn prefix(self) -> &'static str {
        match self {
            Window::Before => "b_",
            Window::During => "c_",
            Window::After => "a_",
        }
    }

    pub fn column(self, group: &str) -> String {
        format!("{}{}", self.prefix(), group)
    }
}

/// How visits are placed into windows around an episode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPolicy {
    /// Before = up to and including termination, after = later.
    Chronic,
    /// Before the start, during the pregnancy (inclusive), after termination.
    Infectious,
    /// Like `Infectious`, but "after" only begins once the postpartum period is over. Visits in
    /// the postpartum period are in no window.
    Pregnancy,
}

impl WindowPolicy {
    /// The windows this policy can produce, in column order.
    pub fn windows(self) -> &'static [Window] {
        match self {
            WindowPolicy::Chronic => &[Window::Before, Window::After],
            WindowPolicy::Infectious | WindowPolicy::Pregnancy => {
                &[Window::Before, Window::During, Window::After]
            }
        }
    }
}

/// Turns visits into episodes, and classifies visits against an episode.
#[derive(Debug, Clone)]
pub struct Segmenter {
    outcomes: OutcomeCodes,
    min_gap: Duration,
    abortive_lookback: Duration,
    delivery_lookback: Duration,
    postpartum: Duration,
}

impl Segmenter {
    pub fn new(config: &SegmentationConfig) -> Result<Self> {
        Ok(Self::with_outcomes(config, OutcomeCodes::standard()?))
    }

    pub fn with_outcomes(config: &SegmentationConfig, outcomes: OutcomeCodes) -> Self {
        Self {
            outcomes,
            min_gap: Duration::days(config.min_gap_days),
            abortive_lookback: Duration::days(config.abortive_lookback_days),
            delivery_lookback: Duration::days(config.delivery_lookback_days),
            postpartum: Duration::days(config.postpartum_days),
        }
    }

    pub fn outcomes(&self) -> &OutcomeCodes {
        &self.outcomes
    }

    /// Split one patient's visits into episodes.
    ///
    /// Events without a date are ignored. Qualifying events on the same date are ordered
    /// abortive first, then by diagnosis field, then by input position, so the result doesn't
    /// depend on the order the visits were loaded in (apart from exact duplicates).
    pub fn segment(&self, patient_id: PatientId, events: &[VisitEvent]) -> PatientEpisodes {
        let mut qualifying: Vec<(NaiveDate, Outcome, DiagnosisField, usize)> = events
            .iter()
            .enumerate()
            .filter_map(|(idx, evt)| {
                let date = evt.date?;
                let (outcome, field) = self.outcomes.classify(&evt.codes)?;
                Some((date, outcome, field, idx))
            })
            .collect();
        qualifying.sort();

        let mut episodes = Vec::new();
        let mut assignments = vec![None; events.len()];
        let mut prev: Option<NaiveDate> = None;
        for (date, outcome, _, idx) in qualifying {
            let anchor = match prev {
                Some(prev) => date - prev >= self.min_gap,
                None => true,
            };
            if anchor {
                episodes.push(Episode {
                    patient_id,
                    order: episodes.len() as u32 + 1,
                    termination: date,
                    start: self.start_date(date, outcome),
                    outcome,
                });
            }
            assignments[idx] = Some(Assignment {
                order: episodes.len() as u32,
                anchor,
            });
            prev = Some(date);
        }
        PatientEpisodes {
            episodes,
            assignments,
        }
    }

    /// When a pregnancy that ended on `termination` is assumed to have started.
    pub fn start_date(&self, termination: NaiveDate, outcome: Outcome) -> NaiveDate {
        match outcome {
            Outcome::Abortive => termination - self.abortive_lookback,
            Outcome::Delivery => termination - self.delivery_lookback,
        }
    }

    /// Which window of `episode` a visit on `date` falls in, if any.
    pub fn classify(&self, date: NaiveDate, episode: &Episode, policy: WindowPolicy) -> Option<Window> {
        let Episode {
            start, termination, ..
        } = *episode;
        match policy {
            WindowPolicy::Chronic if date <= termination => Some(Window::Before),
            WindowPolicy::Chronic => Some(Window::After),
            _ if date < start => Some(Window::Before),
            _ if date <= termination => Some(Window::During),
            WindowPolicy::Infectious => Some(Window::After),
            WindowPolicy::Pregnancy if date - termination > self.postpartum => Some(Window::After),
            WindowPolicy::Pregnancy => None,
        }
    }
}

/// All episodes, indexed by patient.
#[derive(Debug, Clone)]
pub struct Episodes {
    els: Arc<Vec<Episode>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Episodes {
    pub fn new(els: Vec<Episode>) -> Self {
        let mut this = Self {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    /// Recover the episodes recorded on the anchor visits of a segmented visit table.
    pub fn from_visits(visits: &Visits) -> Result<Self> {
        let mut els = Vec::new();
        for visit in visits.iter() {
            let (Some(patient_id), Some(order), Some(termination), Some(start)) = (
                visit.patient_id,
                visit.n_preg,
                visit.termination,
                visit.episode_start,
            ) else {
                continue;
            };
            let outcome = visit.outcome.with_context(|| {
                format!(
                    "episode {} of patient {} has no outcome recorded",
                    order, patient_id
                )
            })?;
            els.push(Episode {
                patient_id,
                order,
                termination,
                start,
                outcome,
            });
        }
        els.sort_by_key(|e| (e.patient_id, e.order));
        let before = els.len();
        els.dedup_by_key(|e| (e.patient_id, e.order));
        if els.len() != before {
            event!(
                Level::WARN,
                "{} repeated episode anchors ignored",
                before - els.len()
            );
        }
        Ok(Self::new(els))
    }

    pub fn for_patient(&self, patient_id: PatientId) -> impl Iterator<Item = &Episode> + Clone + '_ {
        let idxs = match self.id_idx.get(&patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| &self.els[*idx]))
    }

    /// The patient's `order`th episode.
    pub fn get(&self, patient_id: PatientId, order: u32) -> Option<&Episode> {
        self.for_patient(patient_id).find(|e| e.order == order)
    }

    /// Every patient's `order`th episode, by patient.
    pub fn with_order(&self, order: u32) -> impl Iterator<Item = &Episode> + '_ {
        self.els.iter().filter(move |e| e.order == order)
    }

    /// How many patients have each order.
    pub fn count_by_order(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for episode in self.els.iter() {
            *counts.entry(episode.order).or_insert(0) += 1;
        }
        counts
    }

    pub fn max_order(&self) -> Option<u32> {
        self.els.iter().map(|e| e.order).max()
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, episode) in self.els.iter().enumerate() {
            self.id_idx
                .entry(episode.patient_id)
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl Deref for Episodes {
    type Target = [Episode];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> Segmenter {
        Segmenter::new(&SegmentationConfig::default()).unwrap()
    }

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() + Duration::days(n)
    }

    fn evt(date: Option<NaiveDate>, codes: [&str; 4]) -> VisitEvent {
        VisitEvent {
            date,
            codes: codes.map(IcdCode::normalize),
        }
    }

    fn abortive(n: i64) -> VisitEvent {
        evt(Some(day(n)), ["O03", "", "", ""])
    }

    fn delivery(n: i64) -> VisitEvent {
        evt(Some(day(n)), ["", "O80", "", ""])
    }

    #[test]
    fn gap_of_200_days_is_two_episodes() {
        let out = segmenter().segment(1, &[abortive(0), abortive(200)]);
        assert_eq!(out.episodes.len(), 2);
        assert_eq!(out.episodes[1].order, 2);
        assert_eq!(out.episodes[1].termination, day(200));
        assert_eq!(
            out.assignments,
            [
                Some(Assignment { order: 1, anchor: true }),
                Some(Assignment { order: 2, anchor: true })
            ]
        );
    }

    #[test]
    fn gap_of_100_days_is_folded() {
        let out = segmenter().segment(1, &[abortive(100), abortive(0)]);
        assert_eq!(out.episodes.len(), 1);
        assert_eq!(out.episodes[0].termination, day(0));
        assert_eq!(
            out.assignments,
            [
                Some(Assignment { order: 1, anchor: false }),
                Some(Assignment { order: 1, anchor: true })
            ]
        );
    }

    #[test]
    fn exact_gap_starts_new_episode() {
        let out = segmenter().segment(1, &[delivery(0), delivery(180)]);
        assert_eq!(out.episodes.len(), 2);
        let out = segmenter().segment(1, &[delivery(0), delivery(179)]);
        assert_eq!(out.episodes.len(), 1);
    }

    #[test]
    fn gap_is_measured_from_previous_qualifying_visit() {
        // each step is < 180 days, so everything chains into one episode
        let out = segmenter().segment(1, &[abortive(0), abortive(150), abortive(300)]);
        assert_eq!(out.episodes.len(), 1);
        assert!(out.assignments.iter().all(|a| a.unwrap().order == 1));
    }

    #[test]
    fn start_dates() {
        let seg = segmenter();
        let out = seg.segment(7, &[delivery(0)]);
        assert_eq!(
            out.episodes,
            [Episode {
                patient_id: 7,
                order: 1,
                termination: day(0),
                start: day(-280),
                outcome: Outcome::Delivery,
            }]
        );
        let out = seg.segment(7, &[abortive(0)]);
        assert_eq!(out.episodes[0].start, day(-140));
    }

    #[test]
    fn abortive_takes_precedence() {
        let seg = segmenter();
        let both = evt(Some(day(0)), ["O80", "", "", "O02"]);
        let out = seg.segment(1, &[both]);
        assert_eq!(out.episodes[0].outcome, Outcome::Abortive);
        assert_eq!(out.episodes[0].start, day(-140));
        assert_eq!(
            seg.outcomes().classify(&["O80", "", "", "O02"].map(IcdCode::normalize)),
            Some((Outcome::Abortive, DiagnosisField::Supplementary))
        );
    }

    #[test]
    fn same_day_tie_is_order_independent() {
        let seg = segmenter();
        let a = seg.segment(1, &[delivery(0), abortive(0)]);
        let b = seg.segment(1, &[abortive(0), delivery(0)]);
        assert_eq!(a.episodes, b.episodes);
        assert_eq!(a.episodes[0].outcome, Outcome::Abortive);
    }

    #[test]
    fn ignores_undated_and_non_qualifying() {
        let seg = segmenter();
        let out = seg.segment(
            1,
            &[
                evt(None, ["O03", "", "", ""]),
                evt(Some(day(0)), ["E11", "O08", "", ""]),
                evt(Some(day(5)), ["o039", "", "", ""]),
            ],
        );
        assert_eq!(out.episodes.len(), 1);
        assert_eq!(out.episodes[0].termination, day(5));
        assert_eq!(out.assignments[0], None);
        assert_eq!(out.assignments[1], None);
        assert!(seg.segment(1, &[]).episodes.is_empty());
    }

    #[test]
    fn idempotent() {
        let seg = segmenter();
        let events = [abortive(400), delivery(10), abortive(30), delivery(900)];
        assert_eq!(seg.segment(3, &events), seg.segment(3, &events));
    }

    #[test]
    fn windows() {
        let seg = segmenter();
        let episode = seg.segment(1, &[delivery(0)]).episodes.remove(0);

        assert_eq!(
            seg.classify(day(-280), &episode, WindowPolicy::Pregnancy),
            Some(Window::During)
        );
        assert_eq!(
            seg.classify(day(-281), &episode, WindowPolicy::Pregnancy),
            Some(Window::Before)
        );
        assert_eq!(
            seg.classify(day(0), &episode, WindowPolicy::Pregnancy),
            Some(Window::During)
        );
        assert_eq!(seg.classify(day(30), &episode, WindowPolicy::Pregnancy), None);
        assert_eq!(
            seg.classify(day(31), &episode, WindowPolicy::Pregnancy),
            Some(Window::After)
        );

        assert_eq!(
            seg.classify(day(0), &episode, WindowPolicy::Chronic),
            Some(Window::Before)
        );
        assert_eq!(
            seg.classify(day(1), &episode, WindowPolicy::Chronic),
            Some(Window::After)
        );

        assert_eq!(
            seg.classify(day(-281), &episode, WindowPolicy::Infectious),
            Some(Window::Before)
        );
        assert_eq!(
            seg.classify(day(-280), &episode, WindowPolicy::Infectious),
            Some(Window::During)
        );
        assert_eq!(
            seg.classify(day(1), &episode, WindowPolicy::Infectious),
            Some(Window::After)
        );
    }

    #[test]
    fn overlapping_outcome_codes_rejected() {
        let abortive = CodeSet::parse(["O00-O08"]).unwrap();
        let delivery = CodeSet::parse(["O08", "O80"]).unwrap();
        assert!(OutcomeCodes::new(abortive, delivery).is_err());
    }

    #[test]
    fn episode_index() {
        let seg = segmenter();
        let mut all = seg.segment(1, &[abortive(0), abortive(400)]).episodes;
        all.extend(seg.segment(2, &[delivery(0)]).episodes);
        let episodes = Episodes::new(all);
        assert_eq!(episodes.for_patient(1).count(), 2);
        assert_eq!(episodes.get(1, 2).unwrap().termination, day(400));
        assert!(episodes.get(2, 2).is_none());
        assert_eq!(episodes.with_order(1).count(), 2);
        assert_eq!(episodes.count_by_order().get(&2), Some(&1));
        assert_eq!(episodes.max_order(), Some(2));
    }
}
