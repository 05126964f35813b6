//! Describe the linked visits and the pregnancies found in them.
use crate::{Bands, Episodes, Outcome, Range, Source, Visits};
use qu::ick_use::*;
use std::collections::BTreeMap;
use term_data_table::{Cell, Row, Table};

/// Age bands matching the `age_risk` cut-offs.
pub fn age_bands() -> Result<Bands<i32>> {
    Bands::new(vec![
        Range::new(0, Some(20))?,
        Range::new(20, Some(36))?,
        Range::new(36, None)?,
    ])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub visits: usize,
    pub patients: usize,
    pub visits_by_source: BTreeMap<Source, usize>,
    pub episodes: usize,
    pub episodes_by_order: BTreeMap<u32, usize>,
    pub outcomes: BTreeMap<Outcome, usize>,
    /// (band, pregnancies) for the mother's age at the end of each pregnancy.
    pub ages: Vec<(String, usize)>,
}

impl Summary {
    /// `visits` must have had episodes assigned.
    pub fn new(visits: &Visits, episodes: &Episodes) -> Result<Self> {
        let mut visits_by_source = BTreeMap::new();
        for visit in visits.iter() {
            *visits_by_source.entry(visit.source).or_insert(0) += 1;
        }
        let mut outcomes = BTreeMap::new();
        for episode in episodes.iter() {
            *outcomes.entry(episode.outcome).or_insert(0) += 1;
        }
        let anchor_ages = visits
            .iter()
            .filter(|v| v.termination.is_some())
            .map(|v| v.age);
        let ages = age_bands()?.tally(anchor_ages).rows();
        Ok(Self {
            visits: visits.len(),
            patients: visits.patient_count(),
            visits_by_source,
            episodes: episodes.len(),
            episodes_by_order: episodes.count_by_order(),
            outcomes,
            ages,
        })
    }

    pub fn counts_table(&self) -> Table<'_> {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from(""))
                .with_cell(Cell::from("Count")),
        );
        let mut add = |label: String, count: usize| {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label))
                    .with_cell(Cell::from(count.to_string())),
            );
        };
        add("visits".into(), self.visits);
        for (source, count) in self.visits_by_source.iter() {
            add(format!("  from {}", source), *count);
        }
        add("patients".into(), self.patients);
        add("pregnancies".into(), self.episodes);
        for (outcome, count) in self.outcomes.iter() {
            add(format!("  ending in {}", outcome), *count);
        }
        table
    }

    pub fn orders_table(&self) -> Table<'_> {
        share_table(
            "Pregnancy",
            self.episodes,
            self.episodes_by_order
                .iter()
                .map(|(order, count)| (order.to_string(), *count)),
        )
    }

    pub fn ages_table(&self) -> Table<'_> {
        share_table(
            "Age",
            self.episodes,
            self.ages.iter().map(|(label, count)| (label.clone(), *count)),
        )
    }
}

fn share_table(title: &str, total: usize, rows: impl Iterator<Item = (String, usize)>) -> Table<'_> {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from(title))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (label, count) in rows {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    count as f64 / total.max(1) as f64 * 100.
                ))),
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SegmentationConfig, Segmenter, Visit};
    use chrono::NaiveDate;

    fn visit(patient_id: u64, age: Option<i32>, date: (i32, u32, u32), code: &str) -> Visit {
        Visit {
            patient_id: Some(patient_id),
            source: Source::Hospital,
            primary_care_date: None,
            hospital_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            diagnoses: [None, Some(code.into()), None, None],
            age,
            age_risk: crate::age_risk(age),
            dom: Some(0),
            subsid: Some(0),
            n_preg: None,
            termination: None,
            episode_start: None,
            outcome: None,
        }
    }

    #[test]
    fn counts() {
        let mut visits = Visits::new(vec![
            visit(1, Some(19), (2018, 1, 1), "O03"),
            visit(1, Some(21), (2020, 1, 1), "O80"),
            visit(1, Some(21), (2020, 2, 1), "Z34"),
            visit(2, None, (2019, 5, 1), "O82"),
        ]);
        let segmenter = Segmenter::new(&SegmentationConfig::default()).unwrap();
        let episodes = visits.assign_episodes(&segmenter);
        let summary = Summary::new(&visits, &episodes).unwrap();
        assert_eq!(summary.visits, 4);
        assert_eq!(summary.patients, 2);
        assert_eq!(summary.episodes, 3);
        assert_eq!(summary.episodes_by_order[&1], 2);
        assert_eq!(summary.episodes_by_order[&2], 1);
        assert_eq!(summary.outcomes[&Outcome::Abortive], 1);
        assert_eq!(summary.outcomes[&Outcome::Delivery], 2);
        let ages: Vec<usize> = summary.ages.iter().map(|(_, count)| *count).collect();
        assert_eq!(ages, [1, 1, 0, 1]);
        assert_eq!(summary.ages[3].0, "missing");
    }
}
