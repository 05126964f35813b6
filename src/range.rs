use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open interval `[start, end)`. With no `end` the interval has no upper limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T> {
    start: T,
    end: Option<T>,
}

impl<T: Ord + fmt::Display> Range<T> {
    pub fn new(start: T, end: Option<T>) -> Result<Self> {
        match &end {
            Some(end) if *end <= start => bail!("empty range {} - {}", start, end),
            _ => Ok(Range { start, end }),
        }
    }
}

impl<T: Ord> Range<T> {
    pub fn contains(&self, val: &T) -> bool {
        *val >= self.start && self.end.as_ref().map_or(true, |end| val < end)
    }

    /// Like `contains`, but missing values are never in range.
    pub fn contains_opt(&self, val: Option<&T>) -> bool {
        val.map_or(false, |val| self.contains(val))
    }
}

impl<T> Range<T> {
    pub fn start(&self) -> &T {
        &self.start
    }

    pub fn end(&self) -> Option<&T> {
        self.end.as_ref()
    }
}

impl<T: fmt::Display> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.end {
            Some(end) => write!(f, "{} - {}", self.start, end),
            None => write!(f, "{}+", self.start),
        }
    }
}

/// Non-overlapping ranges for tallying values, e.g. age groups.
#[derive(Debug, Clone)]
pub struct Bands<T> {
    bands: Vec<Range<T>>,
}

impl<T: Ord + fmt::Display> Bands<T> {
    /// `bands` must be in order and must not overlap.
    pub fn new(bands: Vec<Range<T>>) -> Result<Self> {
        for pair in bands.windows(2) {
            let ordered = matches!(pair[0].end(), Some(end) if end <= pair[1].start());
            ensure!(ordered, "bands {} and {} overlap", pair[0], pair[1]);
        }
        Ok(Self { bands })
    }

    /// How many values fall in each band. Missing values and values outside every band are
    /// counted separately.
    pub fn tally(&self, values: impl IntoIterator<Item = Option<T>>) -> Tally<'_, T> {
        let mut counts = vec![0; self.bands.len()];
        let mut missing = 0;
        let mut outside = 0;
        for value in values {
            let Some(value) = value else {
                missing += 1;
                continue
            };
            match self.bands.iter().position(|band| band.contains(&value)) {
                Some(idx) => counts[idx] += 1,
                None => outside += 1,
            }
        }
        Tally {
            bands: &self.bands,
            counts,
            missing,
            outside,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tally<'a, T> {
    bands: &'a [Range<T>],
    counts: Vec<usize>,
    pub missing: usize,
    pub outside: usize,
}

impl<'a, T: fmt::Display> Tally<'a, T> {
    /// (label, count) for each band, then missing values if there were any.
    pub fn rows(&self) -> Vec<(String, usize)> {
        let mut rows: Vec<(String, usize)> = self
            .bands
            .iter()
            .zip(self.counts.iter())
            .map(|(band, count)| (band.to_string(), *count))
            .collect();
        if self.outside > 0 {
            rows.push(("other".into(), self.outside));
        }
        if self.missing > 0 {
            rows.push(("missing".into(), self.missing));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let r = Range::new(12, Some(56)).unwrap();
        assert!(!r.contains(&11));
        assert!(r.contains(&12));
        assert!(r.contains(&55));
        assert!(!r.contains(&56));
        assert!(!r.contains_opt(None));
        assert!(Range::new(5, Some(5)).is_err());

        let open = Range::new(35, None).unwrap();
        assert!(open.contains(&120));
        assert_eq!(open.to_string(), "35+");
    }

    #[test]
    fn tally() {
        let bands = Bands::new(vec![
            Range::new(12, Some(20)).unwrap(),
            Range::new(20, Some(36)).unwrap(),
            Range::new(36, None).unwrap(),
        ])
        .unwrap();
        let tally = bands.tally([Some(19), Some(20), None, Some(40), Some(8), Some(35)]);
        assert_eq!(
            tally.rows(),
            [
                ("12 - 20".to_string(), 1),
                ("20 - 36".to_string(), 2),
                ("36+".to_string(), 1),
                ("other".to_string(), 1),
                ("missing".to_string(), 1),
            ]
        );
    }

    #[test]
    fn overlapping_bands() {
        let bands = vec![
            Range::new(0, Some(20)).unwrap(),
            Range::new(18, None).unwrap(),
        ];
        assert!(Bands::new(bands).is_err());
    }
}
