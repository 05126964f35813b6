//! Run configuration, read from a TOML file.
//!
//! Every field has a default, so an empty (or absent) file gives the standard analysis.

use crate::{util, Range};
use chrono::{Duration, NaiveDate};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub segmentation: SegmentationConfig,
    pub cohort: CohortConfig,
    pub qc: QcConfig,
    pub odds: OddsConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&text)?;
            config.validate()?;
            Ok(config)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }

    /// Use the defaults if there is no config file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if util::path_exists(path)? {
            Self::load(path)
        } else {
            event!(
                Level::INFO,
                "no config at \"{}\", using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result {
        let seg = &self.segmentation;
        ensure!(seg.min_gap_days > 0, "`min_gap_days` must be positive");
        ensure!(
            seg.abortive_lookback_days >= 0 && seg.delivery_lookback_days >= 0,
            "lookback periods can't be negative"
        );
        ensure!(seg.postpartum_days >= 0, "`postpartum_days` can't be negative");
        ensure!(self.cohort.max_order >= 1, "`max_order` must be at least 1");
        ensure!(
            self.qc.min_age <= self.qc.max_age,
            "`min_age` must not be greater than `max_age`"
        );
        ensure!(
            self.qc.date_min <= self.qc.date_max,
            "`date_min` must not be after `date_max`"
        );
        self.odds.z()?;
        Ok(())
    }
}

/// Where inputs are read from and outputs written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Primary care visits.
    pub primary_care: PathBuf,
    /// Hospital visits.
    pub hospital: PathBuf,
    /// Extra hospital diagnoses, keyed by hospital visit.
    pub hospital_secondary: PathBuf,
    pub membership: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            input_dir: "data/input".into(),
            output_dir: "data/output".into(),
            primary_care: "fktp.csv".into(),
            hospital: "fkrtl.csv".into(),
            hospital_secondary: "fkrtl_sekunder.csv".into(),
            membership: "kepesertaan.csv".into(),
        }
    }
}

impl Paths {
    /// Note: No protection from escaping the root directory.
    pub fn input(&self, name: impl AsRef<Path>) -> PathBuf {
        self.input_dir.join(name)
    }

    /// Note: No protection from escaping the root directory.
    pub fn output(&self, name: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentationConfig {
    /// Termination visits closer than this to the previous one belong to the same pregnancy.
    pub min_gap_days: i64,
    pub abortive_lookback_days: i64,
    pub delivery_lookback_days: i64,
    /// Pregnancy conditions are only "after" once this many days have passed.
    pub postpartum_days: i64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_gap_days: 180,
            abortive_lookback_days: 140,
            delivery_lookback_days: 280,
            postpartum_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CohortConfig {
    /// Build cohorts for pregnancy orders `1..=max_order`.
    pub max_order: u32,
    /// Drop first pregnancies that ended in this year.
    pub washout_year: Option<i32>,
    /// A condition dictionary to use instead of the built-in one.
    pub conditions: Option<PathBuf>,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            max_order: 7,
            washout_year: Some(2015),
            conditions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QcConfig {
    pub min_age: i32,
    pub max_age: i32,
    pub date_min: NaiveDate,
    pub date_max: NaiveDate,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            min_age: 12,
            max_age: 55,
            date_min: NaiveDate::from_ymd_opt(2015, 1, 1).expect("valid date"),
            date_max: NaiveDate::from_ymd_opt(2023, 12, 31).expect("valid date"),
        }
    }
}

impl QcConfig {
    /// Plausible ages, both ends inclusive.
    pub fn age_range(&self) -> Result<Range<i32>> {
        Range::new(self.min_age, Some(self.max_age + 1))
    }

    /// The study period, both ends inclusive.
    pub fn date_range(&self) -> Result<Range<NaiveDate>> {
        Range::new(self.date_min, Some(self.date_max + Duration::days(1)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OddsConfig {
    /// Confidence level of the intervals, e.g. `0.95`.
    pub confidence: Option<f64>,
    /// Critical value used directly. Takes priority over `confidence`.
    pub z: Option<f64>,
}

impl OddsConfig {
    pub const DEFAULT_Z: f64 = 1.96;

    /// The critical value for the confidence intervals.
    pub fn z(&self) -> Result<f64> {
        if let Some(z) = self.z {
            ensure!(z.is_finite() && z > 0., "`z` must be a positive number");
            return Ok(z);
        }
        match self.confidence {
            Some(level) => {
                ensure!(
                    level > 0. && level < 1.,
                    "`confidence` must be between 0 and 1, found {}",
                    level
                );
                let normal = Normal::new(0., 1.)?;
                Ok(normal.inverse_cdf(1. - (1. - level) / 2.))
            }
            None => Ok(Self::DEFAULT_Z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.segmentation.min_gap_days, 180);
        assert_eq!(config.cohort.max_order, 7);
        assert_eq!(config.cohort.washout_year, Some(2015));
        assert_eq!(config.qc.min_age, 12);
        assert_eq!(config.odds.z().unwrap(), 1.96);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_override() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            input_dir = "raw"

            [cohort]
            max_order = 3
            washout_year = 2016

            [qc]
            date_min = "2016-01-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.input("fktp.csv"), PathBuf::from("raw/fktp.csv"));
        assert_eq!(config.paths.output_dir, PathBuf::from("data/output"));
        assert_eq!(config.cohort.max_order, 3);
        assert_eq!(config.cohort.washout_year, Some(2016));
        assert_eq!(
            config.qc.date_min,
            NaiveDate::from_ymd_opt(2016, 1, 1).unwrap()
        );
        assert_eq!(config.qc.max_age, 55);
    }

    #[test]
    fn shipped_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("analysis.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.odds.z().unwrap(), 1.96);
        assert_eq!(config.paths.hospital, PathBuf::from("fkrtl.csv"));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[cohort]\nmax_ordre = 3\n").is_err());
    }

    #[test]
    fn critical_value() {
        let odds = OddsConfig {
            confidence: Some(0.95),
            z: None,
        };
        assert!((odds.z().unwrap() - 1.959964).abs() < 1e-5);

        let odds = OddsConfig {
            confidence: Some(0.95),
            z: Some(2.0),
        };
        assert_eq!(odds.z().unwrap(), 2.0);

        let odds = OddsConfig {
            confidence: Some(1.5),
            z: None,
        };
        assert!(odds.z().is_err());
    }

    #[test]
    fn ranges() {
        let qc = QcConfig::default();
        let ages = qc.age_range().unwrap();
        assert!(ages.contains(&12) && ages.contains(&55) && !ages.contains(&56));
        let dates = qc.date_range().unwrap();
        assert!(dates.contains(&NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));
        assert!(!dates.contains(&NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
    }
}
