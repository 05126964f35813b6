use clap::Parser;
use maternal_cohort::{
    cohort::CohortTable,
    conditions::Conditions,
    filter::FILTERED_SET_FILE,
    header,
    odds::{self, OddsLevel},
    Config, Visits, VISIT_TABLE_FILE,
};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Analysis settings.
    #[clap(long, short, default_value = "analysis.toml")]
    config: PathBuf,
    /// What counts as one unit: a pregnancy, a patient, or a visit.
    #[clap(long, value_enum, default_value = "pregnancy")]
    level: OddsLevel,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_default(&opt.config)?;
    let conditions = Conditions::from_config(&config.cohort)?;
    let z = config.odds.z()?;

    let units = match opt.level {
        OddsLevel::Pregnancy => {
            let table = CohortTable::load(config.paths.output(FILTERED_SET_FILE))?;
            odds::pregnancy_units(&table, &conditions)?
        }
        OddsLevel::Individual | OddsLevel::Visit => {
            let visits = Visits::load_table(config.paths.output(VISIT_TABLE_FILE))?;
            let ages = config.qc.age_range()?;
            if opt.level == OddsLevel::Individual {
                odds::individual_units(&visits, &conditions, &ages)
            } else {
                odds::visit_units(&visits, &conditions, &ages)
            }
        }
    };
    let rows = units.odds_ratios(config.cohort.max_order, z);
    odds::save(&rows, config.paths.output(opt.level.file_name()))?;

    header(&format!("Odds of abortion ({} level)", opt.level));
    println!("{}", odds::term_table(&rows));
    Ok(())
}
