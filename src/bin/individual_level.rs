use clap::Parser;
use maternal_cohort::{
    header,
    individual::{self, FILTERED_VISITS_FILE, INDIVIDUALS_FILE},
    Config, Visits, VISIT_TABLE_FILE,
};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Analysis settings.
    #[clap(long, short, default_value = "analysis.toml")]
    config: PathBuf,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_default(&opt.config)?;
    let visits = Visits::load_table(config.paths.output(VISIT_TABLE_FILE))?;

    let rows = individual::filtered_visits(&visits, &config.qc.age_range()?);
    individual::save(&rows, config.paths.output(FILTERED_VISITS_FILE))?;
    let patients = individual::individuals(&rows);
    individual::save(&patients, config.paths.output(INDIVIDUALS_FILE))?;

    header("Individual level");
    println!("visits: {}", rows.len());
    println!("individuals: {}", patients.len());
    Ok(())
}
