use clap::Parser;
use maternal_cohort::{
    cohort::CohortTable,
    filter::{remove_flagged, FILTERED_SET_FILE, FINAL_SET_FILE},
    header,
    qc::Bounds,
    Config,
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
    let bounds = Bounds::new(&config.qc)?;
    let table = CohortTable::load(config.paths.output(FINAL_SET_FILE))?;

    let (kept, counts) = remove_flagged(&table, &bounds)?;
    kept.save(config.paths.output(FILTERED_SET_FILE))?;

    header("Removing flagged pregnancies");
    println!("{}", counts.term_table());
    Ok(())
}
