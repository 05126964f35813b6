use clap::Parser;
use maternal_cohort::{
    cohort::CohortTable,
    filter::FINAL_SET_FILE,
    header,
    qc::{Bounds, PregnancyQc},
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

    let qc = PregnancyQc::run(&table, &bounds)?;
    qc.save(&table, &config.paths.output_dir)?;

    header("Pregnancy quality control");
    println!("{}", qc.term_table());
    Ok(())
}
