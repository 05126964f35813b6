use clap::Parser;
use maternal_cohort::{
    header,
    qc::{Bounds, VisitQc},
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
    let bounds = Bounds::new(&config.qc)?;
    let visits = Visits::load_table(config.paths.output(VISIT_TABLE_FILE))?;

    let qc = VisitQc::run(&visits, &bounds);
    qc.save(&visits, &config.paths.output_dir)?;

    header("Visit quality control");
    println!("{}", qc.term_table());
    Ok(())
}
