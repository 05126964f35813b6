use clap::Parser;
use maternal_cohort::{header, summary::Summary, Config, Episodes, Visits, VISIT_TABLE_FILE};
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
    let episodes = Episodes::from_visits(&visits)?;
    let summary = Summary::new(&visits, &episodes)?;

    header("Data stats");
    println!("{}", summary.counts_table());
    header("Pregnancy order");
    println!("{}", summary.orders_table());
    header("Age at end of pregnancy");
    println!("{}", summary.ages_table());
    Ok(())
}
