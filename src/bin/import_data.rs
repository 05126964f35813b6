use clap::Parser;
use maternal_cohort::{header, ingest::SourceTables, Config, VISITS_FILE};
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
    let tables = SourceTables::load(&config.paths)?;
    let visits = tables.link();

    header("Linked visits");
    println!("visits: {}", visits.len());
    println!("patients: {}", visits.patient_count());

    visits.save(config.paths.output(VISITS_FILE))?;
    Ok(())
}
