use clap::Parser;
use maternal_cohort::{
    cohort::{CohortBuilder, CohortTable},
    conditions::Conditions,
    filter::FINAL_SET_FILE,
    header, Config, Segmenter, Visits, VISITS_FILE, VISIT_TABLE_FILE,
};
use qu::ick_use::*;
use std::path::PathBuf;
use term_data_table::{Cell, Row, Table};

#[derive(Parser)]
struct Opt {
    /// Analysis settings.
    #[clap(long, short, default_value = "analysis.toml")]
    config: PathBuf,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_default(&opt.config)?;
    let conditions = Conditions::from_config(&config.cohort)?;
    let segmenter = Segmenter::new(&config.segmentation)?;

    let mut visits = Visits::load(config.paths.output(VISITS_FILE))?;
    let episodes = visits.assign_episodes(&segmenter);
    visits.save_table(config.paths.output(VISIT_TABLE_FILE))?;

    let builder = CohortBuilder {
        visits: &visits,
        episodes: &episodes,
        segmenter: &segmenter,
        conditions: &conditions,
    };
    let cohorts = builder.build_all(config.cohort.max_order, config.cohort.washout_year);

    header("Cohorts");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("File"))
            .with_cell(Cell::from("Pregnancies")),
    );
    for cohort in cohorts.iter() {
        let file_name = cohort.file_name();
        cohort.table.save(config.paths.output(&file_name))?;
        table.add_row(
            Row::new()
                .with_cell(Cell::from(file_name))
                .with_cell(Cell::from(cohort.table.len().to_string())),
        );
    }
    println!("{}", table);

    let final_set = CohortTable::concat(cohorts.iter().map(|cohort| &cohort.table))?;
    final_set.save(config.paths.output(FINAL_SET_FILE))?;
    println!("{}: {} pregnancies", FINAL_SET_FILE, final_set.len());
    Ok(())
}
