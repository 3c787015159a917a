//! Headless runner: read a setup file, simulate day by day, write the time
//! series.
//!
//! Usage:
//!   monica <setup.json> [--out FILE] [--format csv|json] [--days N]
//!          [--checkpoint FILE]
//!
//! Exit code 0 on success; 1 with a single-line error on ingestion failure.

mod output;
mod setup;

use std::time::Duration;

use bevy::app::App;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;

use simulation::climate::{ClimateSeries, SimClock};
use simulation::crop::ActiveCrop;
use simulation::frost::FrostState;
use simulation::management::{CropCatalogue, FertiliserCatalogue};
use simulation::observation::{DailyObservation, OutputSpec};
use simulation::snow::SnowState;
use simulation::soil_column::SoilColumn;
use simulation::{SimTotals, SimulationPlugin, DAY_TICK_SECONDS};

use setup::Setup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug)]
struct CliOptions {
    setup_path: String,
    out: Option<String>,
    format: OutputFormat,
    days: Option<usize>,
    checkpoint: Option<String>,
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut setup_path = None;
    let mut out = None;
    let mut format = OutputFormat::Csv;
    let mut days = None;
    let mut checkpoint = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out" => {
                out = Some(
                    iter.next()
                        .ok_or("--out needs a file path")?
                        .to_string(),
                );
            }
            "--format" => {
                format = match iter.next().ok_or("--format needs csv or json")?.as_str() {
                    "csv" => OutputFormat::Csv,
                    "json" => OutputFormat::Json,
                    other => return Err(format!("unknown output format {other}")),
                };
            }
            "--days" => {
                days = Some(
                    iter.next()
                        .ok_or("--days needs a number")?
                        .parse::<usize>()
                        .map_err(|e| format!("--days: {e}"))?,
                );
            }
            "--checkpoint" => {
                checkpoint = Some(
                    iter.next()
                        .ok_or("--checkpoint needs a file path")?
                        .to_string(),
                );
            }
            other if setup_path.is_none() && !other.starts_with("--") => {
                setup_path = Some(other.to_string());
            }
            other => return Err(format!("unexpected argument {other}")),
        }
    }

    Ok(CliOptions {
        setup_path: setup_path.ok_or("usage: monica <setup.json> [--out FILE] \
             [--format csv|json] [--days N] [--checkpoint FILE]")?,
        out,
        format,
        days,
        checkpoint,
    })
}

fn run(args: &[String]) -> Result<(), String> {
    let options = parse_args(args)?;

    let text = std::fs::read_to_string(&options.setup_path)
        .map_err(|e| format!("cannot read {}: {e}", options.setup_path))?;
    let setup = Setup::from_json(&text).map_err(|e| e.to_string())?;

    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(SimulationPlugin);
    // One update advances the simulation by exactly one day.
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(
        DAY_TICK_SECONDS,
    )));
    // Prime startup while the climate series is still empty.
    app.update();

    let env = setup.environment.clone().unwrap_or_default();
    let column = SoilColumn::from_profile(&setup.soil, &env);
    if column.number_of_layers() == 0 {
        return Err(format!(
            "no usable soil layer in the profile: {}",
            column.error_messages.join("; ")
        ));
    }
    for message in &column.error_messages {
        eprintln!("warning: {message}");
    }

    if let Some(site) = setup.site.clone() {
        app.insert_resource(site);
    }
    app.insert_resource(env.clone());
    app.insert_resource(column);
    app.insert_resource(ClimateSeries {
        records: setup.climate.clone(),
    });
    app.insert_resource(setup.management_plan());

    {
        let mut crops = app.world_mut().resource_mut::<CropCatalogue>();
        for params in &setup.crops {
            crops.insert(params.clone());
        }
    }
    {
        let mut fertilisers = app.world_mut().resource_mut::<FertiliserCatalogue>();
        for partition in &setup.mineral_fertilisers {
            fertilisers.insert_mineral(partition.clone());
        }
        for params in &setup.organic_fertilisers {
            fertilisers.insert_organic(params.clone());
        }
    }
    if !setup.outputs.is_empty() {
        app.insert_resource(OutputSpec {
            requests: setup.outputs.clone(),
        });
    }

    let days = options
        .days
        .unwrap_or(setup.climate.len())
        .min(setup.climate.len());

    let mut rows = Vec::with_capacity(days);
    for _ in 0..days {
        app.update();
        rows.push(app.world().resource::<DailyObservation>().clone());
    }

    if let Some(path) = &options.checkpoint {
        let world = app.world();
        let data = save::capture(
            world.resource::<SimClock>(),
            world.resource::<SoilColumn>(),
            world.resource::<SnowState>(),
            world.resource::<FrostState>(),
            world.resource::<ActiveCrop>(),
            world.resource::<SimTotals>(),
        );
        std::fs::write(path, save::encode_checkpoint(&data))
            .map_err(|e| format!("cannot write checkpoint {path}: {e}"))?;
    }

    let spec = app.world().resource::<OutputSpec>().clone();
    let rendered = match options.format {
        OutputFormat::Csv => output::to_csv(&spec, &rows),
        OutputFormat::Json => output::to_json(&rows)?,
    };
    match &options.out {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|e| format!("cannot write {path}: {e}"))?,
        None => print!("{rendered}"),
    }

    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(message) = run(&args) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_minimal() {
        let options = parse_args(&to_args(&["setup.json"])).unwrap();
        assert_eq!(options.setup_path, "setup.json");
        assert_eq!(options.format, OutputFormat::Csv);
        assert!(options.out.is_none());
        assert!(options.days.is_none());
    }

    #[test]
    fn test_parse_args_full() {
        let options = parse_args(&to_args(&[
            "setup.json",
            "--out",
            "run.csv",
            "--format",
            "json",
            "--days",
            "30",
            "--checkpoint",
            "state.monc",
        ]))
        .unwrap();
        assert_eq!(options.out.as_deref(), Some("run.csv"));
        assert_eq!(options.format, OutputFormat::Json);
        assert_eq!(options.days, Some(30));
        assert_eq!(options.checkpoint.as_deref(), Some("state.monc"));
    }

    #[test]
    fn test_parse_args_rejects_garbage() {
        assert!(parse_args(&to_args(&[])).is_err());
        assert!(parse_args(&to_args(&["setup.json", "--format", "xml"])).is_err());
        assert!(parse_args(&to_args(&["setup.json", "--days", "soon"])).is_err());
        assert!(parse_args(&to_args(&["a.json", "b.json"])).is_err());
    }
}
