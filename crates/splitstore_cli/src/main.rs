//! Command-line entry point for a splitstore database.
//!
//! # Responsibility
//! - Load configuration, open the store and compose the repository façade.
//! - Run one command and print its result as JSON on stdout.

use clap::{Parser, Subcommand};
use log::error;
use serde_json::json;
use splitstore_core::{
    flush_logging, init_logging, ApplicationName, AuditLogService, BucketRepository, Context,
    DatabaseLocation, ExperimentId, ExperimentLabel, ExperimentRepository, ExperimentState,
    IndexedExperimentRepository, NewExperiment, RepositoryDependencies, StoreConfig,
};
use splitstore_core::repo::SqliteApplicationAuditLogStore;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "splitstore", version, about = "Experiment store maintenance tool")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the configured database).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Absolute directory for rolling log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print core linkage and version.
    Ping,
    /// List known applications.
    Apps,
    /// Register an application name.
    CreateApp { name: String },
    /// Create a draft experiment and its index entries.
    CreateExperiment {
        application: String,
        label: String,
        #[arg(long, default_value_t = 1.0)]
        sampling_percent: f64,
        #[arg(long)]
        description: Option<String>,
    },
    /// List live experiments of an application.
    Experiments { application: String },
    /// Show one experiment.
    Experiment { id: ExperimentId },
    /// Move an experiment to another lifecycle state.
    SetState { id: ExperimentId, state: String },
    /// Rebuild the index entries of one experiment.
    Reindex { id: ExperimentId },
    /// List the buckets of an experiment.
    Buckets { id: ExperimentId },
    /// Assignment counts per bucket.
    Counts {
        id: ExperimentId,
        #[arg(long)]
        context: Option<String>,
    },
    /// Application activity log, most recent first.
    AuditLog {
        #[arg(long)]
        application: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    };
    flush_logging();
    code
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(path) = cli.db {
        config.database = DatabaseLocation::File { path };
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = Some(dir);
    }
    if let Some(dir) = &config.log_dir {
        init_logging(&config.log_level, dir)?;
    }

    if let Command::Ping = cli.command {
        print_json(&json!({
            "ping": splitstore_core::ping(),
            "version": splitstore_core::core_version(),
        }));
        return Ok(());
    }

    let store = config.open_store()?;
    let repository = IndexedExperimentRepository::new(RepositoryDependencies::sqlite(&store));

    match cli.command {
        Command::Ping => {}
        Command::Apps => print_json(&repository.get_applications_list()?),
        Command::CreateApp { name } => {
            let name = ApplicationName::new(name);
            repository.create_application(&name)?;
            print_json(&json!({ "created": name }));
        }
        Command::CreateExperiment {
            application,
            label,
            sampling_percent,
            description,
        } => {
            let application = ApplicationName::new(application);
            let mut draft = NewExperiment::new(application.clone(), ExperimentLabel::new(label));
            draft.sampling_percent = sampling_percent;
            draft.description = description;
            repository.create_application(&application)?;
            let id = repository.create_experiment(&draft)?;
            repository.create_indices_for_new_experiment(&draft)?;
            print_json(&repository.get_experiment(id)?);
        }
        Command::Experiments { application } => {
            let table = repository.get_experiment_list(&ApplicationName::new(application))?;
            print_json(&table.iter().collect::<Vec<_>>());
        }
        Command::Experiment { id } => print_json(&repository.get_experiment(id)?),
        Command::SetState { id, state } => {
            let state = ExperimentState::parse(&state.to_ascii_uppercase())
                .ok_or_else(|| format!("unknown experiment state `{state}`"))?;
            let current = repository
                .get_experiment(id)?
                .ok_or_else(|| format!("experiment {id} not found"))?;
            print_json(&repository.update_experiment_state(&current, state)?);
        }
        Command::Reindex { id } => print_json(&repository.reindex_experiment(id)?),
        Command::Buckets { id } => print_json(&repository.get_buckets(id)?),
        Command::Counts { id, context } => {
            let context = context.map_or_else(Context::production, Context::new);
            print_json(&repository.get_assignment_counts(id, &context)?);
        }
        Command::AuditLog { application } => {
            let service = AuditLogService::new(SqliteApplicationAuditLogStore::new(store.clone()));
            let entries = match application {
                Some(name) => service.get_audit_logs(&ApplicationName::new(name))?,
                None => service.get_all_audit_logs()?,
            };
            print_json(&entries);
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: failed to encode output: {err}"),
    }
}
