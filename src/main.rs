mod cli;
mod config;
mod error;
mod query;
mod recorder;
mod report;
mod state_machine;
mod store;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, QueryArgs, QueryKind, RecordArgs};
use config::CjrConfig;
use query::QueryService;
use recorder::record_task_status;
use serde_json::Value;
use store::Store;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so query output on stdout stays machine-readable.
/// `RUST_LOG` is honoured unless `--verbose` forces debug output.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("cjr=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Query(args) = &cli.command
        && args.queryhelp
    {
        println!("{}", args.help_text());
        return Ok(());
    }

    match cli.command {
        Command::Record(args) => {
            // Inputs are checked before the database is opened or created.
            let task_info = args.task_info()?;
            args.task_key().validate()?;
            let mut store = open_store(cli.db)?;
            run_record(&mut store, &args, task_info)
        }
        Command::Query(args) => {
            let store = open_store(cli.db)?;
            run_query(&store, &args)
        }
    }
}

fn open_store(db: Option<PathBuf>) -> Result<Store> {
    let config = CjrConfig::load().context("failed to load cjr configuration")?;
    let database = db.unwrap_or_else(|| config.database.clone());
    tracing::debug!(database = %database.display(), "resolved job database");
    Ok(Store::open(&database, &config.store_options())?)
}

fn run_record(store: &mut Store, args: &RecordArgs, task_info: Value) -> Result<()> {
    record_task_status(
        store,
        args.status.into(),
        &args.jobname,
        &args.taskid,
        args.version,
        task_info,
        args.progress,
    )?;
    Ok(())
}

fn run_query(store: &Store, args: &QueryArgs) -> Result<()> {
    let Some(kind) = args.query else {
        anyhow::bail!("--query is required");
    };
    let queries = QueryService::new(store);
    let dates = args.date_format();

    match kind {
        QueryKind::Jobs => ui::print_job_names(&queries.list_job_names()?),
        QueryKind::Versions => {
            let job_name = args.require_jobname(kind)?;
            ui::print_versions(&queries.list_job_versions(job_name)?);
        }
        QueryKind::AllTasks => {
            let job_name = args.require_jobname(kind)?;
            ui::print_reports(&queries.list_all_tasks(job_name, args.version, dates)?);
        }
        QueryKind::Incomplete => {
            let job_name = args.require_jobname(kind)?;
            ui::print_reports(&queries.list_incomplete_tasks(job_name, args.version, dates)?);
        }
        QueryKind::Task => {
            let job_name = args.require_jobname(kind)?;
            let task_id = args.require_taskid(kind)?;
            match queries.get_task(job_name, task_id, args.version, dates)? {
                Some(report) => ui::print_reports(&[report]),
                None => ui::print_not_found(&format!(
                    "task '{job_name} - {task_id} v{}'",
                    args.version
                )),
            }
        }
        QueryKind::TaskVersions => {
            let job_name = args.require_jobname(kind)?;
            let task_id = args.require_taskid(kind)?;
            let reports = queries.list_task_versions(job_name, task_id, dates)?;
            if reports.is_empty() {
                ui::print_not_found(&format!("task '{job_name} - {task_id}'"));
            } else {
                ui::print_reports(&reports);
            }
        }
    }
    Ok(())
}
