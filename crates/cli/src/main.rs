use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use indexmap::IndexMap;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use weft_engine::workflow::definition::resolve_workflow;
use weft_engine::{BuiltinEvaluator, HttpExecutionClient, RunRequest, RunServices, VariableScope, drive_workflow_run, parse_document_file, render_report};
use weft_types::{Document, RunControl, RunEvent, RunReport, RunStatus};
use weft_util::{HistorySink, JsonHistoryStore};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_command(sub).await,
        Some(("validate", sub)) => validate_command(sub),
        Some(("list", sub)) => list_command(sub),
        Some(("history", sub)) => history_command(sub),
        _ => bail!("expected a subcommand; see `weft --help`"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let document_arg = || {
        Arg::new("document")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Path to a YAML or JSON document")
    };
    let json_arg = || Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print JSON instead of text");

    Command::new("weft")
        .about("Run request workflows declared in YAML or JSON documents")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run a workflow, or a single request over its for-each items")
                .arg(document_arg())
                .arg(
                    Arg::new("workflow")
                        .long("workflow")
                        .short('w')
                        .action(ArgAction::Set)
                        .conflicts_with("request")
                        .help("Workflow name; defaults to the first workflow in the document"),
                )
                .arg(
                    Arg::new("request")
                        .long("request")
                        .short('r')
                        .action(ArgAction::Set)
                        .help("Run a request that declares its own for-each"),
                )
                .arg(
                    Arg::new("env")
                        .long("env")
                        .short('e')
                        .action(ArgAction::Append)
                        .value_parser(parse_assignment)
                        .help("Ambient variable as KEY=VALUE; may be repeated"),
                )
                .arg(
                    Arg::new("env-file")
                        .long("env-file")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf))
                        .help("YAML map of ambient variables"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check every workflow for unknown requests and malformed steps")
                .arg(document_arg()),
        )
        .subcommand(Command::new("list").about("List the requests and workflows in a document").arg(document_arg()))
        .subcommand(
            Command::new("history")
                .about("Show recent workflow runs")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .short('n')
                        .default_value("20")
                        .value_parser(value_parser!(usize)),
                )
                .arg(json_arg()),
        )
}

async fn run_command(matches: &ArgMatches) -> Result<ExitCode> {
    let document = load_document(matches)?;
    let json = matches.get_flag("json");

    let request = match (matches.get_one::<String>("request"), matches.get_one::<String>("workflow")) {
        (Some(name), _) => RunRequest::for_request(&document, name)?,
        (None, Some(name)) => RunRequest::workflow(&document, name)?,
        (None, None) => {
            let first = document.workflows.first().context("document declares no workflows")?;
            RunRequest::workflow(&document, &first.name)?
        }
    };
    let request = request.with_ambient(&ambient_scope(matches)?);

    let history: Option<Arc<dyn HistorySink>> = match JsonHistoryStore::with_defaults() {
        Ok(store) => Some(Arc::new(store)),
        Err(error) => {
            warn!(error = %error, "history store unavailable; this run will not be recorded");
            None
        }
    };
    let services = RunServices {
        evaluator: Arc::new(BuiltinEvaluator),
        client: Arc::new(HttpExecutionClient::new()),
        history,
    };

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();
    let printer = tokio::spawn(print_events(event_rx, json));
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = control_tx.send(RunControl::Cancel {
                reason: Some("interrupted".into()),
            });
        }
    });

    let outcome = drive_workflow_run(request, services, control_rx, event_tx).await;
    interrupt.abort();
    let _ = printer.await;
    let report = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
        println!("{}", report.summary);
    }
    Ok(exit_code(&report))
}

async fn print_events(mut event_rx: UnboundedReceiver<RunEvent>, quiet: bool) {
    while let Some(event) = event_rx.recv().await {
        match event {
            RunEvent::StepStarted { status_line, .. } if !quiet => eprintln!("{status_line}"),
            RunEvent::Error { message } => eprintln!("error: {message}"),
            RunEvent::RunStarted { workflow, total_steps, .. } => debug!(workflow = %workflow, total_steps, "run started"),
            _ => {}
        }
    }
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Canceled => ExitCode::from(130),
    }
}

fn validate_command(matches: &ArgMatches) -> Result<ExitCode> {
    let document = load_document(matches)?;
    let mut invalid = 0usize;
    for workflow in &document.workflows {
        match resolve_workflow(&document, workflow) {
            Ok(resolved) => println!("ok      {} ({} steps)", resolved.name, resolved.total_steps()),
            Err(error) => {
                invalid += 1;
                println!("invalid {}: {error}", workflow.name);
            }
        }
    }
    if invalid > 0 {
        println!("{invalid} of {} workflows invalid", document.workflows.len());
        return Ok(ExitCode::FAILURE);
    }
    println!("{} workflows valid", document.workflows.len());
    Ok(ExitCode::SUCCESS)
}

fn list_command(matches: &ArgMatches) -> Result<ExitCode> {
    let document = load_document(matches)?;
    if let Some(title) = &document.title {
        println!("{title}");
    }
    println!("Requests:");
    for request in &document.requests {
        let looping = request
            .for_each
            .as_ref()
            .map(|spec| format!("  [for-each {} in {}]", spec.var, spec.expr))
            .unwrap_or_default();
        println!("  {:<24} {:<6} {}{looping}", request.name, request.method, request.url);
    }
    println!("Workflows:");
    for workflow in &document.workflows {
        let description = workflow.description.as_deref().map(|text| format!("  {text}")).unwrap_or_default();
        println!("  {:<24} {} steps{description}", workflow.name, workflow.steps.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn history_command(matches: &ArgMatches) -> Result<ExitCode> {
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(20);
    let store = JsonHistoryStore::with_defaults().context("failed to open history store")?;
    let records = store.recent(limit)?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(ExitCode::SUCCESS);
    }
    if records.is_empty() {
        println!("No workflow runs recorded in {}", store.path().display());
    }
    for record in records {
        println!(
            "{}  {:<24} {:>7}ms  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.entry.name,
            record.entry.duration_ms,
            record.entry.status_summary
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn load_document(matches: &ArgMatches) -> Result<Document> {
    let path = matches.get_one::<PathBuf>("document").context("missing document path")?;
    parse_document_file(path)
}

/// Ambient variables layered low to high: process environment, `--env-file`, `--env`.
///
/// Document variables are already part of the run request and sit below all of these.
fn ambient_scope(matches: &ArgMatches) -> Result<VariableScope> {
    let mut scope = VariableScope::from_environment(std::env::vars());
    if let Some(path) = matches.get_one::<PathBuf>("env-file") {
        scope = scope.merge(&load_env_file(path)?);
    }
    if let Some(pairs) = matches.get_many::<(String, String)>("env") {
        scope = scope.merge(&VariableScope::from_pairs(pairs.cloned()));
    }
    Ok(scope)
}

fn load_env_file(path: &Path) -> Result<VariableScope> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read env file: {}", path.display()))?;
    let values: IndexMap<String, String> =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse env file: {}", path.display()))?;
    Ok(VariableScope::from_pairs(values))
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_the_first_equals_sign() {
        assert_eq!(parse_assignment("token=a=b").unwrap(), ("token".to_string(), "a=b".to_string()));
        assert_eq!(parse_assignment(" host =").unwrap(), ("host".to_string(), String::new()));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=value").is_err());
    }

    #[test]
    fn env_flags_override_env_file_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env_path = temp_dir.path().join("local.yaml");
        std::fs::write(&env_path, "host: staging.example.com\nregion: eu\nport: 8080\n").unwrap();

        let matches = build_cli().get_matches_from([
            "weft",
            "run",
            "api.yaml",
            "--env-file",
            env_path.to_str().unwrap(),
            "--env",
            "region=us",
        ]);
        let (_, run) = matches.subcommand().unwrap();
        let scope = ambient_scope(run).unwrap();

        assert_eq!(scope.get("host"), Some("staging.example.com"));
        assert_eq!(scope.get("region"), Some("us"));
        assert_eq!(scope.get("port"), Some("8080"));
    }

    #[test]
    fn workflow_and_request_selection_conflict() {
        let result = build_cli().try_get_matches_from(["weft", "run", "api.yaml", "--workflow", "smoke", "--request", "Ping"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }
}
