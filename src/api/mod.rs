use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    SimulationError, SimulationInput, SimulationResult, SolverConfig, TaxTable,
    run_simulation, run_simulation_traced, seed_default_tax_tables,
};

#[derive(Parser, Debug)]
#[command(
    name = "retirement-lab",
    about = "Year-by-year household projection with progressive tax, RSU vesting and a tax funding waterfall"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a projection from a JSON snapshot and print the yearly series.
    Run(RunArgs),
    /// Print the snapshot with the built-in tax tables added where missing.
    SeedTables {
        #[arg(long)]
        input: PathBuf,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[arg(long, help = "Path to a SimulationInput JSON file")]
    input: PathBuf,
    #[arg(long, help = "Write the result here instead of stdout")]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = false, help = "Attach the per-year debug trace")]
    debug_trace: bool,
    #[arg(
        long,
        default_value_t = false,
        help = "Add the built-in 2024 tax tables for any missing jurisdiction"
    )]
    seed_defaults: bool,
    #[arg(long, help = "Funding solver tolerance in dollars; overrides the input file")]
    tolerance: Option<f64>,
    #[arg(long, help = "Funding solver iteration cap; overrides the input file")]
    max_iterations: Option<u32>,
    #[arg(long, default_value_t = false)]
    compact: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}

#[derive(Debug, Deserialize)]
struct SimulatePayload {
    #[serde(flatten)]
    input: SimulationInput,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    seed_default_tables: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeedResponse {
    added: usize,
    tax_tables: Vec<TaxTable>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_solver_config(
    base: SolverConfig,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
) -> Result<SolverConfig, String> {
    let mut solver = base;
    if let Some(tolerance) = tolerance {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err("--tolerance must be > 0".to_string());
        }
        solver.tolerance = tolerance;
    }
    if let Some(max_iterations) = max_iterations {
        if max_iterations == 0 {
            return Err("--max-iterations must be > 0".to_string());
        }
        solver.max_iterations = max_iterations;
    }
    Ok(solver)
}

fn read_input(path: &Path) -> Result<SimulationInput, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn emit(json: &str, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => fs::write(path, json).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn simulate(
    mut input: SimulationInput,
    debug: bool,
    seed_defaults: bool,
) -> Result<SimulationResult, SimulationError> {
    if seed_defaults {
        seed_default_tax_tables(&mut input.tax_tables, &input.scenario);
    }
    if debug {
        run_simulation_traced(&input, None)
    } else {
        run_simulation(&input)
    }
}

fn run_command(args: RunArgs) -> Result<(), CliError> {
    let mut input = read_input(&args.input)?;
    input.solver = build_solver_config(input.solver, args.tolerance, args.max_iterations)
        .map_err(CliError::InvalidArgument)?;

    let result = simulate(input, args.debug_trace, args.seed_defaults)?;
    let json = if args.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    emit(&json, args.output.as_deref())
}

fn seed_command(path: &Path) -> Result<(), CliError> {
    let mut input = read_input(path)?;
    let added = seed_default_tax_tables(&mut input.tax_tables, &input.scenario);
    info!(added, "tax tables seeded");
    emit(&serde_json::to_string_pretty(&input)?, None)
}

pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run(args) => run_command(args),
        Command::SeedTables { input } => seed_command(&input),
        Command::Serve { port } => run_http_server(port).await.map_err(CliError::Server),
    }
}

fn app() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/tax-tables/seed", post(seed_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "retirement-lab HTTP API listening");
    axum::serve(listener, app()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(payload): Json<SimulatePayload>) -> Response {
    let SimulatePayload {
        input,
        debug,
        seed_default_tables,
    } = payload;
    let joined =
        tokio::task::spawn_blocking(move || simulate(input, debug, seed_default_tables)).await;
    match joined {
        Ok(Ok(result)) => json_response(StatusCode::OK, result),
        Ok(Err(err)) => error_response(status_for(&err), &err.to_string()),
        Err(err) => {
            error!(error = %err, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation task failed")
        }
    }
}

async fn seed_handler(Json(mut input): Json<SimulationInput>) -> Response {
    let added = seed_default_tax_tables(&mut input.tax_tables, &input.scenario);
    json_response(
        StatusCode::OK,
        SeedResponse {
            added,
            tax_tables: input.tax_tables,
        },
    )
}

fn status_for(err: &SimulationError) -> StatusCode {
    match err {
        SimulationError::Validation(_) => StatusCode::BAD_REQUEST,
        SimulationError::MissingTaxTable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SimulationError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AssetKind, FilingStatus, ValidationError};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    const PAYLOAD: &str = r#"{
        "scenario": {
            "current_age": 50,
            "base_year": 2025,
            "retirement_age": 52,
            "end_age": 54,
            "inflation_rate": 0.02,
            "bond_return_rate": 0.04,
            "filing_status": "MARRIED_FILING_JOINTLY",
            "annual_contribution_pre_retirement": 5000,
            "annual_spending_in_retirement": 40000
        },
        "assets": [
            {"id": 1, "name": "Checking", "type": "cash", "balance": 100000},
            {"id": 2, "name": "Brokerage", "type": "general_equity", "account_type": "TAXABLE",
             "balance": 250000, "cost_basis": 150000},
            {"id": 3, "name": "ACME RSU", "type": "rsu_grant", "security_ref": "ACME",
             "grant_date": "2024-06-01", "fmv_at_grant": 100, "shares_granted": 1000,
             "tranches": [
                {"vesting_date": "2025-06-01", "percentage_of_grant": 0.25},
                {"vesting_date": "2026-06-01", "percentage_of_grant": 0.75}
             ]}
        ],
        "income_sources": [
            {"id": 7, "name": "Salary", "kind": "income", "amount": 150000,
             "start_age": 50, "end_age": 51, "tax_treatment": "ordinary"}
        ],
        "securities": [{"symbol": "ACME", "current_price": 120, "appreciation_rate": 0.05}],
        "settings": {"funding_order": ["CASH", "TAXABLE_BROKERAGE"]},
        "debug": true,
        "seed_default_tables": true
    }"#;

    #[test]
    fn payload_parses_snapshot_and_flags() {
        let payload: SimulatePayload = serde_json::from_str(PAYLOAD).expect("valid payload");
        assert!(payload.debug);
        assert!(payload.seed_default_tables);
        assert_eq!(payload.input.assets.len(), 3);
        assert!(matches!(payload.input.assets[2].kind, AssetKind::RsuGrant(_)));
        assert_eq!(
            payload.input.scenario.filing_status,
            FilingStatus::MarriedFilingJointly
        );
        assert_eq!(payload.input.scenario.state_jurisdiction.as_deref(), Some("CA"));
        assert_approx(payload.input.solver.tolerance, 0.01);
        assert_eq!(payload.input.solver.max_iterations, 10);
    }

    #[test]
    fn simulate_with_seeded_tables_returns_trace() {
        let payload: SimulatePayload = serde_json::from_str(PAYLOAD).expect("valid payload");
        let result = simulate(payload.input, payload.debug, payload.seed_default_tables)
            .expect("simulates");
        assert_eq!(result.years, vec![2025, 2026, 2027, 2028, 2029]);
        assert_eq!(result.debug_trace.as_ref().map(Vec::len), Some(5));
        assert!(result.income.rsu_vesting[0] > 0.0);
        assert!(result.taxes.total[0] > 0.0);
        assert_eq!(result.income.by_source[&7].len(), 5);

        let json = serde_json::to_value(&result).expect("serializes");
        assert!(json.get("debugTrace").is_some());
        assert!(json.get("netCashFlow").is_some());
    }

    #[test]
    fn simulate_without_tables_is_a_fatal_error() {
        let payload: SimulatePayload = serde_json::from_str(PAYLOAD).expect("valid payload");
        let err = simulate(payload.input, false, false).expect_err("no tables");
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(&SimulationError::Validation(ValidationError::MissingCustomRate)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unbounded_bracket_serializes_as_null() {
        let payload: SimulatePayload = serde_json::from_str(PAYLOAD).expect("valid payload");
        let mut input = payload.input;
        seed_default_tax_tables(&mut input.tax_tables, &input.scenario);
        let json = serde_json::to_value(&input.tax_tables[0]).expect("serializes");
        let brackets = json["brackets"].as_array().expect("brackets");
        assert!(brackets.last().expect("top")["up_to"].is_null());

        let back: TaxTable = serde_json::from_value(json).expect("parses");
        assert!(back.brackets.last().expect("top").up_to.is_infinite());
        assert_eq!(back, input.tax_tables[0]);
    }

    #[test]
    fn solver_overrides_are_validated() {
        let base = SolverConfig::default();
        let solver = build_solver_config(base, Some(0.5), Some(25)).expect("valid");
        assert_approx(solver.tolerance, 0.5);
        assert_eq!(solver.max_iterations, 25);

        let err = build_solver_config(base, Some(0.0), None).expect_err("zero tolerance");
        assert!(err.contains("--tolerance"));
        let err = build_solver_config(base, None, Some(0)).expect_err("zero cap");
        assert!(err.contains("--max-iterations"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "retirement-lab",
            "run",
            "--input",
            "snapshot.json",
            "--debug-trace",
            "--max-iterations",
            "20",
        ])
        .expect("parses");
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.input, PathBuf::from("snapshot.json"));
                assert!(args.debug_trace);
                assert_eq!(args.max_iterations, Some(20));
                assert!(args.tolerance.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["retirement-lab", "serve"]).expect("parses");
        assert!(matches!(cli.command, Command::Serve { port: 8080 }));
    }

    #[test]
    fn error_body_has_single_error_field() {
        let json = serde_json::to_value(ErrorResponse {
            error: "bad".to_string(),
        })
        .expect("serializes");
        assert_eq!(json, serde_json::json!({"error": "bad"}));
    }
}
