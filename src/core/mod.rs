mod assets;
mod engine;
mod error;
mod funding;
mod income;
mod portfolio;
mod rsu;
mod tables;
mod tax;
mod trace;
mod types;
mod validate;

pub use engine::{CancelFlag, YearPhase, run_simulation, run_simulation_traced, run_simulation_with};
pub use error::{SimulationError, ValidationError};
pub use tables::{
    CALIFORNIA, FEDERAL, FEDERAL_LTCG, YearTables, index_table, resolve_table,
    seed_default_tax_tables,
};
pub use portfolio::Portfolio;
pub use rsu::VestOutcome;
pub use tax::{IncomeBreakdown, TaxBreakdown, TaxCalculator, apply_brackets};
pub use trace::{
    AssetTotals, DebugTraceEntry, FundingTrace, IncomeTrace, NoopRecorder, RsuTrace, RsuYear,
    TraceRecorder, YearRecord, YearRecorder,
};
pub use types::*;
pub use validate::validate_input;
