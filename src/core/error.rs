use thiserror::Error;

use super::types::{AssetId, FilingStatus, IncomeSourceId};

/// Configuration problems detected before any year is simulated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("end_age ({end_age}) must be >= current_age ({current_age})")]
    AgeRange { current_age: u32, end_age: u32 },
    #[error("{field} must be finite and >= 0, got {value}")]
    Negative { field: String, value: f64 },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("tax table {jurisdiction}/{filing_status:?}/{year_base} has no brackets")]
    EmptyBrackets {
        jurisdiction: String,
        filing_status: FilingStatus,
        year_base: i32,
    },
    #[error(
        "tax table {jurisdiction}/{filing_status:?}/{year_base}: bracket thresholds must be strictly ascending"
    )]
    BracketOrder {
        jurisdiction: String,
        filing_status: FilingStatus,
        year_base: i32,
    },
    #[error(
        "tax table {jurisdiction}/{filing_status:?}/{year_base}: only the top bracket may be unbounded, and it must be"
    )]
    UnboundedBracket {
        jurisdiction: String,
        filing_status: FilingStatus,
        year_base: i32,
    },
    #[error("duplicate tax table {jurisdiction}/{filing_status:?}/{year_base}")]
    DuplicateTable {
        jurisdiction: String,
        filing_status: FilingStatus,
        year_base: i32,
    },
    #[error("RSU grant on asset {asset_id}: tranche percentages sum to {sum}, expected 1.0")]
    TrancheSum { asset_id: AssetId, sum: f64 },
    #[error("RSU grant on asset {asset_id}: vested lot references unknown tranche {tranche_index}")]
    UnknownTranche {
        asset_id: AssetId,
        tranche_index: usize,
    },
    #[error("RSU grant on asset {asset_id}: tranche {tranche_index} has more than one vested lot")]
    DuplicateLot {
        asset_id: AssetId,
        tranche_index: usize,
    },
    #[error("RSU grant on asset {asset_id} references unknown security '{symbol}'")]
    UnknownSecurity { asset_id: AssetId, symbol: String },
    #[error("duplicate asset id {0}")]
    DuplicateAsset(AssetId),
    #[error("funding order lists {0} more than once")]
    DuplicateFundingSource(String),
    #[error("funding order may list at most 4 sources, got {0}")]
    TooManyFundingSources(usize),
    #[error("CUSTOM_RATE indexing requires custom_index_rate")]
    MissingCustomRate,
    #[error("solver tolerance must be > 0 and max_iterations must be > 0")]
    SolverBounds,
    #[error("income source {source_id} links unknown asset {asset_id}")]
    UnknownLinkedAsset {
        source_id: IncomeSourceId,
        asset_id: AssetId,
    },
    #[error("income source {source_id} ({kind}) needs a linked asset")]
    MissingLinkedAsset {
        source_id: IncomeSourceId,
        kind: &'static str,
    },
    #[error("income source {source_id} ({kind}) cannot link a {asset_kind} asset")]
    IncompatibleLink {
        source_id: IncomeSourceId,
        kind: &'static str,
        asset_kind: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("no {jurisdiction} tax table for {filing_status:?} (needed for {year})")]
    MissingTaxTable {
        year: i32,
        jurisdiction: String,
        filing_status: FilingStatus,
    },
    #[error("simulation cancelled after {completed_years} year(s)")]
    Cancelled { completed_years: usize },
}
