use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::trace::DebugTraceEntry;

pub type AssetId = u32;
pub type IncomeSourceId = u32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl FilingStatus {
    pub const ALL: [FilingStatus; 4] = [
        FilingStatus::Single,
        FilingStatus::MarriedFilingJointly,
        FilingStatus::MarriedFilingSeparately,
        FilingStatus::HeadOfHousehold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilingStatus::Single => "SINGLE",
            FilingStatus::MarriedFilingJointly => "MARRIED_FILING_JOINTLY",
            FilingStatus::MarriedFilingSeparately => "MARRIED_FILING_SEPARATELY",
            FilingStatus::HeadOfHousehold => "HEAD_OF_HOUSEHOLD",
        }
    }
}

/// Household-level assumptions for one projection. Immutable for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub current_age: u32,
    pub base_year: i32,
    pub retirement_age: u32,
    pub end_age: u32,
    #[serde(default)]
    pub inflation_rate: f64,
    #[serde(default)]
    pub bond_return_rate: f64,
    pub filing_status: FilingStatus,
    #[serde(default)]
    pub annual_contribution_pre_retirement: f64,
    #[serde(default)]
    pub annual_spending_in_retirement: f64,
    /// State table key; `null` disables state tax.
    #[serde(default = "default_state_jurisdiction")]
    pub state_jurisdiction: Option<String>,
}

fn default_state_jurisdiction() -> Option<String> {
    Some("CA".to_string())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Taxable,
    Traditional,
    Roth,
    TaxExemptOther,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    PrimaryResidence,
    Rental,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepreciationMethod {
    #[default]
    None,
    ResidentialStraightLine,
    CommercialStraightLine,
}

impl DepreciationMethod {
    pub fn recovery_years(self) -> Option<f64> {
        match self {
            DepreciationMethod::None => None,
            DepreciationMethod::ResidentialStraightLine => Some(27.5),
            DepreciationMethod::CommercialStraightLine => Some(39.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: AssetKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetKind {
    Cash(CashAccount),
    GeneralEquity(EquityAccount),
    RealEstate(Property),
    SpecificStock(StockHolding),
    RsuGrant(RsuGrant),
}

impl AssetKind {
    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::Cash(_) => "cash",
            AssetKind::GeneralEquity(_) => "general_equity",
            AssetKind::RealEstate(_) => "real_estate",
            AssetKind::SpecificStock(_) => "specific_stock",
            AssetKind::RsuGrant(_) => "rsu_grant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashAccount {
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityAccount {
    pub account_type: AccountType,
    pub balance: f64,
    /// Falls back to the scenario's bond return rate when absent.
    #[serde(default)]
    pub return_rate: Option<f64>,
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub cost_basis: f64,
    #[serde(default)]
    pub annual_contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidenceWindow {
    pub owned_since_year: i32,
    pub years_lived_in_last_five: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub property_type: PropertyType,
    pub value: f64,
    #[serde(default)]
    pub appreciation_rate: f64,
    #[serde(default)]
    pub mortgage_balance: f64,
    #[serde(default)]
    pub interest_rate: f64,
    #[serde(default)]
    pub mortgage_term_years: u32,
    /// 1-based year of the mortgage term the projection starts in.
    #[serde(default = "default_mortgage_year")]
    pub mortgage_current_year: u32,
    #[serde(default)]
    pub interest_only: bool,
    #[serde(default)]
    pub purchase_price: f64,
    #[serde(default)]
    pub land_value: f64,
    #[serde(default)]
    pub depreciation_method: DepreciationMethod,
    #[serde(default)]
    pub depreciation_start_year: Option<i32>,
    #[serde(default)]
    pub accumulated_depreciation: f64,
    #[serde(default)]
    pub primary_residence_window: Option<ResidenceWindow>,
    #[serde(default)]
    pub annual_rent: f64,
    #[serde(default)]
    pub annual_property_tax: f64,
    #[serde(default)]
    pub annual_insurance: f64,
    #[serde(default)]
    pub annual_maintenance_pct: f64,
}

fn default_mortgage_year() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockHolding {
    pub ticker: String,
    pub shares: f64,
    pub price: f64,
    #[serde(default)]
    pub appreciation_rate: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    #[serde(default)]
    pub cost_basis: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VestingTranche {
    pub vesting_date: NaiveDate,
    pub percentage_of_grant: f64,
}

/// Shares delivered by one tranche. Basis is fixed at the FMV on the vest date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VestedLot {
    pub tranche_index: usize,
    pub vesting_date: NaiveDate,
    pub shares_held: f64,
    pub basis_per_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsuGrant {
    pub security_ref: String,
    pub grant_date: NaiveDate,
    #[serde(default)]
    pub grant_value: f64,
    pub fmv_at_grant: f64,
    pub shares_granted: f64,
    pub tranches: Vec<VestingTranche>,
    #[serde(default)]
    pub vested_lots: Vec<VestedLot>,
    /// Only used for the reported net-shares estimate.
    #[serde(default)]
    pub estimated_share_withholding_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub symbol: String,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub appreciation_rate: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Income,
    Drawdown,
    HouseSale,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxTreatment {
    #[default]
    Ordinary,
    SocialSecurity,
    TaxExempt,
    Disability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeSource {
    pub id: IncomeSourceId,
    #[serde(default)]
    pub name: String,
    pub kind: IncomeKind,
    #[serde(default)]
    pub amount: f64,
    pub start_age: u32,
    pub end_age: u32,
    #[serde(default)]
    pub appreciation_rate: f64,
    #[serde(default)]
    pub tax_treatment: TaxTreatment,
    #[serde(default)]
    pub linked_asset: Option<AssetId>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingSource {
    Cash,
    TaxableBrokerage,
    TraditionalRetirement,
    Roth,
}

impl FundingSource {
    pub fn is_retirement(self) -> bool {
        matches!(
            self,
            FundingSource::TraditionalRetirement | FundingSource::Roth
        )
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsufficientFundsBehavior {
    #[default]
    FailWithShortfall,
    LiquidateAllAvailable,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexingPolicy {
    #[default]
    ConstantNominal,
    ScenarioInflation,
    CustomRate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxFundingSettings {
    pub funding_order: Vec<FundingSource>,
    pub allow_retirement_withdrawals: bool,
    pub insufficient_funds_behavior: InsufficientFundsBehavior,
    pub tax_table_indexing_policy: IndexingPolicy,
    pub custom_index_rate: Option<f64>,
}

impl Default for TaxFundingSettings {
    fn default() -> Self {
        Self {
            funding_order: vec![
                FundingSource::Cash,
                FundingSource::TaxableBrokerage,
                FundingSource::TraditionalRetirement,
                FundingSource::Roth,
            ],
            allow_retirement_withdrawals: false,
            insufficient_funds_behavior: InsufficientFundsBehavior::FailWithShortfall,
            tax_table_indexing_policy: IndexingPolicy::ConstantNominal,
            custom_index_rate: None,
        }
    }
}

/// Bounds for the per-year tax/liquidation fixed point.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            max_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    /// Upper threshold; the top bracket is unbounded and serialized as `null`.
    #[serde(with = "unbounded", default = "unbounded::infinity")]
    pub up_to: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTable {
    pub jurisdiction: String,
    pub filing_status: FilingStatus,
    pub year_base: i32,
    #[serde(default)]
    pub standard_deduction: f64,
    pub brackets: Vec<TaxBracket>,
    #[serde(default)]
    pub notes: Option<String>,
}

mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn infinity() -> f64 {
        f64::INFINITY
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Everything one run reads. Loaded once before the year loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationInput {
    pub scenario: Scenario,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub income_sources: Vec<IncomeSource>,
    #[serde(default)]
    pub settings: TaxFundingSettings,
    #[serde(default)]
    pub tax_tables: Vec<TaxTable>,
    #[serde(default)]
    pub securities: Vec<Security>,
    #[serde(default)]
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSeries {
    pub gross: Vec<f64>,
    pub ordinary: Vec<f64>,
    pub capital_gains: Vec<f64>,
    pub qualified_dividends: Vec<f64>,
    pub depreciation_recapture: Vec<f64>,
    pub social_security: Vec<f64>,
    pub tax_exempt: Vec<f64>,
    pub rsu_vesting: Vec<f64>,
    pub by_source: BTreeMap<IncomeSourceId, Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSeries {
    pub federal: Vec<f64>,
    pub state: Vec<f64>,
    pub total: Vec<f64>,
    pub effective_rate: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingDraw {
    pub source: FundingSource,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingYear {
    pub year: i32,
    pub tax_due: f64,
    pub converged: bool,
    pub iterations: u32,
    pub shortfall: f64,
    pub infeasible: bool,
    /// Reported tax not covered by committed liquidations.
    pub unpaid_tax: f64,
    pub draws: Vec<FundingDraw>,
}

/// Per-year anomalies reported in-band; the run keeps going past them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum YearIssue {
    #[serde(rename_all = "camelCase")]
    ConvergenceWarning {
        year: i32,
        iterations: u32,
        residual: f64,
    },
    #[serde(rename_all = "camelCase")]
    FundingShortfall {
        year: i32,
        shortfall: f64,
        infeasible: bool,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub ages: Vec<u32>,
    pub years: Vec<i32>,
    pub asset_values: BTreeMap<AssetId, Vec<f64>>,
    pub debt_values: BTreeMap<AssetId, Vec<f64>>,
    pub total_assets: Vec<f64>,
    pub total_debt: Vec<f64>,
    pub income: IncomeSeries,
    pub taxes: TaxSeries,
    pub net_cash_flow: Vec<f64>,
    pub uncovered_spending: Vec<f64>,
    pub funding: Vec<FundingYear>,
    pub issues: Vec<YearIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_trace: Option<Vec<DebugTraceEntry>>,
}
