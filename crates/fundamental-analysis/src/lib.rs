mod provider;
mod scorer;

pub use provider::{FundamentalSource, FundamentalsClient};
pub use scorer::{score, FundamentalReport, FundamentalResult};

use serde::{Deserialize, Serialize};

/// Broad health of a sector as reported by the fundamentals provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SectorOutlook {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Per-symbol business fundamentals over a rolling multi-year window. Any
/// field may be absent; the scorer substitutes conservative defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalData {
    pub symbol: String,
    #[serde(default)]
    pub sector: Option<String>,
    /// Annual revenue, oldest first.
    #[serde(default)]
    pub annual_revenue: Vec<f64>,
    #[serde(default)]
    pub roe_pct: Option<f64>,
    #[serde(default)]
    pub roce_pct: Option<f64>,
    #[serde(default)]
    pub debt_to_equity: Option<f64>,
    /// Operating cash flow of the last five fiscal years, oldest first.
    #[serde(default)]
    pub operating_cash_flow: Vec<f64>,
    #[serde(default)]
    pub promoter_holding_pct: Option<f64>,
    #[serde(default)]
    pub promoter_pledged_pct: Option<f64>,
    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub sector_pe_median: Option<f64>,
    #[serde(default)]
    pub peg_ratio: Option<f64>,
    #[serde(default)]
    pub sector_outlook: SectorOutlook,
}

impl FundamentalData {
    /// Compound annual growth rate of revenue over the available window.
    pub fn revenue_cagr_pct(&self, min_years: usize) -> Option<f64> {
        if self.annual_revenue.len() < min_years.max(2) {
            return None;
        }
        let first = *self.annual_revenue.first()?;
        let last = *self.annual_revenue.last()?;
        if first <= 0.0 || last <= 0.0 {
            return None;
        }
        let years = (self.annual_revenue.len() - 1) as f64;
        Some(((last / first).powf(1.0 / years) - 1.0) * 100.0)
    }
}
