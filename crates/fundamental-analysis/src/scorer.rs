use serde::{Deserialize, Serialize};

use agent_core::config::FundamentalConfig;

use crate::{FundamentalData, SectorOutlook};

/// Typed result record of the fundamental scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalResult {
    pub revenue_cagr_pct: Option<f64>,
    pub roe_pct: Option<f64>,
    pub roce_pct: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub positive_cash_flow_years: usize,
    pub promoter_holding_pct: Option<f64>,
    pub promoter_pledged_pct: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub sector_pe_median: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub sector_outlook: SectorOutlook,
    /// Set when the debt ceiling disqualified the stock outright.
    pub disqualified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalReport {
    pub score: f64,
    pub summary: String,
    pub result: FundamentalResult,
}

/// Score business quality on a 0–100 scale. A debt-to-equity above the
/// configured hard ceiling zeroes the score regardless of everything else.
pub fn score(data: &FundamentalData, config: &FundamentalConfig) -> FundamentalReport {
    let cagr = data.revenue_cagr_pct(config.min_cagr_years);
    let positive_cf_years = data
        .operating_cash_flow
        .iter()
        .rev()
        .take(5)
        .filter(|&&v| v > 0.0)
        .count();

    let mut result = FundamentalResult {
        revenue_cagr_pct: cagr,
        roe_pct: data.roe_pct,
        roce_pct: data.roce_pct,
        debt_to_equity: data.debt_to_equity,
        positive_cash_flow_years: positive_cf_years,
        promoter_holding_pct: data.promoter_holding_pct,
        promoter_pledged_pct: data.promoter_pledged_pct,
        pe_ratio: data.pe_ratio,
        sector_pe_median: data.sector_pe_median,
        peg_ratio: data.peg_ratio,
        sector_outlook: data.sector_outlook,
        disqualified: false,
    };

    // Hard disqualifier before any other factor is considered.
    if let Some(d2e) = data.debt_to_equity {
        if d2e > config.max_debt_to_equity {
            result.disqualified = true;
            return FundamentalReport {
                score: 0.0,
                summary: format!(
                    "- Disqualified: D/E {:.2} above ceiling {:.2}",
                    d2e, config.max_debt_to_equity
                ),
                result,
            };
        }
    }

    let mut total: f64 = 0.0;
    let mut notes: Vec<String> = Vec::new();

    // Revenue CAGR — up to 20 points.
    let growth_points = match cagr {
        Some(g) if g >= 15.0 => 20.0,
        Some(g) if g >= 10.0 => 15.0,
        Some(g) if g >= 5.0 => 8.0,
        Some(g) if g > 0.0 => 4.0,
        Some(_) => 0.0,
        None => 4.0, // missing history scores like barely-positive growth
    };
    total += growth_points;
    match cagr {
        Some(g) => notes.push(format!(
            "{} Revenue CAGR {:.1}%",
            if g >= 5.0 { "+" } else { "-" },
            g
        )),
        None => notes.push("- Revenue history incomplete".to_string()),
    }

    // Profitability — ROE and ROCE, up to 10 points each.
    let return_points = |pct: Option<f64>| match pct {
        Some(r) if r >= 18.0 => 10.0,
        Some(r) if r >= 12.0 => 6.0,
        Some(r) if r >= 8.0 => 3.0,
        Some(_) => 0.0,
        None => 2.0,
    };
    let roe_points = return_points(data.roe_pct);
    let roce_points = return_points(data.roce_pct);
    total += roe_points + roce_points;
    if roe_points + roce_points >= 12.0 {
        notes.push("+ Strong returns on equity/capital".to_string());
    } else if roe_points + roce_points <= 4.0 {
        notes.push("- Weak profitability".to_string());
    }

    // Leverage — up to 15 points.
    let debt_points = match data.debt_to_equity {
        Some(d) if d < 0.3 => 15.0,
        Some(d) if d < 0.7 => 12.0,
        Some(d) if d < 1.0 => 8.0,
        Some(d) if d < 1.5 => 4.0,
        Some(_) => 0.0,
        None => 4.0,
    };
    total += debt_points;
    if let Some(d) = data.debt_to_equity {
        notes.push(format!("{} D/E {:.2}", if d < 1.0 { "+" } else { "-" }, d));
    }

    // Cash-flow consistency — positive OCF years in the last 5, up to 15.
    let cf_points = match positive_cf_years {
        5 => 15.0,
        4 => 12.0,
        3 => 8.0,
        2 => 4.0,
        _ => 0.0,
    };
    total += cf_points;
    notes.push(format!(
        "{} {}/5 years positive operating cash flow",
        if positive_cf_years >= 4 { "+" } else { "-" },
        positive_cf_years
    ));

    // Promoter holding and pledging — +10 / -10.
    let pledged = data.promoter_pledged_pct.unwrap_or(0.0);
    let holding = data.promoter_holding_pct;
    if pledged > 20.0 {
        total -= 10.0;
        notes.push(format!("- Promoter pledging {pledged:.1}%"));
    } else if let Some(h) = holding {
        if h >= 50.0 {
            total += 10.0;
            notes.push(format!("+ Promoter holding {h:.1}%"));
        } else if h < 30.0 {
            notes.push(format!("- Promoter holding only {h:.1}%"));
        }
    }

    // Valuation vs sector median and PEG — up to 10.
    let mut valuation_points: f64 = 0.0;
    if let (Some(pe), Some(median)) = (data.pe_ratio, data.sector_pe_median) {
        if median > 0.0 && pe > 0.0 {
            if pe < median * 0.8 {
                valuation_points += 6.0;
                notes.push(format!("+ P/E {pe:.1} well below sector median {median:.1}"));
            } else if pe < median {
                valuation_points += 4.0;
                notes.push(format!("+ P/E {pe:.1} below sector median {median:.1}"));
            } else if pe > median * 1.5 {
                notes.push(format!("- P/E {pe:.1} rich vs sector median {median:.1}"));
            }
        }
    }
    if let Some(peg) = data.peg_ratio {
        if peg > 0.0 && peg < 1.0 {
            valuation_points += 4.0;
            notes.push(format!("+ PEG {peg:.2}"));
        } else if peg > 0.0 && peg < 2.0 {
            valuation_points += 2.0;
        }
    }
    total += valuation_points.min(10.0);

    // Sector outlook — up to 10.
    let outlook_points = match data.sector_outlook {
        SectorOutlook::Positive => 10.0,
        SectorOutlook::Neutral => 5.0,
        SectorOutlook::Negative => 0.0,
    };
    total += outlook_points;
    if data.sector_outlook == SectorOutlook::Negative {
        notes.push("- Weak sector outlook".to_string());
    }

    FundamentalReport {
        score: total.clamp(0.0, 100.0),
        summary: notes.join(", "),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_company() -> FundamentalData {
        FundamentalData {
            symbol: "QUALCO".to_string(),
            sector: Some("IT".to_string()),
            annual_revenue: vec![100.0, 118.0, 140.0, 165.0, 195.0],
            roe_pct: Some(22.0),
            roce_pct: Some(25.0),
            debt_to_equity: Some(0.2),
            operating_cash_flow: vec![10.0, 12.0, 15.0, 18.0, 22.0],
            promoter_holding_pct: Some(55.0),
            promoter_pledged_pct: Some(0.0),
            pe_ratio: Some(18.0),
            sector_pe_median: Some(28.0),
            peg_ratio: Some(0.8),
            sector_outlook: SectorOutlook::Positive,
        }
    }

    #[test]
    fn strong_company_scores_high() {
        let report = score(&strong_company(), &FundamentalConfig::default());
        assert!(report.score >= 85.0, "score {}", report.score);
        assert!(!report.result.disqualified);
        assert!(report.summary.contains("Revenue CAGR"));
    }

    #[test]
    fn debt_ceiling_disqualifies_everything() {
        let mut data = strong_company();
        data.debt_to_equity = Some(3.0);
        let report = score(&data, &FundamentalConfig::default());
        assert_eq!(report.score, 0.0);
        assert!(report.result.disqualified);
        assert!(report.summary.contains("Disqualified"));
    }

    #[test]
    fn heavy_pledging_costs_ten_points() {
        let clean = score(&strong_company(), &FundamentalConfig::default());
        let mut data = strong_company();
        data.promoter_pledged_pct = Some(40.0);
        let pledged = score(&data, &FundamentalConfig::default());
        // Loses the +10 holding bonus and takes the -10 penalty
        assert!((clean.score - pledged.score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_everything_takes_conservative_defaults() {
        let data = FundamentalData {
            symbol: "MYSTERY".to_string(),
            sector: None,
            annual_revenue: vec![],
            roe_pct: None,
            roce_pct: None,
            debt_to_equity: None,
            operating_cash_flow: vec![],
            promoter_holding_pct: None,
            promoter_pledged_pct: None,
            pe_ratio: None,
            sector_pe_median: None,
            peg_ratio: None,
            sector_outlook: SectorOutlook::Neutral,
        };
        let report = score(&data, &FundamentalConfig::default());
        // 4 (growth) + 4 (returns) + 4 (debt) + 0 (cash flow) + 5 (outlook)
        assert!((report.score - 17.0).abs() < 1e-9);
        assert!(!report.result.disqualified);
    }

    #[test]
    fn score_is_clamped_to_hundred() {
        let mut data = strong_company();
        data.annual_revenue = vec![100.0, 200.0, 400.0, 800.0];
        let report = score(&data, &FundamentalConfig::default());
        assert!(report.score <= 100.0);
    }

    #[test]
    fn cagr_computation() {
        let data = strong_company();
        let cagr = data.revenue_cagr_pct(3).unwrap();
        // 100 -> 195 over 4 years: (1.95)^(1/4) - 1 = ~18.2%
        assert!((cagr - 18.18).abs() < 0.1, "cagr {cagr}");
    }
}
