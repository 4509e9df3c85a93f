use super::{CandleCoverage, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest price position relative to EMA50 for one (symbol, timeframe, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmaAnalysis {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub current_price: f64,
    pub ema50: f64,
    pub pct_from_ema50: f64,
    pub above_ema50: bool,
    pub analysis_date: NaiveDate,
    pub candle_time: DateTime<Utc>,
}

impl EmaAnalysis {
    /// Build a snapshot from the latest close and EMA.
    ///
    /// Returns `None` when the EMA is not a positive finite number.
    pub fn from_latest(
        symbol: &str,
        timeframe: Timeframe,
        current_price: f64,
        ema50: f64,
        candle_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if !ema50.is_finite() || ema50 <= 0.0 || !current_price.is_finite() {
            return None;
        }
        let above_ema50 = current_price > ema50;
        // Keep pct at exactly zero when price equals the EMA
        let pct_from_ema50 = if current_price == ema50 {
            0.0
        } else {
            (current_price - ema50) / ema50 * 100.0
        };

        Some(Self {
            symbol: symbol.to_uppercase(),
            timeframe,
            current_price,
            ema50,
            pct_from_ema50,
            above_ema50,
            analysis_date: now.date_naive(),
            candle_time,
        })
    }

    /// Trend label for this snapshot.
    pub fn trend(&self) -> TrendLabel {
        TrendLabel::from_pct(self.pct_from_ema50)
    }
}

/// Trend strength from distance to EMA50.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendLabel {
    #[serde(rename = "Very Bullish")]
    VeryBullish,
    #[serde(rename = "Bullish")]
    Bullish,
    #[serde(rename = "Slightly Bullish")]
    SlightlyBullish,
    #[serde(rename = "Neutral")]
    Neutral,
    #[serde(rename = "Slightly Bearish")]
    SlightlyBearish,
    #[serde(rename = "Bearish")]
    Bearish,
    #[serde(rename = "Very Bearish")]
    VeryBearish,
}

impl TrendLabel {
    pub fn from_pct(pct: f64) -> Self {
        if pct > 20.0 {
            TrendLabel::VeryBullish
        } else if pct > 10.0 {
            TrendLabel::Bullish
        } else if pct > 5.0 {
            TrendLabel::SlightlyBullish
        } else if pct > -5.0 {
            TrendLabel::Neutral
        } else if pct > -10.0 {
            TrendLabel::SlightlyBearish
        } else if pct > -20.0 {
            TrendLabel::Bearish
        } else {
            TrendLabel::VeryBearish
        }
    }
}

/// Per-timeframe entry inside an alignment row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframePosition {
    pub pct: f64,
    pub trend: TrendLabel,
    pub above: bool,
}

/// How many timeframes agree on the direction for a coin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeAlignment {
    pub symbol: String,
    pub bullish_timeframes: usize,
    pub bearish_timeframes: usize,
    pub total_timeframes: usize,
    pub alignment_score: f64,
    pub primary_trend: String,
    pub timeframe_data: BTreeMap<Timeframe, TimeframePosition>,
}

impl TimeframeAlignment {
    /// Build from the latest snapshots of one symbol. `None` if there are none.
    pub fn from_snapshots(symbol: &str, snapshots: &[EmaAnalysis]) -> Option<Self> {
        if snapshots.is_empty() {
            return None;
        }
        let mut timeframe_data = BTreeMap::new();
        for snapshot in snapshots {
            timeframe_data.insert(
                snapshot.timeframe,
                TimeframePosition {
                    pct: snapshot.pct_from_ema50,
                    trend: snapshot.trend(),
                    above: snapshot.above_ema50,
                },
            );
        }
        let total = timeframe_data.len();
        let bullish = timeframe_data.values().filter(|p| p.above).count();
        let bearish = total - bullish;

        Some(Self {
            symbol: symbol.to_uppercase(),
            bullish_timeframes: bullish,
            bearish_timeframes: bearish,
            total_timeframes: total,
            alignment_score: bullish.max(bearish) as f64 / total as f64 * 100.0,
            primary_trend: if bullish > bearish { "Bullish" } else { "Bearish" }.to_string(),
            timeframe_data,
        })
    }
}

/// A coin that made it into a strategic list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategicEntry {
    pub symbol: String,
    pub name: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub current_price: f64,
    pub ema50: f64,
    pub pct_from_ema50: f64,
    pub above_ema50: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub four_h_pct_from_ema: Option<f64>,
}

/// Evaluate / trade-now / avoid lists built from weekly and 4h snapshots.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategicSummary {
    pub evaluate_long_term: Vec<StrategicEntry>,
    pub trade_now_short_term: Vec<StrategicEntry>,
    pub avoid: Vec<StrategicEntry>,
}

/// Weekly pct at or above this keeps a coin on the evaluate list.
pub const EVALUATE_MIN_PCT: f64 = -10.0;
/// 4h distance from EMA that counts as "trade now".
pub const TRADE_NOW_BAND_PCT: f64 = 5.0;

impl StrategicSummary {
    /// Categorize coins. `weekly` entries drive evaluate/avoid; `four_h` maps
    /// symbols to their 4h pct for the trade-now list.
    pub fn build(weekly: Vec<StrategicEntry>, four_h: &BTreeMap<String, f64>) -> Self {
        let mut summary = Self::default();

        for entry in weekly {
            if let Some(&pct_4h) = four_h.get(&entry.symbol) {
                if pct_4h.abs() <= TRADE_NOW_BAND_PCT {
                    summary.trade_now_short_term.push(StrategicEntry {
                        four_h_pct_from_ema: Some(pct_4h),
                        ..entry.clone()
                    });
                }
            }
            if entry.pct_from_ema50 >= EVALUATE_MIN_PCT {
                summary.evaluate_long_term.push(entry);
            } else {
                summary.avoid.push(entry);
            }
        }

        let by_rank = |e: &StrategicEntry| e.market_cap_rank.unwrap_or(u32::MAX);
        summary.evaluate_long_term.sort_by_key(by_rank);
        summary.avoid.sort_by_key(by_rank);
        summary.trade_now_short_term.sort_by(|a, b| {
            let a = a.four_h_pct_from_ema.unwrap_or_default().abs();
            let b = b.four_h_pct_from_ema.unwrap_or_default().abs();
            a.total_cmp(&b)
        });
        summary
    }
}

/// Coverage quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityLabel {
    Excellent,
    Good,
    Fair,
    Limited,
}

impl QualityLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => QualityLabel::Excellent,
            70..=89 => QualityLabel::Good,
            50..=69 => QualityLabel::Fair,
            _ => QualityLabel::Limited,
        }
    }
}

/// Coverage of one timeframe scored against its long-horizon target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageQuality {
    #[serde(flatten)]
    pub coverage: CandleCoverage,
    pub years_of_data: f64,
    pub quality_score: u8,
    pub quality_label: QualityLabel,
}

impl CoverageQuality {
    pub fn score(coverage: CandleCoverage) -> Self {
        let expected = coverage.timeframe.long_horizon().max(1);
        let quality_score = ((coverage.candle_count as f64 / expected as f64) * 100.0).min(100.0) as u8;
        let years_of_data = match (coverage.earliest, coverage.latest) {
            (Some(earliest), Some(latest)) => {
                let days = (latest - earliest).num_days() as f64;
                (days / 365.25 * 100.0).round() / 100.0
            }
            _ => 0.0,
        };

        Self {
            coverage,
            years_of_data,
            quality_score,
            quality_label: QualityLabel::from_score(quality_score),
        }
    }

    /// Mean quality across timeframes, 0 when there is no coverage.
    pub fn overall(items: &[CoverageQuality]) -> u8 {
        if items.is_empty() {
            return 0;
        }
        let total: u32 = items.iter().map(|q| q.quality_score as u32).sum();
        (total / items.len() as u32) as u8
    }
}

/// Daily low/high over a few horizons, and where the current price sits in
/// the five-year range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    pub all_time_low: Option<f64>,
    pub all_time_high: Option<f64>,
    pub five_year_low: Option<f64>,
    pub five_year_high: Option<f64>,
    pub one_year_low: Option<f64>,
    pub one_year_high: Option<f64>,
    pub current_price: Option<f64>,
    /// 0 at the five-year low, 100 at the high, one decimal.
    pub price_position_5y: Option<f64>,
}

impl PriceRange {
    /// Build from `(low, high)` pairs per horizon.
    pub fn new(
        all_time: Option<(f64, f64)>,
        five_year: Option<(f64, f64)>,
        one_year: Option<(f64, f64)>,
        current_price: Option<f64>,
    ) -> Self {
        let price_position_5y = match (five_year, current_price) {
            (Some((low, high)), Some(price)) if high > low => {
                Some(((price - low) / (high - low) * 1000.0).round() / 10.0)
            }
            (Some(_), Some(_)) => Some(50.0),
            _ => None,
        };

        Self {
            all_time_low: all_time.map(|r| r.0),
            all_time_high: all_time.map(|r| r.1),
            five_year_low: five_year.map(|r| r.0),
            five_year_high: five_year.map(|r| r.1),
            one_year_low: one_year.map(|r| r.0),
            one_year_high: one_year.map(|r| r.1),
            current_price,
            price_position_5y,
        }
    }
}

/// How far a coin's stored data and snapshots can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Confidence plus the reasons behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceRating {
    pub confidence: Confidence,
    pub confidence_factors: Vec<String>,
}

impl ConfidenceRating {
    /// Rate from overall coverage quality and the per-timeframe snapshots.
    pub fn assess(overall_quality: u8, analysis: &[EmaAnalysis]) -> Self {
        let mut factors = Vec::new();

        factors.push(
            match overall_quality {
                80..=u8::MAX => "Excellent data coverage",
                60..=79 => "Good data coverage",
                _ => "Limited historical data",
            }
            .to_string(),
        );

        if !analysis.is_empty() {
            let above = analysis.iter().filter(|a| a.above_ema50).count();
            let pct_above = above as f64 / analysis.len() as f64 * 100.0;
            let factor = if pct_above >= 80.0 {
                "Strong bullish trend"
            } else if pct_above >= 60.0 {
                "Bullish momentum"
            } else if pct_above <= 20.0 {
                "Strong bearish trend"
            } else if pct_above <= 40.0 {
                "Bearish momentum"
            } else {
                "Mixed signals"
            };
            factors.push(factor.to_string());
        }

        let confidence = if overall_quality >= 80 && analysis.len() >= 4 {
            Confidence::High
        } else if overall_quality >= 60 && analysis.len() >= 3 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Self {
            confidence,
            confidence_factors: factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn snapshot(tf: Timeframe, price: f64, ema: f64) -> EmaAnalysis {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        EmaAnalysis::from_latest("btc", tf, price, ema, now, now).unwrap()
    }

    fn entry(symbol: &str, rank: u32, pct: f64) -> StrategicEntry {
        StrategicEntry {
            symbol: symbol.to_string(),
            name: None,
            market_cap_rank: Some(rank),
            current_price: 100.0,
            ema50: 100.0,
            pct_from_ema50: pct,
            above_ema50: pct > 0.0,
            four_h_pct_from_ema: None,
        }
    }

    #[test]
    fn test_pct_sign_matches_above() {
        for (price, ema) in [(110.0, 100.0), (90.0, 100.0), (100.0, 100.0), (0.5, 0.49)] {
            let s = snapshot(Timeframe::D1, price, ema);
            assert_eq!(s.above_ema50, s.pct_from_ema50 > 0.0);
        }
        let equal = snapshot(Timeframe::D1, 100.0, 100.0);
        assert_eq!(equal.pct_from_ema50, 0.0);
        assert!(!equal.above_ema50);
    }

    #[test]
    fn test_from_latest_rejects_bad_ema() {
        let now = Utc::now();
        assert!(EmaAnalysis::from_latest("x", Timeframe::H1, 1.0, 0.0, now, now).is_none());
        assert!(EmaAnalysis::from_latest("x", Timeframe::H1, 1.0, f64::NAN, now, now).is_none());
    }

    #[test]
    fn test_analysis_date_is_utc_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();
        let s = EmaAnalysis::from_latest("eth", Timeframe::H4, 2.0, 1.0, now, now).unwrap();
        assert_eq!(s.analysis_date.to_string(), "2024-05-01");
    }

    #[test]
    fn test_trend_label_thresholds() {
        assert_eq!(TrendLabel::from_pct(25.0), TrendLabel::VeryBullish);
        assert_eq!(TrendLabel::from_pct(20.0), TrendLabel::Bullish);
        assert_eq!(TrendLabel::from_pct(7.0), TrendLabel::SlightlyBullish);
        assert_eq!(TrendLabel::from_pct(0.0), TrendLabel::Neutral);
        assert_eq!(TrendLabel::from_pct(-5.0), TrendLabel::SlightlyBearish);
        assert_eq!(TrendLabel::from_pct(-15.0), TrendLabel::Bearish);
        assert_eq!(TrendLabel::from_pct(-20.0), TrendLabel::VeryBearish);
    }

    #[test]
    fn test_alignment_score() {
        let snapshots = vec![
            snapshot(Timeframe::H1, 110.0, 100.0),
            snapshot(Timeframe::H4, 105.0, 100.0),
            snapshot(Timeframe::D1, 95.0, 100.0),
            snapshot(Timeframe::W1, 120.0, 100.0),
        ];
        let alignment = TimeframeAlignment::from_snapshots("btc", &snapshots).unwrap();
        assert_eq!(alignment.bullish_timeframes, 3);
        assert_eq!(alignment.bearish_timeframes, 1);
        assert_eq!(alignment.alignment_score, 75.0);
        assert_eq!(alignment.primary_trend, "Bullish");
        assert!(TimeframeAlignment::from_snapshots("btc", &[]).is_none());
    }

    #[test]
    fn test_strategic_summary_buckets() {
        let weekly = vec![entry("AAA", 3, 4.0), entry("BBB", 1, -10.0), entry("CCC", 2, -25.0)];
        let mut four_h = BTreeMap::new();
        four_h.insert("AAA".to_string(), -4.0);
        four_h.insert("BBB".to_string(), 1.0);
        four_h.insert("CCC".to_string(), 12.0);

        let summary = StrategicSummary::build(weekly, &four_h);
        let evaluate: Vec<_> = summary.evaluate_long_term.iter().map(|e| e.symbol.as_str()).collect();
        let avoid: Vec<_> = summary.avoid.iter().map(|e| e.symbol.as_str()).collect();
        let trade: Vec<_> = summary.trade_now_short_term.iter().map(|e| e.symbol.as_str()).collect();

        assert_eq!(evaluate, vec!["BBB", "AAA"]);
        assert_eq!(avoid, vec!["CCC"]);
        assert_eq!(trade, vec!["BBB", "AAA"]);
    }

    #[test]
    fn test_coverage_quality() {
        let latest = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let coverage = CandleCoverage {
            timeframe: Timeframe::D1,
            candle_count: 1_460,
            earliest: Some(latest - Duration::days(1_461)),
            latest: Some(latest),
        };
        let quality = CoverageQuality::score(coverage);
        assert_eq!(quality.quality_score, 80);
        assert_eq!(quality.quality_label, QualityLabel::Good);
        assert_eq!(quality.years_of_data, 4.0);

        let full = CoverageQuality::score(CandleCoverage {
            timeframe: Timeframe::W1,
            candle_count: 400,
            earliest: None,
            latest: None,
        });
        assert_eq!(full.quality_score, 100);
        assert_eq!(CoverageQuality::overall(&[quality, full]), 90);
        assert_eq!(CoverageQuality::overall(&[]), 0);
    }

    #[test]
    fn test_price_position_in_five_year_range() {
        let range = PriceRange::new(Some((5.0, 300.0)), Some((50.0, 250.0)), Some((90.0, 200.0)), Some(100.0));
        assert_eq!(range.all_time_low, Some(5.0));
        assert_eq!(range.one_year_high, Some(200.0));
        assert_eq!(range.price_position_5y, Some(25.0));

        let rounded = PriceRange::new(None, Some((0.0, 3.0)), None, Some(1.0));
        assert_eq!(rounded.price_position_5y, Some(33.3));
    }

    #[test]
    fn test_price_position_edge_cases() {
        let flat = PriceRange::new(None, Some((10.0, 10.0)), None, Some(10.0));
        assert_eq!(flat.price_position_5y, Some(50.0));

        let no_history = PriceRange::new(None, None, None, Some(10.0));
        assert!(no_history.price_position_5y.is_none());
        let no_price = PriceRange::new(None, Some((1.0, 2.0)), None, None);
        assert!(no_price.price_position_5y.is_none());
    }

    #[test]
    fn test_confidence_levels() {
        let four: Vec<EmaAnalysis> = [Timeframe::H1, Timeframe::H4, Timeframe::D1, Timeframe::W1]
            .into_iter()
            .map(|tf| snapshot(tf, 110.0, 100.0))
            .collect();

        let high = ConfidenceRating::assess(85, &four);
        assert_eq!(high.confidence, Confidence::High);
        assert_eq!(high.confidence_factors, vec!["Excellent data coverage", "Strong bullish trend"]);

        assert_eq!(ConfidenceRating::assess(85, &four[..3]).confidence, Confidence::Medium);
        assert_eq!(ConfidenceRating::assess(79, &four).confidence, Confidence::Medium);
        assert_eq!(ConfidenceRating::assess(59, &four).confidence, Confidence::Low);
        assert_eq!(ConfidenceRating::assess(100, &four[..2]).confidence, Confidence::Low);
    }

    #[test]
    fn test_confidence_factors_follow_alignment() {
        let rows = vec![
            snapshot(Timeframe::H4, 110.0, 100.0),
            snapshot(Timeframe::D1, 90.0, 100.0),
        ];
        let mixed = ConfidenceRating::assess(65, &rows);
        assert_eq!(mixed.confidence_factors, vec!["Good data coverage", "Mixed signals"]);

        let bearish = vec![
            snapshot(Timeframe::H1, 90.0, 100.0),
            snapshot(Timeframe::H4, 90.0, 100.0),
            snapshot(Timeframe::D1, 110.0, 100.0),
        ];
        let rating = ConfidenceRating::assess(10, &bearish);
        assert_eq!(rating.confidence_factors, vec!["Limited historical data", "Bearish momentum"]);

        // no snapshots, coverage factor only
        let empty = ConfidenceRating::assess(0, &[]);
        assert_eq!(empty.confidence, Confidence::Low);
        assert_eq!(empty.confidence_factors.len(), 1);
        assert_eq!(serde_json::to_value(empty.confidence).unwrap(), "LOW");
    }
}
