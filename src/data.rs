//! Price data collaborators.
//!
//! The analytics core only sees the [`PriceSeriesProvider`] and [`PriceSource`]
//! traits. This module also carries the reference adapters: a directory of
//! per-symbol CSV files, an in-memory provider, and a fixed-count retry wrapper.

use crate::error::{QuantError, Result};
use crate::types::PriceBar;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// History window requested from a provider, anchored at the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub fn code(&self) -> &'static str {
        match self {
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::TenYears => "10y",
            Period::YearToDate => "ytd",
            Period::Max => "max",
        }
    }

    fn months(&self) -> Option<u32> {
        match self {
            Period::OneMonth => Some(1),
            Period::ThreeMonths => Some(3),
            Period::SixMonths => Some(6),
            Period::OneYear => Some(12),
            Period::TwoYears => Some(24),
            Period::FiveYears => Some(60),
            Period::TenYears => Some(120),
            Period::YearToDate | Period::Max => None,
        }
    }

    /// First date (inclusive) covered when the latest bar is on `latest`.
    pub fn start_from(&self, latest: NaiveDate) -> Option<NaiveDate> {
        match self {
            Period::Max => None,
            Period::YearToDate => NaiveDate::from_ymd_opt(latest.year(), 1, 1),
            _ => {
                let months = self.months()?;
                latest
                    .checked_sub_months(Months::new(months))
                    .and_then(|d| d.succ_opt())
            }
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::OneYear
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Period {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self> {
        let period = match s {
            "1mo" => Period::OneMonth,
            "3mo" => Period::ThreeMonths,
            "6mo" => Period::SixMonths,
            "1y" => Period::OneYear,
            "2y" => Period::TwoYears,
            "5y" => Period::FiveYears,
            "10y" => Period::TenYears,
            "ytd" => Period::YearToDate,
            "max" => Period::Max,
            other => {
                return Err(QuantError::InvalidInput(format!(
                    "unknown period '{}' (expected 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd or max)",
                    other
                )))
            }
        };
        Ok(period)
    }
}

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1wk")]
    Weekly,
}

impl FromStr for Interval {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1d" => Ok(Interval::Daily),
            "1wk" => Ok(Interval::Weekly),
            other => Err(QuantError::InvalidInput(format!(
                "unsupported interval '{}' (expected 1d or 1wk)",
                other
            ))),
        }
    }
}

/// Source of historical bars for a symbol.
///
/// Implementations must return bars with strictly increasing, unique dates, and
/// report missing data as [`QuantError::DataUnavailable`].
pub trait PriceSeriesProvider: Send + Sync {
    fn fetch_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<PriceBar>>;
}

/// Source of the current best-known price for a symbol.
pub trait PriceSource: Send + Sync {
    fn fetch_latest_price(&self, symbol: &str) -> Result<f64>;
}

/// Check the provider contract on a fetched series.
pub fn validate_series(symbol: &str, bars: &[PriceBar]) -> Result<()> {
    if bars.is_empty() {
        return Err(QuantError::unavailable(symbol, "no bars returned"));
    }
    if let Some(w) = bars.windows(2).find(|w| w[1].date <= w[0].date) {
        return Err(QuantError::unavailable(
            symbol,
            format!(
                "dates not strictly increasing ({} followed by {})",
                w[0].date, w[1].date
            ),
        ));
    }
    Ok(())
}

/// Bars whose date falls inside `[start, end]`.
pub fn filter_by_date(bars: &[PriceBar], start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
    bars.iter()
        .filter(|b| b.date >= start && b.date <= end)
        .cloned()
        .collect()
}

/// Aggregate daily bars into ISO weeks, dated at each week's last bar.
pub fn resample_weekly(bars: &[PriceBar]) -> Vec<PriceBar> {
    let mut out: Vec<PriceBar> = Vec::new();
    let mut current_week = None;

    for bar in bars {
        let week = bar.date.iso_week();
        let key = (week.year(), week.week());
        match out.last_mut() {
            Some(agg) if current_week == Some(key) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume = agg.volume.saturating_add(bar.volume);
                agg.date = bar.date;
            }
            _ => {
                out.push(bar.clone());
                current_week = Some(key);
            }
        }
    }
    out
}

/// Apply the period window and interval to a full, validated history.
fn select_window(bars: &[PriceBar], period: Period, interval: Interval) -> Vec<PriceBar> {
    let Some(latest) = bars.last().map(|b| b.date) else {
        return Vec::new();
    };
    let windowed: Vec<PriceBar> = match period.start_from(latest) {
        Some(start) => bars.iter().filter(|b| b.date >= start).cloned().collect(),
        None => bars.to_vec(),
    };
    match interval {
        Interval::Daily => windowed,
        Interval::Weekly => resample_weekly(&windowed),
    }
}

/// Raw CSV row with flexible header names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Datetime",
        alias = "datetime",
        alias = "Timestamp",
        alias = "timestamp"
    )]
    date: String,
    #[serde(alias = "Open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "c", alias = "Adj Close")]
    close: f64,
    #[serde(alias = "Volume", alias = "v", default)]
    volume: f64,
}

/// Parse a calendar date, accepting datetime strings by their date part.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    // "2024-01-02 00:00:00-05:00" and friends
    if let Some(prefix) = s.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Ok(d);
        }
    }

    Err(QuantError::InvalidInput(format!(
        "could not parse date '{}'",
        s
    )))
}

/// Load daily bars from a CSV file, sorted and de-duplicated by date.
///
/// Rows that fail to parse or fail [`PriceBar::validate`] are skipped.
pub fn load_csv(path: impl AsRef<Path>, date_format: Option<&str>) -> Result<Vec<PriceBar>> {
    let path = path.as_ref();
    debug!("Loading bars from: {}", path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut bars = Vec::new();
    let mut skipped = 0usize;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
        };
        let date = match parse_date(&row.date, date_format) {
            Ok(d) => d,
            Err(e) => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
        };
        let bar = PriceBar::new(
            date,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume.max(0.0).round() as u64,
        );
        if !bar.validate() {
            debug!("Skipping row {} due to invalid bar: {:?}", row_num + 1, bar);
            skipped += 1;
            continue;
        }
        bars.push(bar);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    bars.sort_by_key(|b| b.date);
    let original_len = bars.len();
    bars.dedup_by_key(|b| b.date);
    if bars.len() < original_len {
        warn!(
            "Removed {} duplicate dates from {}",
            original_len - bars.len(),
            path.display()
        );
    }

    Ok(bars)
}

/// Provider backed by a directory holding one `<SYMBOL>.csv` per symbol.
#[derive(Debug, Clone)]
pub struct CsvPriceProvider {
    dir: PathBuf,
    date_format: Option<String>,
}

impl CsvPriceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            date_format: None,
        }
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }

    fn load_history(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(QuantError::unavailable(
                symbol,
                format!("no data file at {}", path.display()),
            ));
        }
        let bars = load_csv(&path, self.date_format.as_deref())
            .map_err(|e| QuantError::unavailable(symbol, e.to_string()))?;
        validate_series(symbol, &bars)?;
        Ok(bars)
    }
}

impl PriceSeriesProvider for CsvPriceProvider {
    fn fetch_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<PriceBar>> {
        let history = self.load_history(symbol)?;
        let bars = select_window(&history, period, interval);
        validate_series(symbol, &bars)?;
        info!("Fetched {} bars for {} ({})", bars.len(), symbol, period);
        Ok(bars)
    }
}

impl PriceSource for CsvPriceProvider {
    fn fetch_latest_price(&self, symbol: &str) -> Result<f64> {
        let history = self.load_history(symbol)?;
        history
            .last()
            .map(|b| b.close)
            .ok_or_else(|| QuantError::unavailable(symbol, "no bars returned"))
    }
}

/// Provider serving bars held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: HashMap<String, Vec<PriceBar>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series; bars are sorted and de-duplicated by date.
    pub fn insert(&mut self, symbol: impl Into<String>, mut bars: Vec<PriceBar>) {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        self.series.insert(symbol.into(), bars);
    }

    pub fn with_series(mut self, symbol: impl Into<String>, bars: Vec<PriceBar>) -> Self {
        self.insert(symbol, bars);
        self
    }

    fn history(&self, symbol: &str) -> Result<&[PriceBar]> {
        self.series
            .get(symbol)
            .map(|b| b.as_slice())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| QuantError::unavailable(symbol, "no data found"))
    }
}

impl PriceSeriesProvider for InMemoryProvider {
    fn fetch_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<PriceBar>> {
        let bars = select_window(self.history(symbol)?, period, interval);
        validate_series(symbol, &bars)?;
        Ok(bars)
    }
}

impl PriceSource for InMemoryProvider {
    fn fetch_latest_price(&self, symbol: &str) -> Result<f64> {
        self.history(symbol)?
            .last()
            .map(|b| b.close)
            .ok_or_else(|| QuantError::unavailable(symbol, "no data found"))
    }
}

/// Retries a wrapped collaborator a fixed number of times with a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryingProvider<P> {
    inner: P,
    attempts: u32,
    delay: Duration,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn call<T>(&self, symbol: &str, op: impl Fn(&P) -> Result<T>) -> Result<T> {
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match op(&self.inner) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Fetch for {} failed (attempt {}/{}): {}",
                        symbol, attempt, self.attempts, e
                    );
                    last_error = Some(e);
                    if attempt < self.attempts && !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        Err(QuantError::unavailable(
            symbol,
            format!("failed after {} attempts: {}", self.attempts, reason),
        ))
    }
}

impl<P: PriceSeriesProvider> PriceSeriesProvider for RetryingProvider<P> {
    fn fetch_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<PriceBar>> {
        self.call(symbol, |p| p.fetch_price_series(symbol, period, interval))
    }
}

impl<P: PriceSource> PriceSource for RetryingProvider<P> {
    fn fetch_latest_price(&self, symbol: &str) -> Result<f64> {
        self.call(symbol, |p| p.fetch_latest_price(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::NamedTempFile;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily_bars(start: NaiveDate, n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| PriceBar::flat(start + chrono::Duration::days(i as i64), 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_period_parsing_roundtrip() {
        for code in ["1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"] {
            assert_eq!(code.parse::<Period>().unwrap().code(), code);
        }
        assert!("7y".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_start() {
        let latest = day(2024, 6, 30);
        assert_eq!(Period::OneYear.start_from(latest), Some(day(2023, 7, 1)));
        assert_eq!(Period::YearToDate.start_from(latest), Some(day(2024, 1, 1)));
        assert_eq!(Period::Max.start_from(latest), None);
    }

    #[test]
    fn test_validate_series_rejects_duplicates() {
        let d = day(2024, 1, 2);
        let bars = vec![PriceBar::flat(d, 1.0), PriceBar::flat(d, 2.0)];
        assert!(matches!(
            validate_series("X", &bars),
            Err(QuantError::DataUnavailable { .. })
        ));
        assert!(validate_series("X", &[]).is_err());
    }

    #[test]
    fn test_weekly_resample() {
        // 2024-01-01 is a Monday
        let bars = daily_bars(day(2024, 1, 1), 10);
        let weekly = resample_weekly(&bars);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].date, day(2024, 1, 7));
        assert!((weekly[0].open - 100.0).abs() < 1e-12);
        assert!((weekly[0].close - 106.0).abs() < 1e-12);
        assert!((weekly[1].close - 109.0).abs() < 1e-12);
    }

    #[test]
    fn test_in_memory_period_window() {
        let provider =
            InMemoryProvider::new().with_series("AAA", daily_bars(day(2022, 1, 1), 800));
        let all = provider
            .fetch_price_series("AAA", Period::Max, Interval::Daily)
            .unwrap();
        let year = provider
            .fetch_price_series("AAA", Period::OneYear, Interval::Daily)
            .unwrap();
        assert_eq!(all.len(), 800);
        assert!(year.len() >= 365 && year.len() <= 366);
        assert!(provider
            .fetch_price_series("ZZZ", Period::Max, Interval::Daily)
            .is_err());
    }

    #[test]
    fn test_load_csv_sorts_and_skips_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-03,101,102,100,101.5,1000").unwrap();
        writeln!(file, "2024-01-02 00:00:00-05:00,100,101,99,100.5,900").unwrap();
        writeln!(file, "2024-01-04,101,99,100,101,1000").unwrap();
        writeln!(file, "not-a-date,1,1,1,1,1").unwrap();
        file.flush().unwrap();

        let bars = load_csv(file.path(), None).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, day(2024, 1, 2));
        assert_eq!(bars[1].volume, 1000);
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl PriceSeriesProvider for Flaky {
        fn fetch_price_series(&self, symbol: &str, _: Period, _: Interval) -> Result<Vec<PriceBar>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(QuantError::unavailable(symbol, "timeout"))
            } else {
                Ok(daily_bars(day(2024, 1, 1), 3))
            }
        }
    }

    #[test]
    fn test_retry_recovers_within_budget() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            3,
            Duration::ZERO,
        );
        let bars = provider
            .fetch_price_series("AAA", Period::Max, Interval::Daily)
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: 10,
                calls: AtomicU32::new(0),
            },
            3,
            Duration::ZERO,
        );
        let err = provider
            .fetch_price_series("AAA", Period::Max, Interval::Daily)
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }
}
