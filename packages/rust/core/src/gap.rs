//! Gap analysis: which years of an entity's year-map still need a lookup.

use csrledger_shared::{ReportYears, YearEntry};
use tracing::warn;

/// Lookback applied when an entity has no recorded years.
pub const DEFAULT_LOOKBACK_YEARS: i32 = 2;

/// Years to look up for one entity, plus the window they were drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gaps {
    /// First year of the window (inclusive). The window ends at the current year.
    pub window_start: i32,
    /// Ascending years with no resolved reference.
    pub missing: Vec<i32>,
}

/// Computes the window and missing years of a year-map.
#[derive(Debug, Clone, Copy)]
pub struct GapAnalyzer {
    lookback_years: i32,
}

impl Default for GapAnalyzer {
    fn default() -> Self {
        Self {
            lookback_years: DEFAULT_LOOKBACK_YEARS,
        }
    }
}

impl GapAnalyzer {
    pub fn new(lookback_years: i32) -> Self {
        Self { lookback_years }
    }

    /// Start of the window: the earliest recorded year, or
    /// `current_year - lookback_years` when nothing is recorded.
    pub fn window_start(&self, years: &ReportYears, current_year: i32) -> i32 {
        years
            .earliest_year()
            .unwrap_or(current_year - self.lookback_years)
    }

    /// Missing years of `years` in `[window_start, current_year]`.
    pub fn analyze(&self, years: &ReportYears, current_year: i32) -> Gaps {
        let window_start = self.window_start(years, current_year);
        Gaps {
            window_start,
            missing: missing_years(years, window_start, current_year),
        }
    }
}

/// Every year in `[window_start, window_end]` without a resolved reference,
/// ascending. Confirmed-absent years count as missing. An inverted window
/// yields nothing.
pub fn missing_years(years: &ReportYears, window_start: i32, window_end: i32) -> Vec<i32> {
    if window_start > window_end {
        warn!(
            window_start,
            window_end, "report window starts after the current year, nothing to look up"
        );
        return Vec::new();
    }

    (window_start..=window_end)
        .filter(|year| !matches!(years.get(*year), YearEntry::Resolved(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history_uses_lookback() {
        let gaps = GapAnalyzer::default().analyze(&ReportYears::new(), 2025);
        assert_eq!(gaps.window_start, 2023);
        assert_eq!(gaps.missing, vec![2023, 2024, 2025]);
    }

    #[test]
    fn confirmed_absent_counts_as_missing() {
        let mut years = ReportYears::new();
        years.resolve(2022, "https://acme.example/2022.pdf");
        years.set(2023, YearEntry::ConfirmedAbsent);

        let gaps = GapAnalyzer::default().analyze(&years, 2024);
        assert_eq!(gaps.window_start, 2022);
        assert_eq!(gaps.missing, vec![2023, 2024]);
    }

    #[test]
    fn resolved_years_are_never_returned() {
        let mut years = ReportYears::new();
        for year in [2018, 2020, 2021, 2024] {
            years.resolve(year, format!("https://acme.example/{year}.pdf"));
        }
        years.set(2019, YearEntry::ConfirmedAbsent);

        let gaps = GapAnalyzer::default().analyze(&years, 2025);
        assert_eq!(gaps.missing, vec![2019, 2022, 2023, 2025]);
        for year in &gaps.missing {
            assert!(!years.is_resolved(*year));
        }
    }

    #[test]
    fn fully_resolved_window_is_empty() {
        let mut years = ReportYears::new();
        for year in 2023..=2025 {
            years.resolve(year, "u");
        }
        assert!(GapAnalyzer::default().analyze(&years, 2025).missing.is_empty());
    }

    #[test]
    fn future_history_yields_empty_window() {
        let mut years = ReportYears::new();
        years.resolve(2030, "https://acme.example/2030.pdf");

        let gaps = GapAnalyzer::default().analyze(&years, 2025);
        assert_eq!(gaps.window_start, 2030);
        assert!(gaps.missing.is_empty());
    }

    #[test]
    fn custom_lookback() {
        let gaps = GapAnalyzer::new(0).analyze(&ReportYears::new(), 2025);
        assert_eq!(gaps.missing, vec![2025]);
    }
}
