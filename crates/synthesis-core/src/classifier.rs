//! Row classification.
//!
//! The source page tags every row with an advice icon. The icon is the
//! authoritative buy/sell signal; take-profit can additionally be derived
//! from stored potential history through an optional [`TakeProfitRule`].
//! Thresholds are data, not code: callers inject a [`RuleTable`].

use std::collections::HashMap;
use std::str::FromStr;

use crate::{Label, Row};

/// Take-profit detection over stored history.
///
/// Fires when the current potential sits in `[band_low, band_high]` and some
/// earlier scrape of the same code showed a potential of at least
/// `min_prior_peak`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeProfitRule {
    pub band_low: f64,
    pub band_high: f64,
    pub min_prior_peak: f64,
}

impl TakeProfitRule {
    pub fn fires(&self, current: f64, history: &[f64]) -> bool {
        if current < self.band_low || current > self.band_high {
            return false;
        }
        history.iter().any(|&past| past >= self.min_prior_peak)
    }
}

impl FromStr for TakeProfitRule {
    type Err = String;

    /// Parses `"low,high,peak"`, e.g. `"0,2,5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid take-profit band `{s}`: {e}"))?;

        let &[band_low, band_high, min_prior_peak] = parts.as_slice() else {
            return Err(format!("take-profit band `{s}` must be `low,high,peak`"));
        };
        if band_low > band_high {
            return Err(format!("take-profit band `{s}`: low above high"));
        }
        if min_prior_peak <= band_high {
            return Err(format!("take-profit band `{s}`: peak must be above the band"));
        }

        Ok(Self {
            band_low,
            band_high,
            min_prior_peak,
        })
    }
}

/// Injectable classification rules.
#[derive(Debug, Clone)]
pub struct RuleTable {
    /// Advice icon file name -> label
    pub icons: HashMap<String, Label>,
    pub take_profit: Option<TakeProfitRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        let icons = [
            ("f_1b.png", Label::Buy),
            ("f_5b.png", Label::Sell),
            ("f_3b.png", Label::Keep),
            ("f_4b.png", Label::TakeProfit),
        ]
        .into_iter()
        .map(|(icon, label)| (icon.to_string(), label))
        .collect();

        Self {
            icons,
            take_profit: None,
        }
    }
}

impl RuleTable {
    pub fn with_take_profit(mut self, rule: TakeProfitRule) -> Self {
        self.take_profit = Some(rule);
        self
    }

    pub fn label_for_icon(&self, icon: &str) -> Option<Label> {
        self.icons.get(icon).copied()
    }
}

/// Pure row classifier.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: RuleTable,
}

impl Classifier {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Whether classification needs stored history at all.
    pub fn uses_history(&self) -> bool {
        self.rules.take_profit.is_some()
    }

    /// Classify one row. `history` holds earlier potentials of the same code.
    pub fn classify(&self, row: &Row, history: &[f64]) -> Label {
        let signal = row
            .recommendation
            .as_deref()
            .and_then(|icon| self.rules.label_for_icon(icon));

        match signal {
            Some(Label::Buy) => return Label::Buy,
            Some(Label::Sell) => return Label::Sell,
            Some(Label::TakeProfit) => return Label::TakeProfit,
            _ => {}
        }

        if let Some(rule) = &self.rules.take_profit {
            if rule.fires(row.potential_pct, history) {
                return Label::TakeProfit;
            }
        }

        // Rows without a recognised icon are never pushed
        signal.unwrap_or(Label::None)
    }

    /// Classify a whole batch, keeping document order within each label.
    pub fn classify_all(&self, rows: &[Row], histories: &HashMap<String, Vec<f64>>) -> Classified {
        let mut classified = Classified::default();
        for row in rows {
            let history = histories.get(&row.code).map(Vec::as_slice).unwrap_or(&[]);
            let label = self.classify(row, history);
            classified.groups.entry(label).or_default().push(row.clone());
        }
        classified
    }
}

/// Rows grouped by label.
#[derive(Debug, Clone, Default)]
pub struct Classified {
    groups: HashMap<Label, Vec<Row>>,
}

impl Classified {
    pub fn get(&self, label: Label) -> &[Row] {
        self.groups.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, label: Label) -> usize {
        self.get(label).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(code: &str, icon: Option<&str>, pct: f64) -> Row {
        Row {
            title: format!("{code} SA"),
            code: code.to_string(),
            consensus: "10,00 DT".to_string(),
            potential: format!("{pct}%"),
            potential_pct: pct,
            recommendation: icon.map(str::to_string),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn test_icons_map_to_labels() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&row("A", Some("f_1b.png"), 5.0), &[]), Label::Buy);
        assert_eq!(classifier.classify(&row("B", Some("f_5b.png"), -5.0), &[]), Label::Sell);
        assert_eq!(classifier.classify(&row("C", Some("f_3b.png"), 1.0), &[]), Label::Keep);
        assert_eq!(classifier.classify(&row("D", Some("f_4b.png"), 0.5), &[]), Label::TakeProfit);
    }

    #[test]
    fn test_unknown_or_missing_icon_is_none() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&row("A", Some("f_9b.png"), 5.0), &[]), Label::None);
        assert_eq!(classifier.classify(&row("A", None, 5.0), &[]), Label::None);
    }

    #[test]
    fn test_classify_is_pure() {
        let classifier = Classifier::new(RuleTable::default().with_take_profit(TakeProfitRule {
            band_low: 0.0,
            band_high: 2.0,
            min_prior_peak: 5.0,
        }));
        let r = row("A", Some("f_3b.png"), 1.0);
        let history = [8.0, 6.0];
        let first = classifier.classify(&r, &history);
        let second = classifier.classify(&r, &history);
        assert_eq!(first, second);
        assert_eq!(first, Label::TakeProfit);
    }

    #[test]
    fn test_take_profit_rule_needs_prior_peak() {
        let rule = TakeProfitRule {
            band_low: 0.0,
            band_high: 2.0,
            min_prior_peak: 5.0,
        };
        let classifier = Classifier::new(RuleTable::default().with_take_profit(rule));
        let keep = row("A", Some("f_3b.png"), 1.0);

        assert_eq!(classifier.classify(&keep, &[]), Label::Keep);
        assert_eq!(classifier.classify(&keep, &[3.0, 4.9]), Label::Keep);
        assert_eq!(classifier.classify(&keep, &[5.0]), Label::TakeProfit);

        // Outside the band nothing changes
        let above = row("A", Some("f_3b.png"), 3.0);
        assert_eq!(classifier.classify(&above, &[9.0]), Label::Keep);
    }

    #[test]
    fn test_source_signal_beats_history() {
        let classifier = Classifier::new(RuleTable::default().with_take_profit(TakeProfitRule {
            band_low: 0.0,
            band_high: 2.0,
            min_prior_peak: 5.0,
        }));
        let buy = row("A", Some("f_1b.png"), 1.0);
        assert_eq!(classifier.classify(&buy, &[10.0]), Label::Buy);
    }

    #[test]
    fn test_take_profit_rule_from_str() {
        let rule: TakeProfitRule = "0, 2.5, 6".parse().unwrap();
        assert_eq!(rule.band_low, 0.0);
        assert_eq!(rule.band_high, 2.5);
        assert_eq!(rule.min_prior_peak, 6.0);

        assert!("1,2".parse::<TakeProfitRule>().is_err());
        assert!("3,2,5".parse::<TakeProfitRule>().is_err());
        assert!("0,2,1".parse::<TakeProfitRule>().is_err());
        assert!("a,b,c".parse::<TakeProfitRule>().is_err());
    }

    #[test]
    fn test_classify_all_groups_in_order() {
        let classifier = Classifier::default();
        let rows = vec![
            row("A", Some("f_1b.png"), 1.0),
            row("B", Some("f_5b.png"), 2.0),
            row("C", Some("f_1b.png"), 3.0),
            row("D", None, 4.0),
        ];
        let classified = classifier.classify_all(&rows, &HashMap::new());
        let buys: Vec<&str> = classified.get(Label::Buy).iter().map(|r| r.code.as_str()).collect();
        assert_eq!(buys, vec!["A", "C"]);
        assert_eq!(classified.count(Label::Sell), 1);
        assert_eq!(classified.count(Label::None), 1);
        assert!(classified.get(Label::Keep).is_empty());
    }
}
