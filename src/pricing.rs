//! Cost estimation from token usage.
//!
//! Rates are USD per one million tokens. Model ids are matched by the longest
//! table key contained in the id, so `gpt-5.2-pro-2025-12-11` prices as
//! `gpt-5.2-pro` rather than `gpt-5.2`.

use crate::protocol::Usage;

const TOKEN_UNIT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub cached_input: f64,
    pub output: f64,
}

impl ModelRates {
    pub const fn new(input: f64, cached_input: f64, output: f64) -> Self {
        Self {
            input,
            cached_input,
            output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    /// `None` when no rates could be found at all.
    pub total_cost: Option<f64>,
    pub is_estimated: bool,
}

impl CostSummary {
    pub const ZERO: CostSummary = CostSummary {
        total_cost: Some(0.0),
        is_estimated: false,
    };

    pub fn unavailable() -> Self {
        Self {
            total_cost: None,
            is_estimated: true,
        }
    }

    pub fn is_available(&self) -> bool {
        self.total_cost.is_some()
    }

    pub fn label(&self) -> String {
        match self.total_cost {
            Some(cost) if self.is_estimated => format!("Cost: ${:.5} (Est.)", cost),
            Some(cost) => format!("Cost: ${:.5}", cost),
            None => "Cost info unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostEstimator {
    rates: Vec<(String, ModelRates)>,
    default_model: String,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new(
            "gpt-5.2",
            [
                ("gpt-5.2-pro", ModelRates::new(21.00, 0.0, 168.00)),
                ("gpt-5.2", ModelRates::new(1.75, 0.175, 14.00)),
                ("gpt-5.1", ModelRates::new(1.25, 0.125, 10.00)),
                ("gpt-5", ModelRates::new(1.25, 0.125, 10.00)),
                ("gpt-5-mini", ModelRates::new(0.25, 0.025, 2.00)),
                ("gpt-5-nano", ModelRates::new(0.05, 0.005, 0.40)),
                ("gpt-4.1", ModelRates::new(2.00, 0.50, 8.00)),
                ("gpt-4.1-mini", ModelRates::new(0.40, 0.10, 1.60)),
                ("gpt-4o", ModelRates::new(2.50, 1.25, 10.00)),
                ("gpt-4o-mini", ModelRates::new(0.15, 0.075, 0.60)),
            ],
        )
    }
}

impl CostEstimator {
    pub fn new<I, S>(default_model: impl Into<String>, rates: I) -> Self
    where
        I: IntoIterator<Item = (S, ModelRates)>,
        S: Into<String>,
    {
        let mut rates: Vec<(String, ModelRates)> =
            rates.into_iter().map(|(k, v)| (k.into(), v)).collect();
        // Longest key first so the most specific match wins.
        rates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            rates,
            default_model: default_model.into(),
        }
    }

    pub fn rates_for(&self, model_id: &str) -> Option<(&str, ModelRates)> {
        self.rates
            .iter()
            .find(|(key, _)| model_id.contains(key.as_str()))
            .map(|(key, rates)| (key.as_str(), *rates))
    }

    /// Never fails: unknown models fall back to the default model's rates and
    /// are flagged as estimates; a table without the default yields `unavailable`.
    pub fn estimate(&self, model_id: &str, usage: &Usage) -> CostSummary {
        let (rates, is_estimated) = match self.rates_for(model_id) {
            Some((key, rates)) => {
                tracing::debug!(model = model_id, matched = key, "pricing key matched");
                (rates, false)
            }
            None => match self.rates.iter().find(|(key, _)| *key == self.default_model) {
                Some((_, rates)) => {
                    tracing::warn!(
                        model = model_id,
                        default_model = %self.default_model,
                        "no pricing for model, falling back to default rates"
                    );
                    (*rates, true)
                }
                None => {
                    tracing::error!(model = model_id, "no pricing available for any model");
                    return CostSummary::unavailable();
                }
            },
        };

        let cached = usage.cached_tokens.min(usage.input_tokens);
        let fresh_input = usage.input_tokens.saturating_sub(cached);
        let total = fresh_input as f64 / TOKEN_UNIT * rates.input
            + cached as f64 / TOKEN_UNIT * rates.cached_input
            + usage.output_tokens as f64 / TOKEN_UNIT * rates.output;

        if !total.is_finite() {
            return CostSummary::unavailable();
        }

        CostSummary {
            total_cost: Some(total),
            is_estimated,
        }
    }
}

pub fn usage_line(usage: &Usage, cost: &CostSummary) -> String {
    format!(
        "Tokens: {} (In:{}/Cache:{}/Out:{}) | {}",
        usage.total_tokens,
        usage.input_tokens,
        usage.cached_tokens,
        usage.output_tokens,
        cost.label()
    )
}
