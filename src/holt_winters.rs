//! Additive Holt-Winters (trend + seasonality) for quarterly production.
//!
//! Smoothing parameters are chosen by minimising the in-sample one-step
//! squared error: a coarse grid over `[0, 1]^3` followed by a shrinking
//! pattern search around the best grid point. Both stages are deterministic,
//! so identical input always yields identical forecasts.

use chrono::{Months, NaiveDate};
use tracing::debug;

use crate::config::ForecastStrategy;
use crate::error::{ForecastError, Result};
use crate::models::{ForecastResult, ProductionRecord};

/// Quarters per year.
pub const SEASONAL_PERIOD: usize = 4;

/// Two full seasonal cycles are needed to initialise level, trend and seasonals.
pub const MIN_HISTORY: usize = SEASONAL_PERIOD * 2;

const GRID_STEPS: usize = 10;
const SEARCH_TOLERANCE: f64 = 1e-4;
const MAX_SEARCH_ITERATIONS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl SmoothingParams {
    fn get(&self, axis: usize) -> f64 {
        match axis {
            0 => self.alpha,
            1 => self.beta,
            _ => self.gamma,
        }
    }

    fn with(mut self, axis: usize, value: f64) -> Self {
        let value = value.clamp(0.0, 1.0);
        match axis {
            0 => self.alpha = value,
            1 => self.beta = value,
            _ => self.gamma = value,
        }
        self
    }
}

#[derive(Debug, Clone)]
struct InitialState {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Smoothed {
    level: f64,
    trend: f64,
    /// Initial seasonals followed by one seasonal state per observation.
    seasonals: Vec<f64>,
    fitted: Vec<f64>,
    sse: f64,
}

/// A fitted model. Holds only the final state needed to extrapolate.
#[derive(Debug, Clone)]
pub struct HoltWinters {
    pub params: SmoothingParams,
    level: f64,
    trend: f64,
    last_season: Vec<f64>,
    pub fitted: Vec<f64>,
    pub sse: f64,
}

impl HoltWinters {
    pub fn fit(values: &[f64]) -> Result<Self> {
        check_history(values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ForecastFit(
                "series contains non-finite values".to_string(),
            ));
        }

        let init = initial_state(values);
        let params = optimise(values, &init);
        let smoothed = smooth(values, &init, params);
        if !smoothed.sse.is_finite() {
            return Err(ForecastError::ForecastFit(format!(
                "optimiser produced non-finite error (alpha={:.3}, beta={:.3}, gamma={:.3})",
                params.alpha, params.beta, params.gamma
            )));
        }

        let n = values.len();
        let model = Self {
            params,
            level: smoothed.level,
            trend: smoothed.trend,
            last_season: smoothed.seasonals[n..].to_vec(),
            fitted: smoothed.fitted,
            sse: smoothed.sse,
        };
        debug!(
            points = n,
            alpha = model.params.alpha,
            beta = model.params.beta,
            gamma = model.params.gamma,
            sse = model.sse,
            "fitted holt-winters model"
        );
        Ok(model)
    }

    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        (1..=steps)
            .map(|h| {
                self.level
                    + h as f64 * self.trend
                    + self.last_season[(h - 1) % SEASONAL_PERIOD]
            })
            .collect()
    }
}

fn check_history(len: usize) -> Result<()> {
    match len {
        0 => Err(ForecastError::NoData),
        n if n < MIN_HISTORY => Err(ForecastError::InsufficientData {
            needed: MIN_HISTORY,
            got: n,
        }),
        _ => Ok(()),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Level and trend from the first two seasons' means; seasonals as the first
/// season's deviations from that line. A series that is exactly linear plus a
/// repeating pattern is reproduced without error from the first point.
fn initial_state(values: &[f64]) -> InitialState {
    let m = SEASONAL_PERIOD;
    let first = mean(&values[..m]);
    let second = mean(&values[m..2 * m]);
    let trend = (second - first) / m as f64;
    let centre = (m as f64 - 1.0) / 2.0;

    InitialState {
        level: first - trend * (centre + 1.0),
        trend,
        seasonals: (0..m)
            .map(|i| values[i] - (first + trend * (i as f64 - centre)))
            .collect(),
    }
}

fn smooth(values: &[f64], init: &InitialState, params: SmoothingParams) -> Smoothed {
    let SmoothingParams { alpha, beta, gamma } = params;
    let mut level = init.level;
    let mut trend = init.trend;
    let mut seasonals = Vec::with_capacity(values.len() + SEASONAL_PERIOD);
    seasonals.extend_from_slice(&init.seasonals);
    let mut fitted = Vec::with_capacity(values.len());
    let mut sse = 0.0;

    for (t, &y) in values.iter().enumerate() {
        let season = seasonals[t];
        let prediction = level + trend + season;
        fitted.push(prediction);
        sse += (y - prediction).powi(2);

        let previous_level = level;
        let previous_trend = trend;
        level = alpha * (y - season) + (1.0 - alpha) * (previous_level + previous_trend);
        trend = beta * (level - previous_level) + (1.0 - beta) * previous_trend;
        seasonals.push(gamma * (y - previous_level - previous_trend) + (1.0 - gamma) * season);
    }

    Smoothed {
        level,
        trend,
        seasonals,
        fitted,
        sse,
    }
}

fn optimise(values: &[f64], init: &InitialState) -> SmoothingParams {
    let sse = |params: SmoothingParams| {
        let error = smooth(values, init, params).sse;
        if error.is_finite() {
            error
        } else {
            f64::INFINITY
        }
    };

    let grid: Vec<f64> = (0..=GRID_STEPS)
        .map(|i| i as f64 / GRID_STEPS as f64)
        .collect();
    let mut best = SmoothingParams {
        alpha: grid[0],
        beta: grid[0],
        gamma: grid[0],
    };
    let mut best_sse = f64::INFINITY;

    for &alpha in &grid {
        for &beta in &grid {
            for &gamma in &grid {
                let candidate = SmoothingParams { alpha, beta, gamma };
                let error = sse(candidate);
                if error < best_sse {
                    best = candidate;
                    best_sse = error;
                }
            }
        }
    }

    let mut step = 0.5 / GRID_STEPS as f64;
    let mut iterations = 0;
    while step > SEARCH_TOLERANCE && iterations < MAX_SEARCH_ITERATIONS {
        iterations += 1;
        let mut improved = false;
        for axis in 0..3 {
            for direction in [-1.0, 1.0] {
                let candidate = best.with(axis, best.get(axis) + direction * step);
                let error = sse(candidate);
                if error < best_sse {
                    best = candidate;
                    best_sse = error;
                    improved = true;
                }
            }
        }
        if !improved {
            step /= 2.0;
        }
    }

    best
}

/// Quarter-end labels: the last historical date plus 3, 6, 9... calendar months.
pub fn quarter_dates(last: NaiveDate, horizon: usize) -> Result<Vec<NaiveDate>> {
    (1..=horizon)
        .map(|i| {
            u32::try_from(3 * i)
                .ok()
                .and_then(|months| last.checked_add_months(Months::new(months)))
                .ok_or_else(|| {
                    ForecastError::ForecastFit(format!(
                        "cannot advance {last} by {} months",
                        3 * i
                    ))
                })
        })
        .collect()
}

fn values_of(series: &[ProductionRecord]) -> Vec<f64> {
    series.iter().map(|record| record.value).collect()
}

fn check_horizon(horizon: usize) -> Result<()> {
    if horizon == 0 {
        return Err(ForecastError::ForecastFit(
            "forecast horizon must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Fit once on the full series and forecast `horizon` periods directly.
pub fn fit_and_forecast(series: &[ProductionRecord], horizon: usize) -> Result<ForecastResult> {
    check_horizon(horizon)?;
    let values = values_of(series);
    let model = HoltWinters::fit(&values)?;
    let last = series.last().map(|record| record.date).ok_or(ForecastError::NoData)?;

    Ok(ForecastResult {
        dates: quarter_dates(last, horizon)?,
        point_forecast: model.forecast(horizon),
        fitted_values: model.fitted,
    })
}

/// Forecast one period, append its loss-adjusted value as if observed, refit
/// and forecast the remaining periods. The returned points are unadjusted.
pub fn fit_and_forecast_rolled(
    series: &[ProductionRecord],
    horizon: usize,
    loss_fraction: f64,
) -> Result<ForecastResult> {
    check_horizon(horizon)?;
    let values = values_of(series);
    let first_model = HoltWinters::fit(&values)?;
    let last = series.last().map(|record| record.date).ok_or(ForecastError::NoData)?;

    let first_point = first_model.forecast(1)[0];
    let mut point_forecast = vec![first_point];

    if horizon > 1 {
        let mut extended = values.clone();
        extended.push(first_point * (1.0 - loss_fraction));
        let refit = HoltWinters::fit(&extended)?;
        point_forecast.extend(refit.forecast(horizon - 1));
    }

    Ok(ForecastResult {
        dates: quarter_dates(last, horizon)?,
        point_forecast,
        fitted_values: first_model.fitted,
    })
}

pub fn forecast_with(
    strategy: ForecastStrategy,
    series: &[ProductionRecord],
    horizon: usize,
    loss_fraction: f64,
) -> Result<ForecastResult> {
    match strategy {
        ForecastStrategy::SingleShot => fit_and_forecast(series, horizon),
        ForecastStrategy::Rolled => fit_and_forecast_rolled(series, horizon, loss_fraction),
    }
}
