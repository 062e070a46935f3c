// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Decay and upstroke kinetics of an event's temporal profile.

/// Damped least squares settings.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub max_iterations: usize,
    /// Converged when no parameter changes by more than this (relative).
    pub convergence_threshold: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-9,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Parameters of y = amplitude * exp(-rate * t).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialFit {
    pub amplitude: f64,
    pub rate: f64,
}

impl ExponentialFit {
    pub fn evaluate(&self, t: f64) -> f64 {
        self.amplitude * (-self.rate * t).exp()
    }

    /// Decay time constant 1/|rate|, in the units of t.
    pub fn time_constant(&self) -> f64 {
        (1.0 / self.rate).abs()
    }
}

fn sum_squares(fit: &ExponentialFit, t: &[f64], y: &[f64]) -> f64 {
    t.iter().zip(y.iter())
        .map(|(&t, &y)| {
            let r = y - fit.evaluate(t);
            r * r
        })
        .sum()
}

/// Fits y = A*exp(-k*t) with Levenberg-Marquardt iterations. Returns None if
/// fewer than 3 points are given, or the fit does not converge to a finite,
/// non-zero rate.
pub fn fit_exponential_decay(t: &[f32], y: &[f32], config: &FitConfig)
                             -> Option<ExponentialFit> {
    if t.len() != y.len() || t.len() < 3 {
        return None;
    }
    let t: Vec<f64> = t.iter().map(|&v| v as f64).collect();
    let y: Vec<f64> = y.iter().map(|&v| v as f64).collect();
    if y.iter().any(|v| !v.is_finite()) {
        return None;
    }

    // Start from the first sample and the rate implied by the first and last
    // samples when they have the same sign; otherwise one over the span.
    let span = t[t.len() - 1] - t[0];
    if !(span > 0.0) {
        return None;
    }
    let (y0, y1) = (y[0], y[y.len() - 1]);
    let rate = if y0 * y1 > 0.0 && y0 != y1 {
        (y0 / y1).ln() / span
    } else {
        1.0 / span
    };
    let mut fit = ExponentialFit{
        amplitude: if y0 != 0.0 { y0 * (rate * t[0]).exp() } else { 1.0 },
        rate,
    };

    let mut lambda = config.initial_lambda;
    let mut chi2 = sum_squares(&fit, &t, &y);
    let mut converged = false;
    for _ in 0..config.max_iterations {
        // Normal equations J^T J and J^T r for (A, k).
        let mut h = [[0.0_f64; 2]; 2];
        let mut g = [0.0_f64; 2];
        for (&ti, &yi) in t.iter().zip(y.iter()) {
            let e = (-fit.rate * ti).exp();
            let j = [e, -fit.amplitude * ti * e];
            let r = yi - fit.amplitude * e;
            for a in 0..2 {
                g[a] += j[a] * r;
                for b in 0..2 {
                    h[a][b] += j[a] * j[b];
                }
            }
        }
        h[0][0] *= 1.0 + lambda;
        h[1][1] *= 1.0 + lambda;
        let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
        if !det.is_finite() || det.abs() < 1e-300 {
            break;
        }
        let delta = [(g[0] * h[1][1] - g[1] * h[0][1]) / det,
                     (h[0][0] * g[1] - h[1][0] * g[0]) / det];
        let candidate = ExponentialFit{
            amplitude: fit.amplitude + delta[0],
            rate: fit.rate + delta[1],
        };
        let new_chi2 = sum_squares(&candidate, &t, &y);
        if new_chi2.is_finite() && new_chi2 <= chi2 {
            fit = candidate;
            chi2 = new_chi2;
            lambda *= config.lambda_down;
            let relative = (delta[0].abs() / fit.amplitude.abs().max(1e-12))
                .max(delta[1].abs() / fit.rate.abs().max(1e-12));
            if relative < config.convergence_threshold || chi2 == 0.0 {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                // No step improves the fit any further.
                converged = true;
                break;
            }
        }
    }
    if !converged || !fit.rate.is_finite() || fit.rate == 0.0 || !fit.amplitude.is_finite() {
        return None;
    }
    Some(fit)
}

/// Largest increase between consecutive samples, per second.
///
/// # Arguments
/// * `upstroke` - F/F0 samples from event start through the peak.
/// * `scan_interval` - ms per sample.
pub fn max_rise_rate(upstroke: &[f32], scan_interval: f32) -> Option<f32> {
    upstroke.windows(2)
        .map(|w| w[1] - w[0])
        .reduce(f32::max)
        .map(|d| d / scan_interval * 1000.0)
}

// mod tests.
