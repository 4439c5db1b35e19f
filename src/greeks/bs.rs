//! Black–Scholes pricing, first-order Greeks and the Newton–Raphson
//! implied-volatility solver for European options with a continuous
//! risk-free rate.

use super::occ::OptionType;

// Abramowitz–Stegun erf approximation coefficients.
const A1: f64 = 0.254829592;
const A2: f64 = -0.284496736;
const A3: f64 = 1.421413741;
const A4: f64 = -1.453152027;
const A5: f64 = 1.061405429;
const P: f64 = 0.3275911;

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const SQRT_2PI: f64 = 2.506_628_274_631_000_2;

/// Newton–Raphson starting volatility.
pub const IV_INITIAL_GUESS: f64 = 0.2;
/// Convergence tolerance on the repriced premium.
pub const IV_TOLERANCE: f64 = 1e-6;
/// Iteration ceiling before the solve is declared diverged.
pub const IV_MAX_ITERATIONS: usize = 100;
/// Volatility clamp: sigma stays in (1e-3, 5].
pub const IV_MIN: f64 = 1e-3;
pub const IV_MAX: f64 = 5.0;

fn erf_approx(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard-normal CDF via the Abramowitz–Stegun approximation.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf_approx(x / SQRT_2))
}

/// Standard-normal PDF: `exp(-x^2/2) / sqrt(2*pi)`.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// Intrinsic payoff at the underlying price `s`.
pub fn intrinsic(option_type: OptionType, s: f64, k: f64) -> f64 {
    match option_type {
        OptionType::Call => (s - k).max(0.0),
        OptionType::Put => (k - s).max(0.0),
    }
}

fn d1_d2(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> (f64, f64) {
    let st = sigma * t.sqrt();
    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / st;
    (d1, d1 - st)
}

/// Black–Scholes premium. `t` is in years; with `t <= 0` the premium is
/// the intrinsic payoff.
pub fn bs_price(option_type: OptionType, s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    if t <= 0.0 {
        return intrinsic(option_type, s, k);
    }
    let (d1, d2) = d1_d2(s, k, t, r, sigma);
    let disc = (-r * t).exp();
    match option_type {
        OptionType::Call => s * norm_cdf(d1) - k * disc * norm_cdf(d2),
        OptionType::Put => k * disc * norm_cdf(-d2) - s * norm_cdf(-d1),
    }
}

/// First-order sensitivities. Theta is reported per day; vega per 1% vol;
/// rho per 1% rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

pub fn greeks(option_type: OptionType, s: f64, k: f64, t: f64, r: f64, sigma: f64) -> Greeks {
    if t <= 0.0 {
        // expired: delta collapses to the exercise indicator
        let delta = match option_type {
            OptionType::Call => {
                if s > k {
                    1.0
                } else {
                    0.0
                }
            }
            OptionType::Put => {
                if s < k {
                    -1.0
                } else {
                    0.0
                }
            }
        };
        return Greeks {
            delta,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
            rho: 0.0,
        };
    }
    let (d1, d2) = d1_d2(s, k, t, r, sigma);
    let sqrt_t = t.sqrt();
    let pdf_d1 = norm_pdf(d1);
    let disc = (-r * t).exp();

    let delta = match option_type {
        OptionType::Call => norm_cdf(d1),
        OptionType::Put => norm_cdf(d1) - 1.0,
    };
    let gamma = pdf_d1 / (s * sigma * sqrt_t);
    let vega = s * pdf_d1 * sqrt_t / 100.0;
    let decay = -(s * pdf_d1 * sigma) / (2.0 * sqrt_t);
    let theta = match option_type {
        OptionType::Call => (decay - r * k * disc * norm_cdf(d2)) / 365.0,
        OptionType::Put => (decay + r * k * disc * norm_cdf(-d2)) / 365.0,
    };
    let rho = match option_type {
        OptionType::Call => k * t * disc * norm_cdf(d2) / 100.0,
        OptionType::Put => -k * t * disc * norm_cdf(-d2) / 100.0,
    };

    Greeks {
        delta,
        gamma,
        theta,
        vega,
        rho,
    }
}

/// Solve for the sigma that reprices the option to `market`. Returns `None`
/// when the iteration diverges; non-convergence is not an error, the
/// observation is simply skipped.
pub fn implied_vol(
    option_type: OptionType,
    market: f64,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
) -> Option<f64> {
    if market <= 0.0 || !market.is_finite() || s <= 0.0 || k <= 0.0 || t <= 0.0 {
        return None;
    }
    let mut sigma = IV_INITIAL_GUESS;
    for _ in 0..IV_MAX_ITERATIONS {
        let price = bs_price(option_type, s, k, t, r, sigma);
        let diff = price - market;
        if diff.abs() < IV_TOLERANCE {
            return Some(sigma);
        }
        let (d1, _) = d1_d2(s, k, t, r, sigma);
        let vega = s * norm_pdf(d1) * t.sqrt();
        if vega < 1e-12 {
            return None;
        }
        sigma = (sigma - diff / vega).clamp(IV_MIN, IV_MAX);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: f64 = 100.0;
    const K: f64 = 100.0;
    const R: f64 = 0.05;

    #[test]
    fn cdf_matches_known_points() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.0) - 0.841_344_7).abs() < 1e-5);
        assert!((norm_cdf(-1.0) - 0.158_655_3).abs() < 1e-5);
        assert!(norm_cdf(6.0) > 0.999_999);
        assert!(norm_cdf(-6.0) < 1e-6);
    }

    #[test]
    fn pdf_is_symmetric_and_peaks_at_zero() {
        assert!((norm_pdf(0.0) - 0.398_942_28).abs() < 1e-7);
        assert!((norm_pdf(1.5) - norm_pdf(-1.5)).abs() < 1e-12);
    }

    #[test]
    fn put_call_parity_holds() {
        let t = 0.25;
        let sigma = 0.3;
        let call = bs_price(OptionType::Call, S, K, t, R, sigma);
        let put = bs_price(OptionType::Put, S, K, t, R, sigma);
        // C - P = S - K e^{-rT}
        let parity = S - K * (-R * t).exp();
        assert!((call - put - parity).abs() < 1e-6);
    }

    #[test]
    fn expired_option_prices_at_intrinsic() {
        assert!((bs_price(OptionType::Call, 105.0, 100.0, 0.0, R, 0.2) - 5.0).abs() < 1e-2);
        assert!((bs_price(OptionType::Put, 95.0, 100.0, -0.1, R, 0.2) - 5.0).abs() < 1e-2);
        assert_eq!(bs_price(OptionType::Call, 95.0, 100.0, 0.0, R, 0.2), 0.0);
    }

    #[test]
    fn iv_converges_on_round_trip() {
        // true sigma = 0.20, T = 30/365; the solver must land within
        // tolerance starting from the same sigma
        let t = 30.0 / 365.0;
        let price = bs_price(OptionType::Call, S, K, t, R, 0.20);
        let iv = implied_vol(OptionType::Call, price, S, K, t, R).unwrap();
        assert!((iv - 0.20).abs() < 1e-6);
    }

    #[test]
    fn iv_recovers_shifted_vol() {
        let t = 60.0 / 365.0;
        for true_sigma in [0.1, 0.35, 0.8, 1.5] {
            let price = bs_price(OptionType::Put, 450.0, 440.0, t, R, true_sigma);
            let iv = implied_vol(OptionType::Put, price, 450.0, 440.0, t, R).unwrap();
            assert!((iv - true_sigma).abs() < 1e-4, "sigma {true_sigma} -> {iv}");
        }
    }

    #[test]
    fn iv_rejects_degenerate_inputs() {
        assert!(implied_vol(OptionType::Call, 0.0, S, K, 0.1, R).is_none());
        assert!(implied_vol(OptionType::Call, 5.0, S, K, 0.0, R).is_none());
        assert!(implied_vol(OptionType::Call, -1.0, S, K, 0.1, R).is_none());
    }

    #[test]
    fn greeks_respect_bounds() {
        let t = 45.0 / 365.0;
        for (opt, s) in [
            (OptionType::Call, 90.0),
            (OptionType::Call, 110.0),
            (OptionType::Put, 90.0),
            (OptionType::Put, 110.0),
        ] {
            let g = greeks(opt, s, K, t, R, 0.25);
            assert!(g.delta >= -1.0 && g.delta <= 1.0);
            assert!(g.gamma >= 0.0);
            assert!(g.vega >= 0.0);
            match opt {
                OptionType::Call => assert!(g.delta >= 0.0),
                OptionType::Put => assert!(g.delta <= 0.0),
            }
        }
    }

    #[test]
    fn atm_call_delta_near_half() {
        let g = greeks(OptionType::Call, S, K, 30.0 / 365.0, R, 0.2);
        assert!((g.delta - 0.5).abs() < 0.1, "delta {}", g.delta);
    }

    #[test]
    fn expired_greeks_collapse() {
        let g = greeks(OptionType::Call, 105.0, 100.0, 0.0, R, 0.2);
        assert_eq!(g.delta, 1.0);
        assert_eq!(g.gamma, 0.0);
        assert_eq!(g.vega, 0.0);
        let g = greeks(OptionType::Put, 105.0, 100.0, 0.0, R, 0.2);
        assert_eq!(g.delta, 0.0);
    }

    #[test]
    fn call_theta_is_negative() {
        let g = greeks(OptionType::Call, S, K, 30.0 / 365.0, R, 0.2);
        assert!(g.theta < 0.0);
        // reported per-day: a 30-DTE ATM option decays cents, not dollars
        assert!(g.theta > -1.0);
    }
}
