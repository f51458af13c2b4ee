//! Numeric helpers for the trend and weakness significance tests.

/// Weighted least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedFit {
    pub slope: f64,
    pub intercept: f64,
    /// Two-sided p-value of the slope under a t-test with `n - 2` degrees of freedom.
    pub p_value: f64,
}

pub fn weighted_fit(xs: &[f64], ys: &[f64], weights: &[f64]) -> WeightedFit {
    let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((x, y), w) in xs.iter().zip(ys).zip(weights) {
        sw += w;
        swx += w * x;
        swy += w * y;
        swxx += w * x * x;
        swxy += w * x * y;
    }

    let denom = sw * swxx - swx * swx;
    if sw <= 0.0 || denom.abs() < 1e-12 {
        return WeightedFit {
            slope: 0.0,
            intercept: if sw > 0.0 { swy / sw } else { 0.0 },
            p_value: 1.0,
        };
    }

    let slope = (sw * swxy - swx * swy) / denom;
    let intercept = (swy - slope * swx) / sw;
    let p_value = slope_p_value(xs, ys, weights, slope, intercept);
    WeightedFit {
        slope,
        intercept,
        p_value,
    }
}

fn slope_p_value(xs: &[f64], ys: &[f64], weights: &[f64], slope: f64, intercept: f64) -> f64 {
    let n = xs.len().min(ys.len()).min(weights.len());
    if n <= 2 {
        return 1.0;
    }

    let (mut ss_res, mut sw, mut swx, mut swxx) = (0.0, 0.0, 0.0, 0.0);
    for ((x, y), w) in xs.iter().zip(ys).zip(weights) {
        let residual = y - (intercept + slope * x);
        ss_res += w * residual * residual;
        sw += w;
        swx += w * x;
        swxx += w * x * x;
    }

    let df = (n - 2) as f64;
    let mse = ss_res / df;
    let spread = swxx - swx * swx / sw;
    if spread.abs() < 1e-12 {
        return 1.0;
    }
    // An exact fit leaves no residual noise: any slope is certain, a flat one is not a trend.
    if mse < 1e-12 {
        return if slope.abs() < 1e-12 { 1.0 } else { 0.0 };
    }

    let t = (slope / (mse / spread).sqrt()).abs();
    t_two_sided_p(t, df)
}

/// Two-sided p-value of Student's t with `df` degrees of freedom.
pub fn t_two_sided_p(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    if df <= 0.0 {
        return 1.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Two-sided p-value of a standard normal z score.
pub fn z_two_sided_p(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Standard normal CDF, Abramowitz and Stegun 26.2.17.
pub fn normal_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let density = 0.398_942_280_401_432_7 * (-x * x / 2.0).exp();
    let tail = density
        * t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    if x > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let front = (a * x.ln() + b * (1.0 - x).ln() - ln_beta(a, b)).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITERATIONS: usize = 200;
    const EPSILON: f64 = 1e-12;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };
    let (qab, qap, qam) = (a + b, a + 1.0, a - 1.0);
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let step = d * c;
        h *= step;

        if (step - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Lanczos approximation (g = 7).
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_distribution_matches_table_values() {
        // One degree of freedom is the Cauchy distribution: P(|T| > 1) = 0.5.
        assert!((t_two_sided_p(1.0, 1.0) - 0.5).abs() < 1e-6);
        assert!((t_two_sided_p(2.228, 10.0) - 0.05).abs() < 1e-3);
        assert!((t_two_sided_p(0.0, 5.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normal_tail_matches_table_values() {
        assert!((z_two_sided_p(1.96) - 0.05).abs() < 1e-3);
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert_eq!(z_two_sided_p(0.0), 1.0);
    }

    #[test]
    fn exact_line_is_fit_with_certainty() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 5.0, 7.0];
        let fit = weighted_fit(&xs, &ys, &[1.0; 4]);
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert_eq!(fit.p_value, 0.0);
    }

    #[test]
    fn two_points_carry_no_evidence() {
        let fit = weighted_fit(&[0.0, 1.0], &[2.0, 6.0], &[0.85, 1.0]);
        assert!((fit.slope - 4.0).abs() < 1e-9);
        assert_eq!(fit.p_value, 1.0);
    }
}
