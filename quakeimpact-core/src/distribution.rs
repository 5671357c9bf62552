//! Fragility distribution evaluators
//!
//! Each evaluator maps an intensity-measure value to an exceedance
//! probability for a single damage state. Pure functions, no I/O.
//!
//! Global invariants enforced:
//! - Lognormal and Normal results lie in [0, 1] (or NaN for degenerate shapes)
//! - Discrete curves never extrapolate below their first knot
//! - Polynomial results are returned unclamped

use crate::error::{FragilityError, FragilityResult};
use crate::formula::Formula;
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;
use std::fmt;
use std::str::FromStr;

/// Diameter bound to `D` in polynomial formulas when the caller supplies none
pub const DEFAULT_PIPE_DIAMETER: f64 = 1.0;

/// Distribution family named in the fragility database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionFamily {
    Discrete,
    Lognormal,
    Normal,
    Polynomial,
}

impl DistributionFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionFamily::Discrete => "Discrete",
            DistributionFamily::Lognormal => "Lognormal",
            DistributionFamily::Normal => "Normal",
            DistributionFamily::Polynomial => "Polynomial",
        }
    }
}

impl fmt::Display for DistributionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionFamily {
    type Err = FragilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Discrete" => Ok(DistributionFamily::Discrete),
            "Lognormal" => Ok(DistributionFamily::Lognormal),
            "Normal" => Ok(DistributionFamily::Normal),
            "Polynomial" => Ok(DistributionFamily::Polynomial),
            other => Err(FragilityError::invalid(
                "Fragility_distribution",
                format!("unknown distribution family `{}`", other),
            )),
        }
    }
}

/// Lognormal CDF with shape `std_dev` and scale `exp(ln(median))`.
///
/// A non-positive median is rejected. A non-positive, NaN or `-inf` shape
/// yields NaN rather than an error; a `+inf` shape flattens the curve to 0.5
/// for every positive finite `im`.
pub fn lognormal_cdf(im: f64, median: f64, std_dev: f64) -> FragilityResult<f64> {
    if median <= 0.0 {
        return Err(FragilityError::invalid(
            "median",
            format!("lognormal median must be positive (got {})", median),
        ));
    }
    if std_dev.is_nan() || std_dev <= 0.0 {
        return Ok(f64::NAN);
    }
    if im.is_nan() {
        return Ok(f64::NAN);
    }
    if im <= 0.0 {
        return Ok(0.0);
    }
    if std_dev == f64::INFINITY {
        return Ok(if im.is_finite() { 0.5 } else { f64::NAN });
    }

    let scale = median.ln().exp();
    let z = (im / scale).ln() / std_dev;
    Ok(standard_normal_cdf(z))
}

/// Normal CDF: `(1 + erf((im - median) / sqrt(2) / std_dev)) / 2`
pub fn normal_cdf(im: f64, median: f64, std_dev: f64) -> FragilityResult<f64> {
    if std_dev == 0.0 {
        return Err(FragilityError::invalid(
            "std_dev",
            "normal standard deviation must be non-zero",
        ));
    }
    Ok((1.0 + libm::erf((im - median) / SQRT_2 / std_dev)) / 2.0)
}

/// Piecewise-linear interpolation over `(x, y)` knots.
///
/// Queries below `x[0]` are floored to `x[0]`; queries beyond the last knot
/// continue along the last segment. `x` must already be ascending.
pub fn discrete_interpolate(im: f64, x: &[f64], y: &[f64]) -> FragilityResult<f64> {
    if x.len() != y.len() {
        return Err(FragilityError::invalid(
            "knots",
            format!(
                "x and y sequences differ in length ({} vs {})",
                x.len(),
                y.len()
            ),
        ));
    }
    if x.len() < 2 {
        return Err(FragilityError::invalid(
            "knots",
            format!("at least 2 knots are required (got {})", x.len()),
        ));
    }

    let im = if im < x[0] { x[0] } else { im };

    let n = x.len();
    let hi = x.partition_point(|&v| v < im).clamp(1, n - 1);
    let lo = hi - 1;
    let slope = (y[hi] - y[lo]) / (x[hi] - x[lo]);
    Ok(slope * (im - x[lo]) + y[lo])
}

/// Parse a whitespace-separated knot sequence such as `"0.1 0.2 0.4"`
pub fn parse_knots(field: &str, text: &str) -> FragilityResult<Vec<f64>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| {
                FragilityError::invalid(field, format!("`{}` is not a number", tok))
            })
        })
        .collect()
}

/// Evaluate a compiled polynomial curve.
///
/// `im_name` binds to `im` and `D` binds to `diameter`.
pub fn evaluate_polynomial(
    formula: &Formula,
    im_name: &str,
    im: f64,
    diameter: f64,
) -> FragilityResult<f64> {
    formula.evaluate(&[(im_name, im), ("D", diameter)])
}

/// Compile and evaluate a polynomial formula in one step
pub fn polynomial(im: f64, formula: &str, im_name: &str, diameter: f64) -> FragilityResult<f64> {
    let compiled = Formula::parse(formula)?;
    evaluate_polynomial(&compiled, im_name, im, diameter)
}

fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * libm::erfc(-z / SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn test_family_parse() {
        assert_eq!(
            "Lognormal".parse::<DistributionFamily>().unwrap(),
            DistributionFamily::Lognormal
        );
        assert_eq!(
            " Discrete ".parse::<DistributionFamily>().unwrap(),
            DistributionFamily::Discrete
        );
        assert!("Weibull".parse::<DistributionFamily>().is_err());
    }

    #[test]
    fn test_lognormal_at_median_is_half() {
        for median in [0.05, 0.3, 0.6, 1.0, 2.75] {
            let ep = lognormal_cdf(median, median, 0.6).unwrap();
            assert!((ep - 0.5).abs() < TOL, "median {} gave {}", median, ep);
        }
    }

    #[test]
    fn test_lognormal_known_value() {
        // ln(0.5/0.3)/0.4 = 1.27706...; Phi(1.27706) = 0.89921...
        let ep = lognormal_cdf(0.5, 0.3, 0.4).unwrap();
        assert!((ep - 0.899_210_18).abs() < 1e-7, "got {}", ep);
    }

    #[test]
    fn test_lognormal_monotonic() {
        let mut prev = 0.0;
        for i in 1..50 {
            let ep = lognormal_cdf(i as f64 * 0.05, 0.6, 0.5).unwrap();
            assert!(ep >= prev);
            prev = ep;
        }
    }

    #[test]
    fn test_lognormal_rejects_non_positive_median() {
        assert!(matches!(
            lognormal_cdf(0.5, 0.0, 0.4),
            Err(FragilityError::InvalidParameter { .. })
        ));
        assert!(lognormal_cdf(0.5, -1.0, 0.4).is_err());
    }

    #[test]
    fn test_lognormal_edge_inputs() {
        assert_eq!(lognormal_cdf(0.0, 0.3, 0.4).unwrap(), 0.0);
        assert!(lognormal_cdf(0.5, 0.3, 0.0).unwrap().is_nan());
    }

    #[test]
    fn test_lognormal_infinite_shape() {
        for im in [0.01, 0.3, 5.0] {
            assert_eq!(lognormal_cdf(im, 0.3, f64::INFINITY).unwrap(), 0.5);
        }
        assert_eq!(lognormal_cdf(0.0, 0.3, f64::INFINITY).unwrap(), 0.0);
        assert!(lognormal_cdf(0.5, 0.3, f64::NEG_INFINITY).unwrap().is_nan());
        assert!(lognormal_cdf(0.5, 0.3, f64::NAN).unwrap().is_nan());
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.4, 0.4, 0.1).unwrap() - 0.5).abs() < TOL);
        // one sigma above the mean
        let ep = normal_cdf(0.5, 0.4, 0.1).unwrap();
        assert!((ep - 0.841_344_746).abs() < 1e-8, "got {}", ep);
        assert!(normal_cdf(0.5, 0.4, 0.0).is_err());
    }

    #[test]
    fn test_discrete_interpolates_inside_range() {
        let x = [0.1, 0.2, 0.4];
        let y = [0.0, 0.5, 0.9];
        let ep = discrete_interpolate(0.3, &x, &y).unwrap();
        assert!((ep - 0.7).abs() < TOL);
        assert!((discrete_interpolate(0.2, &x, &y).unwrap() - 0.5).abs() < TOL);
    }

    #[test]
    fn test_discrete_clamps_below_first_knot() {
        let x = [0.1, 0.2, 0.4];
        let y = [0.05, 0.5, 0.9];
        assert_eq!(discrete_interpolate(0.0, &x, &y).unwrap(), 0.05);
        assert_eq!(discrete_interpolate(-3.0, &x, &y).unwrap(), 0.05);
    }

    #[test]
    fn test_discrete_extrapolates_above_last_knot() {
        let x = [0.1, 0.2, 0.4];
        let y = [0.0, 0.5, 0.9];
        // last segment slope is 2.0
        let ep = discrete_interpolate(0.6, &x, &y).unwrap();
        assert!((ep - 1.3).abs() < TOL, "got {}", ep);
    }

    #[test]
    fn test_discrete_rejects_bad_knots() {
        assert!(discrete_interpolate(0.3, &[0.1, 0.2], &[0.1]).is_err());
        assert!(discrete_interpolate(0.3, &[0.1], &[0.1]).is_err());
    }

    #[test]
    fn test_parse_knots() {
        assert_eq!(
            parse_knots("med", " 0.1  0.2\t0.4 ").unwrap(),
            vec![0.1, 0.2, 0.4]
        );
        assert!(parse_knots("med", "0.1 abc").is_err());
        assert!(parse_knots("med", "").unwrap().is_empty());
    }

    #[test]
    fn test_polynomial_substitution() {
        assert_eq!(polynomial(3.0, "2*PGA+1", "PGA", DEFAULT_PIPE_DIAMETER).unwrap(), 7.0);
        assert_eq!(polynomial(3.0, "D*2", "PGA", DEFAULT_PIPE_DIAMETER).unwrap(), 2.0);
        assert_eq!(polynomial(2.0, "PGV^2/10", "PGV", DEFAULT_PIPE_DIAMETER).unwrap(), 0.4);
    }

    #[test]
    fn test_polynomial_is_not_clamped() {
        let ep = polynomial(10.0, "PGA*0.3", "PGA", DEFAULT_PIPE_DIAMETER).unwrap();
        assert!((ep - 3.0).abs() < TOL);
    }

    #[test]
    fn test_polynomial_unresolved_variable() {
        assert!(matches!(
            polynomial(3.0, "2*PGV", "PGA", DEFAULT_PIPE_DIAMETER),
            Err(FragilityError::FormulaEvaluation { .. })
        ));
    }
}
