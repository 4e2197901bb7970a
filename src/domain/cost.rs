//! Transaction cost models.
//!
//! Costs are charged on turnover and expressed as a fraction of notional, so
//! they subtract directly from a date's return.

use std::fmt;

const BPS: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CostModel {
    /// Flat rate in basis points per unit of turnover.
    FixedBps(f64),
    /// Rate in basis points that depends on the date's turnover, linear
    /// between `(turnover, bps)` points and flat beyond the ends.
    Curve(Vec<(f64, f64)>),
}

impl CostModel {
    /// Cost of trading `turnover` units of notional.
    pub fn cost(&self, turnover: f64) -> f64 {
        if turnover <= 0.0 {
            return 0.0;
        }
        turnover * self.rate_bps(turnover) / BPS
    }

    fn rate_bps(&self, turnover: f64) -> f64 {
        match self {
            CostModel::FixedBps(bps) => *bps,
            CostModel::Curve(points) => {
                let (first, last) = match (points.first(), points.last()) {
                    (Some(f), Some(l)) => (*f, *l),
                    _ => return 0.0,
                };
                if turnover <= first.0 {
                    return first.1;
                }
                if turnover >= last.0 {
                    return last.1;
                }
                points
                    .windows(2)
                    .find(|w| turnover <= w[1].0)
                    .map(|w| {
                        let ((t0, c0), (t1, c1)) = (w[0], w[1]);
                        c0 + (c1 - c0) * (turnover - t0) / (t1 - t0)
                    })
                    .unwrap_or(last.1)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            CostModel::FixedBps(bps) if !(bps.is_finite() && *bps >= 0.0) => {
                Err(format!("bps must be non-negative, got {}", bps))
            }
            CostModel::FixedBps(_) => Ok(()),
            CostModel::Curve(points) => {
                if points.is_empty() {
                    return Err("cost curve has no points".to_string());
                }
                if points
                    .iter()
                    .any(|(t, c)| !(t.is_finite() && c.is_finite() && *t >= 0.0 && *c >= 0.0))
                {
                    return Err("cost curve points must be non-negative".to_string());
                }
                if points.windows(2).any(|w| w[0].0 >= w[1].0) {
                    return Err("cost curve turnover levels must be strictly increasing".to_string());
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostModel::FixedBps(bps) => write!(f, "fixed {} bps", bps),
            CostModel::Curve(points) => {
                let parts: Vec<String> = points.iter().map(|(t, c)| format!("{}:{}", t, c)).collect();
                write!(f, "curve {}", parts.join(", "))
            }
        }
    }
}

/// Parse `turnover:bps` pairs separated by commas, e.g. `0.1:5, 1.0:20`.
pub fn parse_curve(input: &str) -> Result<Vec<(f64, f64)>, String> {
    input
        .split(',')
        .map(|token| {
            let token = token.trim();
            let (t, c) = token
                .split_once(':')
                .ok_or_else(|| format!("expected turnover:bps, found '{}'", token))?;
            let t: f64 = t
                .trim()
                .parse()
                .map_err(|_| format!("invalid turnover level '{}'", t.trim()))?;
            let c: f64 = c
                .trim()
                .parse()
                .map_err(|_| format!("invalid bps '{}'", c.trim()))?;
            Ok((t, c))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_bps_is_linear_in_turnover() {
        let model = CostModel::FixedBps(10.0);
        assert_relative_eq!(model.cost(1.0), 0.001);
        assert_relative_eq!(model.cost(0.5), 0.0005);
        assert_eq!(model.cost(0.0), 0.0);
    }

    #[test]
    fn curve_interpolates_rate() {
        let model = CostModel::Curve(vec![(0.1, 5.0), (1.0, 20.0)]);
        assert_relative_eq!(model.cost(0.05), 0.05 * 5.0 / BPS);
        // Rate at 0.55 is halfway between 5 and 20.
        assert_relative_eq!(model.cost(0.55), 0.55 * 12.5 / BPS);
        assert_relative_eq!(model.cost(2.0), 2.0 * 20.0 / BPS);
    }

    #[test]
    fn validate_curve() {
        assert!(CostModel::Curve(vec![]).validate().is_err());
        assert!(CostModel::Curve(vec![(1.0, 5.0), (0.5, 8.0)]).validate().is_err());
        assert!(CostModel::Curve(vec![(0.5, -1.0)]).validate().is_err());
        assert!(CostModel::Curve(vec![(0.5, 1.0), (1.0, 2.0)]).validate().is_ok());
        assert!(CostModel::FixedBps(-1.0).validate().is_err());
        assert!(CostModel::FixedBps(0.0).validate().is_ok());
    }

    #[test]
    fn parse_curve_pairs() {
        let points = parse_curve("0.1:5, 1.0 : 20").unwrap();
        assert_eq!(points, vec![(0.1, 5.0), (1.0, 20.0)]);
        assert!(parse_curve("0.1-5").is_err());
        assert!(parse_curve("x:5").is_err());
    }

    #[test]
    fn display() {
        assert_eq!(CostModel::FixedBps(5.0).to_string(), "fixed 5 bps");
        assert_eq!(
            CostModel::Curve(vec![(0.1, 5.0), (1.0, 20.0)]).to_string(),
            "curve 0.1:5, 1:20"
        );
    }
}
