//! Alpha expression AST.
//!
//! - `Expr`: per-instrument arithmetic over data fields and their history
//! - `SeriesFunc`: time-series operators with a window measured in sessions
//! - `CrossSectionalOp`: an optional date-wide transform wrapping the whole
//!   expression (`rank(...)`, `zscore(...)`, `winsorize(..., k)`)

use std::collections::BTreeSet;
use std::fmt;

/// Largest window a time-series operator accepts, in sessions.
pub const MAX_WINDOW: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFunc {
    Abs,
    Log,
    Sign,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFunc {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesFunc {
    Delay,
    Delta,
    Returns,
    TsMean,
    TsSum,
    TsStd,
    TsMin,
    TsMax,
    TsRank,
    TsZscore,
}

impl SeriesFunc {
    pub fn name(self) -> &'static str {
        match self {
            SeriesFunc::Delay => "delay",
            SeriesFunc::Delta => "delta",
            SeriesFunc::Returns => "returns",
            SeriesFunc::TsMean => "ts_mean",
            SeriesFunc::TsSum => "ts_sum",
            SeriesFunc::TsStd => "ts_std",
            SeriesFunc::TsMin => "ts_min",
            SeriesFunc::TsMax => "ts_max",
            SeriesFunc::TsRank => "ts_rank",
            SeriesFunc::TsZscore => "ts_zscore",
        }
    }

    /// Smallest window the operator accepts.
    pub fn min_window(self) -> usize {
        match self {
            SeriesFunc::TsStd | SeriesFunc::TsRank | SeriesFunc::TsZscore => 2,
            _ => 1,
        }
    }

    /// Whether the window counts lags (`delay`, `delta`, `returns`) rather
    /// than samples.
    fn is_lag(self) -> bool {
        matches!(self, SeriesFunc::Delay | SeriesFunc::Delta | SeriesFunc::Returns)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        func: UnaryFunc,
        arg: Box<Expr>,
    },
    Pair {
        func: PairFunc,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Series {
        func: SeriesFunc,
        arg: Box<Expr>,
        window: usize,
    },
}

impl Expr {
    /// Data fields the expression reads.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Field(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(arg) | Expr::Unary { arg, .. } | Expr::Series { arg, .. } => {
                arg.collect_fields(out)
            }
            Expr::Binary { left, right, .. } | Expr::Pair { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
        }
    }

    /// Sessions of history before the current one the expression may read.
    pub fn lookback(&self) -> usize {
        match self {
            Expr::Constant(_) | Expr::Field(_) => 0,
            Expr::Neg(arg) | Expr::Unary { arg, .. } => arg.lookback(),
            Expr::Binary { left, right, .. } | Expr::Pair { left, right, .. } => {
                left.lookback().max(right.lookback())
            }
            Expr::Series { func, arg, window } => {
                let span = if func.is_lag() {
                    *window
                } else {
                    window.saturating_sub(1)
                };
                arg.lookback().saturating_add(span)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{}", v),
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Neg(arg) => write!(f, "-({})", arg),
            Expr::Binary { op, left, right } => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                };
                write!(f, "({} {} {})", left, sym, right)
            }
            Expr::Unary { func, arg } => {
                let name = match func {
                    UnaryFunc::Abs => "abs",
                    UnaryFunc::Log => "log",
                    UnaryFunc::Sign => "sign",
                    UnaryFunc::Sqrt => "sqrt",
                };
                write!(f, "{}({})", name, arg)
            }
            Expr::Pair { func, left, right } => {
                let name = match func {
                    PairFunc::Min => "min",
                    PairFunc::Max => "max",
                };
                write!(f, "{}({}, {})", name, left, right)
            }
            Expr::Series { func, arg, window } => {
                write!(f, "{}({}, {})", func.name(), arg, window)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossSectionalOp {
    /// Map scores to evenly spaced ranks in `[0, 1]`.
    Rank,
    Zscore,
    /// Clip scores to `mean ± k·std`.
    Winsorize(f64),
}

/// A parsed alpha: per-instrument body plus optional cross-sectional wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaExpression {
    pub body: Expr,
    pub cross_sectional: Option<CrossSectionalOp>,
}

impl fmt::Display for AlphaExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cross_sectional {
            None => write!(f, "{}", self.body),
            Some(CrossSectionalOp::Rank) => write!(f, "rank({})", self.body),
            Some(CrossSectionalOp::Zscore) => write!(f, "zscore({})", self.body),
            Some(CrossSectionalOp::Winsorize(k)) => write!(f, "winsorize({}, {})", self.body, k),
        }
    }
}
