//! Alpha expression parser.
//!
//! Recursive descent over the grammar:
//!
//! ```text
//! alpha   := cs_op '(' expr [',' number] ')' | expr
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := number | '(' expr ')' | ident | ident '(' args ')'
//! ```
//!
//! Cross-sectional operators (`rank`, `zscore`, `winsorize`) are only valid as
//! the outermost call. Errors carry the character offset of the offending
//! token.

use crate::domain::error::ParseError;
use crate::domain::expression::{
    AlphaExpression, BinaryOp, CrossSectionalOp, Expr, MAX_WINDOW, PairFunc, SeriesFunc,
    UnaryFunc,
};

const CROSS_SECTIONAL: [&str; 3] = ["rank", "zscore", "winsorize"];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>, position: usize) -> ParseError {
        ParseError {
            message: message.into(),
            position,
        }
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(ch) => format!("'{}'", ch),
            None => "end of input".to_string(),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(
                format!("expected '{}', found {}", expected, self.describe_next()),
                self.pos,
            )),
        }
    }

    fn peek_word(&self) -> &'a str {
        let rest = self.remaining();
        let end = rest
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_alphanumeric() || c == '_') || (i == 0 && c.is_ascii_digit()))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    }

    /// True when the identifier at the cursor is immediately a call.
    fn word_is_call(&self, word: &str) -> bool {
        self.remaining()[word.len()..].trim_start().starts_with('(')
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(self.error("expected number", start));
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number: {}", num_str), start))
    }

    fn parse_window(&mut self, func: SeriesFunc) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Err(self.error(
                format!("expected integer window, found {}", self.describe_next()),
                start,
            ));
        }
        let text = &self.input[start..self.pos];
        let window = text
            .parse::<usize>()
            .ok()
            .filter(|&w| w <= MAX_WINDOW)
            .ok_or_else(|| {
                self.error(
                    format!("{} window must be at most {}, got {}", func.name(), MAX_WINDOW, text),
                    start,
                )
            })?;
        if window < func.min_window() {
            return Err(self.error(
                format!(
                    "{} window must be at least {}, got {}",
                    func.name(),
                    func.min_window(),
                    window
                ),
                start,
            ));
        }
        Ok(window)
    }

    fn parse_alpha(&mut self) -> Result<AlphaExpression, ParseError> {
        self.skip_whitespace();
        if self.remaining().is_empty() {
            return Err(self.error("empty expression", self.pos));
        }

        let word = self.peek_word();
        let alpha = if CROSS_SECTIONAL.contains(&word) && self.word_is_call(word) {
            self.pos += word.len();
            self.expect_char('(')?;
            let body = self.parse_expr()?;
            let op = match word {
                "rank" => CrossSectionalOp::Rank,
                "zscore" => CrossSectionalOp::Zscore,
                _ => {
                    self.expect_char(',')?;
                    let at = self.pos;
                    let k = self.parse_number()?;
                    if !(k > 0.0 && k.is_finite()) {
                        return Err(self.error("winsorize bound must be positive", at));
                    }
                    CrossSectionalOp::Winsorize(k)
                }
            };
            self.expect_char(')')?;
            AlphaExpression {
                body,
                cross_sectional: Some(op),
            }
        } else {
            AlphaExpression {
                body: self.parse_expr()?,
                cross_sectional: None,
            }
        };

        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(
                format!("unexpected input after expression: '{}'", self.remaining()),
                self.pos,
            ));
        }
        Ok(alpha)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('-') {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Constant(v) => Expr::Constant(-v),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => Ok(Expr::Constant(self.parse_number()?)),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.peek_word();
                if self.word_is_call(word) {
                    self.pos += word.len();
                    self.parse_call(word, start)
                } else {
                    self.pos += word.len();
                    Ok(Expr::Field(word.to_string()))
                }
            }
            _ => Err(self.error(
                format!("expected operand, found {}", self.describe_next()),
                start,
            )),
        }
    }

    fn parse_call(&mut self, name: &str, start: usize) -> Result<Expr, ParseError> {
        if CROSS_SECTIONAL.contains(&name) {
            return Err(self.error(
                format!("'{}' is only allowed as the outermost operator", name),
                start,
            ));
        }

        let unary = match name {
            "abs" => Some(UnaryFunc::Abs),
            "log" => Some(UnaryFunc::Log),
            "sign" => Some(UnaryFunc::Sign),
            "sqrt" => Some(UnaryFunc::Sqrt),
            _ => None,
        };
        if let Some(func) = unary {
            self.expect_char('(')?;
            let arg = self.parse_expr()?;
            self.expect_char(')')?;
            return Ok(Expr::Unary {
                func,
                arg: Box::new(arg),
            });
        }

        let pair = match name {
            "min" => Some(PairFunc::Min),
            "max" => Some(PairFunc::Max),
            _ => None,
        };
        if let Some(func) = pair {
            self.expect_char('(')?;
            let left = self.parse_expr()?;
            self.expect_char(',')?;
            let right = self.parse_expr()?;
            self.expect_char(')')?;
            return Ok(Expr::Pair {
                func,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        let series = match name {
            "delay" => SeriesFunc::Delay,
            "delta" => SeriesFunc::Delta,
            "returns" => SeriesFunc::Returns,
            "ts_mean" => SeriesFunc::TsMean,
            "ts_sum" => SeriesFunc::TsSum,
            "ts_std" => SeriesFunc::TsStd,
            "ts_min" => SeriesFunc::TsMin,
            "ts_max" => SeriesFunc::TsMax,
            "ts_rank" => SeriesFunc::TsRank,
            "ts_zscore" => SeriesFunc::TsZscore,
            _ => return Err(self.error(format!("unknown function '{}'", name), start)),
        };
        self.expect_char('(')?;
        let arg = self.parse_expr()?;
        self.expect_char(',')?;
        let window = self.parse_window(series)?;
        self.expect_char(')')?;
        Ok(Expr::Series {
            func: series,
            arg: Box::new(arg),
            window,
        })
    }
}

/// Parse an alpha expression.
pub fn parse(input: &str) -> Result<AlphaExpression, ParseError> {
    Parser::new(input).parse_alpha()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(input: &str) -> Expr {
        let alpha = parse(input).unwrap();
        assert!(alpha.cross_sectional.is_none());
        alpha.body
    }

    #[test]
    fn parse_field() {
        assert_eq!(body("close"), Expr::Field("close".into()));
    }

    #[test]
    fn parse_precedence() {
        let expr = body("1 + close * 2");
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("expected Add at root, got {:?}", other),
        }
    }

    #[test]
    fn parse_left_associative_subtraction() {
        assert_eq!(body("10 - 4 - 3").to_string(), "((10 - 4) - 3)");
    }

    #[test]
    fn parse_parentheses_override_precedence() {
        assert_eq!(body("(open + close) / 2").to_string(), "((open + close) / 2)");
    }

    #[test]
    fn parse_negative_constant_folds() {
        assert_eq!(body("-3.5"), Expr::Constant(-3.5));
        assert!(matches!(body("-close"), Expr::Neg(_)));
    }

    #[test]
    fn parse_series_functions() {
        for (input, func, window) in [
            ("delay(close, 1)", SeriesFunc::Delay, 1),
            ("delta(close, 5)", SeriesFunc::Delta, 5),
            ("returns(close, 20)", SeriesFunc::Returns, 20),
            ("ts_mean(volume, 10)", SeriesFunc::TsMean, 10),
            ("ts_sum(volume, 3)", SeriesFunc::TsSum, 3),
            ("ts_std(close, 2)", SeriesFunc::TsStd, 2),
            ("ts_min(low, 4)", SeriesFunc::TsMin, 4),
            ("ts_max(high, 4)", SeriesFunc::TsMax, 4),
            ("ts_rank(close, 7)", SeriesFunc::TsRank, 7),
            ("ts_zscore(close, 9)", SeriesFunc::TsZscore, 9),
        ] {
            match body(input) {
                Expr::Series {
                    func: f, window: w, ..
                } => {
                    assert_eq!(f, func, "{}", input);
                    assert_eq!(w, window, "{}", input);
                }
                other => panic!("{}: expected series, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn parse_unary_and_pair_functions() {
        assert!(matches!(body("abs(close)"), Expr::Unary { func: UnaryFunc::Abs, .. }));
        assert!(matches!(body("log(volume)"), Expr::Unary { func: UnaryFunc::Log, .. }));
        assert!(matches!(body("max(open, close)"), Expr::Pair { func: PairFunc::Max, .. }));
    }

    #[test]
    fn parse_cross_sectional_wrappers() {
        let alpha = parse("rank(-returns(close, 5))").unwrap();
        assert_eq!(alpha.cross_sectional, Some(CrossSectionalOp::Rank));
        let alpha = parse("zscore(close)").unwrap();
        assert_eq!(alpha.cross_sectional, Some(CrossSectionalOp::Zscore));
        let alpha = parse("winsorize(close / open, 2.5)").unwrap();
        assert_eq!(alpha.cross_sectional, Some(CrossSectionalOp::Winsorize(2.5)));
    }

    #[test]
    fn rank_as_field_name_is_allowed() {
        assert_eq!(body("rank * 2").to_string(), "(rank * 2)");
    }

    #[test]
    fn parse_whitespace_handling() {
        let alpha = parse("  ts_mean (  close ,  3 )  ").unwrap();
        assert!(matches!(alpha.body, Expr::Series { window: 3, .. }));
    }

    #[test]
    fn error_nested_cross_sectional() {
        let err = parse("abs(rank(close))").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.message.contains("outermost"));
    }

    #[test]
    fn error_cross_sectional_followed_by_arithmetic() {
        let err = parse("rank(close) + 1").unwrap_err();
        assert!(err.message.contains("unexpected input"));
        assert_eq!(err.position, 12);
    }

    #[test]
    fn error_unknown_function() {
        let err = parse("foo(close)").unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn error_window_too_small() {
        let err = parse("ts_std(close, 1)").unwrap_err();
        assert_eq!(err.position, 14);
        assert!(err.message.contains("at least 2"));
        assert!(parse("delay(close, 0)").is_err());
    }

    #[test]
    fn error_window_too_large() {
        let err = parse("delay(close, 18446744073709551615)").unwrap_err();
        assert_eq!(err.position, 13);
        assert!(err.message.contains("at most 10000"));
        assert!(parse("ts_mean(close, 99999999999999999999999)").is_err());
        assert!(parse("ts_mean(close, 10000)").is_ok());
    }

    #[test]
    fn error_missing_window() {
        let err = parse("ts_mean(close)").unwrap_err();
        assert!(err.message.contains("expected ','"));
    }

    #[test]
    fn error_missing_paren() {
        let err = parse("abs(close").unwrap_err();
        assert!(err.message.contains("expected ')'"));
        assert_eq!(err.position, 9);
    }

    #[test]
    fn error_dangling_operator() {
        let err = parse("close +").unwrap_err();
        assert!(err.message.contains("expected operand"));
    }

    #[test]
    fn error_winsorize_bound_must_be_positive() {
        assert!(parse("winsorize(close, 0)").is_err());
        assert!(parse("winsorize(close, -1)").is_err());
    }

    #[test]
    fn error_empty_input() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn error_display_with_context() {
        let input = "close + )";
        let err = parse(input).unwrap_err();
        let display = err.display_with_context(input);
        assert!(display.contains("        ^"));
    }
}
