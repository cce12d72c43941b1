//! The column expression sub-language.
//!
//! Columns sent over the wire are sum types: constants, named columns,
//! unary/binary operators, conditional updates, views and generators.
//! Expressions are evaluated against a single frame and produce a fresh
//! column. All arithmetic follows IEEE-754; null (NaN, or the null code on
//! the string side) propagates through every operator.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, FloatColumn};
use crate::containers::encoding::Encoding;
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiplies,
    Divides,
    Fmod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Acos,
    Asin,
    Atan,
    Cbrt,
    Ceil,
    Cos,
    Day,
    Erf,
    Exp,
    Floor,
    Hour,
    Lgamma,
    Log,
    Minute,
    Month,
    Round,
    Second,
    Sin,
    Sqrt,
    Tan,
    Tgamma,
    Weekday,
    Year,
    Yearday,
}

/// Float-valued column expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_", rename_all = "snake_case")]
pub enum FloatExpr {
    Constant {
        value: f64,
    },
    NamedColumn {
        name: String,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<FloatExpr>,
    },
    BinaryOp {
        op: BinaryOp,
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    /// Replaces `base` with `value` wherever `condition` holds.
    Update {
        base: Box<FloatExpr>,
        condition: Box<BoolExpr>,
        value: Box<FloatExpr>,
    },
    WithUnit {
        operand: Box<FloatExpr>,
        unit: String,
    },
    WithSubroles {
        operand: Box<FloatExpr>,
        subroles: Vec<String>,
    },
    /// Rows of `operand` picked by the (rounded) values of `indices`.
    Subselection {
        operand: Box<FloatExpr>,
        indices: Box<FloatExpr>,
    },
    Arange {
        start: f64,
        stop: f64,
        step: f64,
    },
    /// Parses a string column as numbers.
    AsNum {
        operand: Box<StringExpr>,
    },
    /// Parses a string column as time stamps using the given chrono
    /// formats, first match wins.
    AsTs {
        operand: Box<StringExpr>,
        formats: Vec<String>,
    },
    BooleanAsNum {
        operand: Box<BoolExpr>,
    },
    Random {
        seed: u64,
    },
    Rowid,
}

/// String-valued column expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_", rename_all = "snake_case")]
pub enum StringExpr {
    Constant {
        value: String,
    },
    NamedColumn {
        name: String,
    },
    Concat {
        operands: Vec<StringExpr>,
    },
    Substr {
        begin: usize,
        length: usize,
        operand: Box<StringExpr>,
    },
    /// Formats a float column as strings.
    AsStr {
        operand: Box<FloatExpr>,
    },
}

/// Boolean-valued column expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_", rename_all = "snake_case")]
pub enum BoolExpr {
    EqualTo {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    NotEqualTo {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    Greater {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    GreaterEqual {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    Less {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    LessEqual {
        operand1: Box<FloatExpr>,
        operand2: Box<FloatExpr>,
    },
    StringEqualTo {
        operand1: Box<StringExpr>,
        operand2: Box<StringExpr>,
    },
    Contains {
        operand: Box<StringExpr>,
        pattern: String,
    },
    And {
        operand1: Box<BoolExpr>,
        operand2: Box<BoolExpr>,
    },
    Or {
        operand1: Box<BoolExpr>,
        operand2: Box<BoolExpr>,
    },
    Not {
        operand: Box<BoolExpr>,
    },
    IsInf {
        operand: Box<FloatExpr>,
    },
    IsNan {
        operand: Box<FloatExpr>,
    },
}

/// Evaluates a float expression against a frame.
pub fn eval_float(
    expr: &FloatExpr,
    frame: &DataFrame,
    encoding: &Encoding,
) -> Result<FloatColumn> {
    let nrows = frame.nrows();
    match expr {
        FloatExpr::Constant { value } => Ok(Column::new("constant", vec![*value; nrows])),
        FloatExpr::NamedColumn { name } => frame
            .float_column(name)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("column '{}' in frame '{}'", name, frame.name))
            }),
        FloatExpr::UnaryOp { op, operand } => {
            let col = eval_float(operand, frame, encoding)?;
            let values = col.iter().map(|v| apply_unary(*op, v)).collect();
            Ok(Column::new(col.name.clone(), values))
        }
        FloatExpr::BinaryOp {
            op,
            operand1,
            operand2,
        } => {
            let a = eval_float(operand1, frame, encoding)?;
            let b = eval_float(operand2, frame, encoding)?;
            if a.len() != b.len() {
                return Err(Error::Shape(format!(
                    "operands have {} and {} rows",
                    a.len(),
                    b.len()
                )));
            }
            let values = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| apply_binary(*op, x, y))
                .collect();
            Ok(Column::new(a.name.clone(), values))
        }
        FloatExpr::Update {
            base,
            condition,
            value,
        } => {
            let base = eval_float(base, frame, encoding)?;
            let mask = eval_bool(condition, frame, encoding)?;
            let value = eval_float(value, frame, encoding)?;
            if mask.len() != base.len() || value.len() != base.len() {
                return Err(Error::Shape("update operands disagree in length".to_string()));
            }
            let values = (0..base.len())
                .map(|i| if mask[i] { value.get(i) } else { base.get(i) })
                .collect();
            Ok(Column::new(base.name.clone(), values))
        }
        FloatExpr::WithUnit { operand, unit } => {
            let col = eval_float(operand, frame, encoding)?;
            Ok(col.with_unit(unit.clone()))
        }
        FloatExpr::WithSubroles { operand, subroles } => {
            let col = eval_float(operand, frame, encoding)?;
            Ok(col.with_subroles(subroles.clone()))
        }
        FloatExpr::Subselection { operand, indices } => {
            let col = eval_float(operand, frame, encoding)?;
            let indices = eval_float(indices, frame, encoding)?;
            let values: Result<Vec<f64>> = indices
                .iter()
                .map(|ix| {
                    let row = ix.round();
                    if row.is_nan() || row < 0.0 || row as usize >= col.len() {
                        return Err(Error::InvalidArgument(format!(
                            "subselection index {ix} out of range"
                        )));
                    }
                    Ok(col.get(row as usize))
                })
                .collect();
            Ok(Column::new(col.name.clone(), values?))
        }
        FloatExpr::Arange { start, stop, step } => {
            if *step == 0.0 {
                return Err(Error::InvalidArgument("arange with step 0".to_string()));
            }
            let mut values = Vec::new();
            let mut v = *start;
            while (*step > 0.0 && v < *stop) || (*step < 0.0 && v > *stop) {
                values.push(v);
                v += step;
            }
            Ok(Column::new("arange", values))
        }
        FloatExpr::AsNum { operand } => {
            let strings = eval_string(operand, frame, encoding)?;
            let values = strings
                .iter()
                .map(|s| {
                    s.as_deref()
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .unwrap_or(f64::NAN)
                })
                .collect();
            Ok(Column::new("as_num", values))
        }
        FloatExpr::AsTs { operand, formats } => {
            let strings = eval_string(operand, frame, encoding)?;
            let values = strings
                .iter()
                .map(|s| match s.as_deref() {
                    Some(s) => parse_time_stamp(s, formats),
                    None => f64::NAN,
                })
                .collect();
            Ok(Column::new("as_ts", values))
        }
        FloatExpr::BooleanAsNum { operand } => {
            let mask = eval_bool(operand, frame, encoding)?;
            Ok(Column::new(
                "boolean_as_num",
                mask.into_iter().map(f64::from).collect(),
            ))
        }
        FloatExpr::Random { seed } => {
            let mut rng = StdRng::seed_from_u64(*seed);
            Ok(Column::new(
                "random",
                (0..nrows).map(|_| rng.gen::<f64>()).collect(),
            ))
        }
        FloatExpr::Rowid => Ok(Column::new(
            "rowid",
            (0..nrows).map(|i| i as f64).collect(),
        )),
    }
}

/// Evaluates a string expression; `None` is null.
pub fn eval_string(
    expr: &StringExpr,
    frame: &DataFrame,
    encoding: &Encoding,
) -> Result<Vec<Option<String>>> {
    match expr {
        StringExpr::Constant { value } => Ok(vec![Some(value.clone()); frame.nrows()]),
        StringExpr::NamedColumn { name } => {
            let col = frame.int_column(name).ok_or_else(|| {
                Error::NotFound(format!("column '{}' in frame '{}'", name, frame.name))
            })?;
            Ok((0..col.len())
                .map(|i| encoding.get(col.get(i)).map(str::to_string))
                .collect())
        }
        StringExpr::Concat { operands } => {
            let parts: Result<Vec<Vec<Option<String>>>> = operands
                .iter()
                .map(|e| eval_string(e, frame, encoding))
                .collect();
            let parts = parts?;
            let nrows = parts.first().map_or(0, Vec::len);
            Ok((0..nrows)
                .map(|i| {
                    let mut out = String::new();
                    for part in &parts {
                        match &part[i] {
                            Some(s) => out.push_str(s),
                            None => return None,
                        }
                    }
                    Some(out)
                })
                .collect())
        }
        StringExpr::Substr {
            begin,
            length,
            operand,
        } => {
            let strings = eval_string(operand, frame, encoding)?;
            Ok(strings
                .into_iter()
                .map(|s| {
                    s.and_then(|s| {
                        let chars: Vec<char> = s.chars().collect();
                        if *begin >= chars.len() {
                            return None;
                        }
                        let end = (*begin + *length).min(chars.len());
                        Some(chars[*begin..end].iter().collect())
                    })
                })
                .collect())
        }
        StringExpr::AsStr { operand } => {
            let col = eval_float(operand, frame, encoding)?;
            Ok(col
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(v.to_string()) })
                .collect())
        }
    }
}

/// Evaluates a boolean expression. Comparisons against null are false.
pub fn eval_bool(expr: &BoolExpr, frame: &DataFrame, encoding: &Encoding) -> Result<Vec<bool>> {
    let compare = |a: &FloatExpr, b: &FloatExpr, op: fn(f64, f64) -> bool| -> Result<Vec<bool>> {
        let a = eval_float(a, frame, encoding)?;
        let b = eval_float(b, frame, encoding)?;
        if a.len() != b.len() {
            return Err(Error::Shape(format!(
                "operands have {} and {} rows",
                a.len(),
                b.len()
            )));
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| op(x, y)).collect())
    };

    match expr {
        BoolExpr::EqualTo { operand1, operand2 } => compare(operand1, operand2, |a, b| a == b),
        BoolExpr::NotEqualTo { operand1, operand2 } => {
            compare(operand1, operand2, |a, b| a != b && !a.is_nan() && !b.is_nan())
        }
        BoolExpr::Greater { operand1, operand2 } => compare(operand1, operand2, |a, b| a > b),
        BoolExpr::GreaterEqual { operand1, operand2 } => {
            compare(operand1, operand2, |a, b| a >= b)
        }
        BoolExpr::Less { operand1, operand2 } => compare(operand1, operand2, |a, b| a < b),
        BoolExpr::LessEqual { operand1, operand2 } => compare(operand1, operand2, |a, b| a <= b),
        BoolExpr::StringEqualTo { operand1, operand2 } => {
            let a = eval_string(operand1, frame, encoding)?;
            let b = eval_string(operand2, frame, encoding)?;
            if a.len() != b.len() {
                return Err(Error::Shape(format!(
                    "operands have {} and {} rows",
                    a.len(),
                    b.len()
                )));
            }
            Ok(a.iter()
                .zip(&b)
                .map(|(x, y)| matches!((x, y), (Some(x), Some(y)) if x == y))
                .collect())
        }
        BoolExpr::Contains { operand, pattern } => {
            let strings = eval_string(operand, frame, encoding)?;
            Ok(strings
                .iter()
                .map(|s| s.as_deref().is_some_and(|s| s.contains(pattern.as_str())))
                .collect())
        }
        BoolExpr::And { operand1, operand2 } => {
            let a = eval_bool(operand1, frame, encoding)?;
            let b = eval_bool(operand2, frame, encoding)?;
            Ok(a.iter().zip(&b).map(|(x, y)| *x && *y).collect())
        }
        BoolExpr::Or { operand1, operand2 } => {
            let a = eval_bool(operand1, frame, encoding)?;
            let b = eval_bool(operand2, frame, encoding)?;
            Ok(a.iter().zip(&b).map(|(x, y)| *x || *y).collect())
        }
        BoolExpr::Not { operand } => {
            let a = eval_bool(operand, frame, encoding)?;
            Ok(a.into_iter().map(|x| !x).collect())
        }
        BoolExpr::IsInf { operand } => {
            let a = eval_float(operand, frame, encoding)?;
            Ok(a.iter().map(f64::is_infinite).collect())
        }
        BoolExpr::IsNan { operand } => {
            let a = eval_float(operand, frame, encoding)?;
            Ok(a.iter().map(f64::is_nan).collect())
        }
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiplies => a * b,
        BinaryOp::Divides => a / b,
        BinaryOp::Fmod => a % b,
        BinaryOp::Pow => a.powf(b),
    }
}

fn apply_unary(op: UnaryOp, v: f64) -> f64 {
    if v.is_nan() {
        return f64::NAN;
    }
    match op {
        UnaryOp::Abs => v.abs(),
        UnaryOp::Acos => v.acos(),
        UnaryOp::Asin => v.asin(),
        UnaryOp::Atan => v.atan(),
        UnaryOp::Cbrt => v.cbrt(),
        UnaryOp::Ceil => v.ceil(),
        UnaryOp::Cos => v.cos(),
        UnaryOp::Erf => erf(v),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Floor => v.floor(),
        UnaryOp::Lgamma => lgamma(v),
        UnaryOp::Log => v.ln(),
        UnaryOp::Round => v.round(),
        UnaryOp::Sin => v.sin(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Tan => v.tan(),
        UnaryOp::Tgamma => tgamma(v),
        UnaryOp::Day => time_part(v, |dt| f64::from(dt.day())),
        UnaryOp::Hour => time_part(v, |dt| f64::from(dt.hour())),
        UnaryOp::Minute => time_part(v, |dt| f64::from(dt.minute())),
        UnaryOp::Month => time_part(v, |dt| f64::from(dt.month())),
        UnaryOp::Second => time_part(v, |dt| f64::from(dt.second())),
        UnaryOp::Weekday => time_part(v, |dt| f64::from(dt.weekday().number_from_monday())),
        UnaryOp::Year => time_part(v, |dt| f64::from(dt.year())),
        UnaryOp::Yearday => time_part(v, |dt| f64::from(dt.ordinal())),
    }
}

fn time_part<F: Fn(DateTime<chrono::Utc>) -> f64>(epoch: f64, f: F) -> f64 {
    match DateTime::from_timestamp(epoch.floor() as i64, 0) {
        Some(dt) => f(dt),
        None => f64::NAN,
    }
}

fn parse_time_stamp(s: &str, formats: &[String]) -> f64 {
    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s.trim(), format) {
            return dt.and_utc().timestamp() as f64;
        }
    }
    f64::NAN
}

/// Abramowitz & Stegun 7.1.26, max absolute error 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

/// Lanczos approximation (g = 7, n = 9).
fn lgamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
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
        // Reflection formula.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).abs().ln() - lgamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

fn tgamma(x: f64) -> f64 {
    if x > 0.0 {
        lgamma(x).exp()
    } else if x == x.floor() {
        // Poles at zero and the negative integers.
        f64::NAN
    } else {
        let pi = std::f64::consts::PI;
        pi / ((pi * x).sin() * tgamma(1.0 - x))
    }
}
