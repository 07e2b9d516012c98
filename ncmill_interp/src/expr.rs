//! RS274 expression/parameter scanner and evaluator.
//!
//! Implements the bracketed-expression grammar of the NC language:
//! `[ … ]` groups, binary operators with five precedence levels
//! (`**` > `* / MOD` > `+ -` > `EQ NE GT GE LT LE` > `AND OR XOR`),
//! unary functions (`ABS ACOS ASIN ATAN COS EXP FIX FUP LN ROUND SIN
//! SQRT TAN`) and `#n` parameter reads. Trigonometry is in degrees, as
//! the language specifies. Evaluation is pure given the parameter table;
//! every value must come out a finite real.

use ncmill_common::error::SyntaxError;

use crate::block::ParseFailure;
use crate::param::ParamTable;

// ─── Scanner ────────────────────────────────────────────────────────

/// Character scanner over one source line with 1-based column tracking.
pub struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    text: &'a str,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str, line: u32) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line,
            text,
        }
    }

    /// 1-based column of the next character.
    #[inline]
    pub fn column(&self) -> u32 {
        self.pos as u32 + 1
    }

    /// 1-based source line number.
    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Source text being scanned.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Next character without consuming, skipping nothing.
    #[inline]
    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Consume and return the next character.
    #[inline]
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// Skip spaces and tabs (the language is whitespace-insensitive
    /// outside comments).
    pub fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
    }

    /// True once the whole line is consumed.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Build a syntax error at the current column.
    pub fn error_here(&self, token: impl Into<String>, detail: impl Into<String>) -> ParseFailure {
        ParseFailure::Syntax(SyntaxError::new(self.line, self.column(), token, detail))
    }
}

// ─── Operators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Power,
    Times,
    Divide,
    Modulo,
    Plus,
    Minus,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// Precedence level, higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Power => 5,
            BinOp::Times | BinOp::Divide | BinOp::Modulo => 4,
            BinOp::Plus | BinOp::Minus => 3,
            BinOp::Eq | BinOp::Ne | BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => 2,
            BinOp::And | BinOp::Or | BinOp::Xor => 1,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        let bool_to_real = |v: bool| if v { 1.0 } else { 0.0 };
        match self {
            BinOp::Power => a.powf(b),
            BinOp::Times => a * b,
            BinOp::Divide => a / b,
            // True modulo: result carries the sign of the divisor.
            BinOp::Modulo => a - (a / b).floor() * b,
            BinOp::Plus => a + b,
            BinOp::Minus => a - b,
            BinOp::Eq => bool_to_real(a == b),
            BinOp::Ne => bool_to_real(a != b),
            BinOp::Gt => bool_to_real(a > b),
            BinOp::Ge => bool_to_real(a >= b),
            BinOp::Lt => bool_to_real(a < b),
            BinOp::Le => bool_to_real(a <= b),
            BinOp::And => bool_to_real(a != 0.0 && b != 0.0),
            BinOp::Or => bool_to_real(a != 0.0 || b != 0.0),
            BinOp::Xor => bool_to_real((a != 0.0) != (b != 0.0)),
        }
    }
}

// ─── Entry Points ───────────────────────────────────────────────────

/// Read one real value: a number, a `[ … ]` expression, a `#` parameter
/// read, or a unary function call.
pub fn read_real(s: &mut Scanner<'_>, params: &ParamTable) -> Result<f64, ParseFailure> {
    s.skip_ws();
    // A sign may precede any value form (X-#100, Y-[1+2]), not just numbers.
    if matches!(s.peek(), Some('+') | Some('-'))
        && !matches!(s.chars.get(s.pos + 1), Some('0'..='9') | Some('.'))
    {
        let negative = s.bump() == Some('-');
        let inner = read_real(s, params)?;
        return Ok(if negative { -inner } else { inner });
    }
    let value = match s.peek() {
        Some('[') => read_expression(s, params)?,
        Some('#') => read_parameter(s, params)?,
        Some(c) if c.is_ascii_digit() || c == '.' || c == '+' || c == '-' => read_number(s)?,
        Some(c) if c.is_ascii_alphabetic() => read_unary(s, params)?,
        Some(c) => return Err(s.error_here(c, "expected a real value")),
        None => return Err(s.error_here("", "unexpected end of line, expected a real value")),
    };
    if !value.is_finite() {
        return Err(s.error_here(
            format!("{value}"),
            "expression does not evaluate to a finite number",
        ));
    }
    Ok(value)
}

/// Read a plain decimal number with optional sign.
fn read_number(s: &mut Scanner<'_>) -> Result<f64, ParseFailure> {
    let start_col = s.column();
    let mut buf = String::new();
    if matches!(s.peek(), Some('+') | Some('-')) {
        buf.push(s.bump().unwrap_or('+'));
        s.skip_ws();
    }
    let mut seen_dot = false;
    let mut seen_digit = false;
    while let Some(c) = s.peek() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                buf.push(c);
                s.bump();
            }
            '.' if !seen_dot => {
                seen_dot = true;
                buf.push(c);
                s.bump();
            }
            _ => break,
        }
    }
    if !seen_digit {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            start_col,
            buf,
            "malformed number",
        )));
    }
    buf.parse::<f64>().map_err(|_| {
        ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            start_col,
            buf.clone(),
            "malformed number",
        ))
    })
}

/// Read a bracketed expression `[ … ]` using precedence climbing.
fn read_expression(s: &mut Scanner<'_>, params: &ParamTable) -> Result<f64, ParseFailure> {
    let open_col = s.column();
    s.bump(); // consume '['
    let value = read_binary(s, params, 1)?;
    s.skip_ws();
    match s.bump() {
        Some(']') => Ok(value),
        _ => Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            open_col,
            "[",
            "unterminated expression",
        ))),
    }
}

/// Precedence-climbing loop over binary operators.
fn read_binary(
    s: &mut Scanner<'_>,
    params: &ParamTable,
    min_prec: u8,
) -> Result<f64, ParseFailure> {
    let mut lhs = read_real(s, params)?;
    loop {
        s.skip_ws();
        let Some(op) = peek_operator(s) else { break };
        let prec = op.precedence();
        if prec < min_prec {
            break;
        }
        consume_operator(s, op);
        // Power is right-associative, everything else left.
        let next_min = if op == BinOp::Power { prec } else { prec + 1 };
        let rhs = read_binary(s, params, next_min)?;
        if op == BinOp::Divide && rhs == 0.0 {
            return Err(s.error_here("/", "division by zero"));
        }
        if op == BinOp::Modulo && rhs == 0.0 {
            return Err(s.error_here("MOD", "modulo by zero"));
        }
        lhs = op.apply(lhs, rhs);
    }
    Ok(lhs)
}

/// Identify the operator at the cursor without consuming it.
fn peek_operator(s: &Scanner<'_>) -> Option<BinOp> {
    match s.peek()? {
        '*' => {
            if s.chars.get(s.pos + 1) == Some(&'*') {
                Some(BinOp::Power)
            } else {
                Some(BinOp::Times)
            }
        }
        '/' => Some(BinOp::Divide),
        '+' => Some(BinOp::Plus),
        '-' => Some(BinOp::Minus),
        c if c.is_ascii_alphabetic() => {
            let word: String = s.chars[s.pos..]
                .iter()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase();
            match word.as_str() {
                "MOD" => Some(BinOp::Modulo),
                "EQ" => Some(BinOp::Eq),
                "NE" => Some(BinOp::Ne),
                "GT" => Some(BinOp::Gt),
                "GE" => Some(BinOp::Ge),
                "LT" => Some(BinOp::Lt),
                "LE" => Some(BinOp::Le),
                "AND" => Some(BinOp::And),
                "OR" => Some(BinOp::Or),
                "XOR" => Some(BinOp::Xor),
                _ => None,
            }
        }
        _ => None,
    }
}

fn consume_operator(s: &mut Scanner<'_>, op: BinOp) {
    let len = match op {
        BinOp::Power => 2,
        BinOp::Times | BinOp::Divide | BinOp::Plus | BinOp::Minus => 1,
        BinOp::Eq | BinOp::Ne | BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le | BinOp::Or => 2,
        BinOp::Modulo | BinOp::And | BinOp::Xor => 3,
    };
    s.pos += len;
}

/// Read a `#` parameter reference. The parameter number may itself be an
/// expression or another parameter read.
fn read_parameter(s: &mut Scanner<'_>, params: &ParamTable) -> Result<f64, ParseFailure> {
    let hash_col = s.column();
    s.bump(); // consume '#'
    let raw = read_real(s, params)?;
    let number = raw.round();
    if (number - raw).abs() > 0.0001 || number < 0.0 {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            hash_col,
            format!("#{raw}"),
            "parameter number must be a non-negative integer",
        )));
    }
    let number = number as u32;
    if !ParamTable::in_range(number) {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            hash_col,
            format!("#{number}"),
            "parameter number out of range",
        )));
    }
    params
        .get(number)
        .ok_or(ParseFailure::UndefinedParameter { number })
}

/// Parse the target parameter number of a `#n = expr` assignment.
/// Leaves the scanner positioned after the number.
pub fn read_parameter_target(
    s: &mut Scanner<'_>,
    params: &ParamTable,
) -> Result<u32, ParseFailure> {
    let hash_col = s.column();
    s.bump(); // consume '#'
    s.skip_ws();
    let raw = read_real(s, params)?;
    let number = raw.round();
    if (number - raw).abs() > 0.0001 || number < 1.0 || !ParamTable::in_range(number as u32) {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            hash_col,
            format!("#{raw}"),
            "invalid parameter number in assignment",
        )));
    }
    Ok(number as u32)
}

/// Read a unary function call, e.g. `SIN[30]` or `ATAN[1]/[1]`.
fn read_unary(s: &mut Scanner<'_>, params: &ParamTable) -> Result<f64, ParseFailure> {
    let name_col = s.column();
    let mut name = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphabetic() {
            name.push(c.to_ascii_uppercase());
            s.bump();
        } else {
            break;
        }
    }
    s.skip_ws();
    if s.peek() != Some('[') {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            name_col,
            name,
            "expected '[' after function name",
        )));
    }
    let arg = read_expression(s, params)?;

    let value = match name.as_str() {
        "ABS" => arg.abs(),
        "ACOS" => arg.acos().to_degrees(),
        "ASIN" => arg.asin().to_degrees(),
        "COS" => arg.to_radians().cos(),
        "EXP" => arg.exp(),
        "FIX" => arg.floor(),
        "FUP" => arg.ceil(),
        "LN" => arg.ln(),
        "ROUND" => arg.round(),
        "SIN" => arg.to_radians().sin(),
        "SQRT" => arg.sqrt(),
        "TAN" => arg.to_radians().tan(),
        "ATAN" => {
            // ATAN[y]/[x] — two-argument arctangent in degrees.
            s.skip_ws();
            if s.bump() != Some('/') {
                return Err(ParseFailure::Syntax(SyntaxError::new(
                    s.line(),
                    name_col,
                    "ATAN",
                    "ATAN requires the form ATAN[y]/[x]",
                )));
            }
            s.skip_ws();
            if s.peek() != Some('[') {
                return Err(ParseFailure::Syntax(SyntaxError::new(
                    s.line(),
                    name_col,
                    "ATAN",
                    "ATAN requires the form ATAN[y]/[x]",
                )));
            }
            let x = read_expression(s, params)?;
            arg.atan2(x).to_degrees()
        }
        _ => {
            return Err(ParseFailure::Syntax(SyntaxError::new(
                s.line(),
                name_col,
                name,
                "unknown function name",
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> Result<f64, ParseFailure> {
        eval_with(text, &ParamTable::new())
    }

    fn eval_with(text: &str, params: &ParamTable) -> Result<f64, ParseFailure> {
        let mut s = Scanner::new(text, 1);
        read_real(&mut s, params)
    }

    #[test]
    fn plain_numbers() {
        assert_eq!(eval("42").unwrap(), 42.0);
        assert_eq!(eval("-3.5").unwrap(), -3.5);
        assert_eq!(eval("+.25").unwrap(), 0.25);
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("[1 + 2 * 3]").unwrap(), 7.0);
        assert_eq!(eval("[[1 + 2] * 3]").unwrap(), 9.0);
        assert_eq!(eval("[2 ** 3]").unwrap(), 8.0);
        // Power is right-associative: 2 ** 3 ** 2 = 2 ** 9.
        assert_eq!(eval("[2 ** 3 ** 2]").unwrap(), 512.0);
        assert_eq!(eval("[10 MOD 3]").unwrap(), 1.0);
        // True modulo, never negative for positive divisor.
        assert_eq!(eval("[-1 MOD 3]").unwrap(), 2.0);
    }

    #[test]
    fn relational_and_logical() {
        assert_eq!(eval("[1 LT 2]").unwrap(), 1.0);
        assert_eq!(eval("[1 GT 2]").unwrap(), 0.0);
        assert_eq!(eval("[1 EQ 1]").unwrap(), 1.0);
        assert_eq!(eval("[1 AND 0]").unwrap(), 0.0);
        assert_eq!(eval("[1 OR 0]").unwrap(), 1.0);
        assert_eq!(eval("[1 XOR 1]").unwrap(), 0.0);
        // Relational binds tighter than logical.
        assert_eq!(eval("[1 LT 2 AND 3 GT 2]").unwrap(), 1.0);
    }

    #[test]
    fn unary_functions_degrees() {
        assert!((eval("SIN[30]").unwrap() - 0.5).abs() < 1e-9);
        assert!((eval("COS[60]").unwrap() - 0.5).abs() < 1e-9);
        assert!((eval("ATAN[1]/[1]").unwrap() - 45.0).abs() < 1e-9);
        assert_eq!(eval("FIX[2.8]").unwrap(), 2.0);
        assert_eq!(eval("FUP[2.2]").unwrap(), 3.0);
        assert_eq!(eval("SQRT[16]").unwrap(), 4.0);
        assert_eq!(eval("ABS[-3]").unwrap(), 3.0);
    }

    #[test]
    fn parameter_reads() {
        let mut params = ParamTable::new();
        params.set(100, 12.0);
        assert_eq!(eval_with("#100", &params).unwrap(), 12.0);
        assert_eq!(eval_with("[#100 + 1]", &params).unwrap(), 13.0);

        // Indirect: #[100] reads parameter 100.
        assert_eq!(eval_with("#[99 + 1]", &params).unwrap(), 12.0);
    }

    #[test]
    fn undefined_parameter_is_reported() {
        let result = eval("#500");
        assert!(matches!(
            result,
            Err(ParseFailure::UndefinedParameter { number: 500 })
        ));
    }

    #[test]
    fn unterminated_expression_names_column() {
        let err = eval("[1 + 2").unwrap_err();
        match err {
            ParseFailure::Syntax(e) => {
                assert_eq!(e.column, 1);
                assert!(e.detail.contains("unterminated"));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_rejected() {
        assert!(matches!(eval("[1 / 0]"), Err(ParseFailure::Syntax(_))));
    }

    #[test]
    fn unknown_function_rejected() {
        assert!(matches!(eval("FOO[1]"), Err(ParseFailure::Syntax(_))));
    }

    #[test]
    fn case_insensitive_words() {
        assert_eq!(eval("[10 mod 3]").unwrap(), 1.0);
        assert!((eval("sin[30]").unwrap() - 0.5).abs() < 1e-9);
    }
}
