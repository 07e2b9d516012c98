//! Block parser: one source line → one parsed `Block`.
//!
//! `parse_block` is stateless per call and pure given the parameter
//! table. It strips comments (forwarding them on the block for any
//! logging collaborator), resolves expressions and parameter reads into
//! flat `(letter, value)` word pairs, collects `#n = expr` assignments
//! (applied by the interpreter after the whole line is read, per the
//! language's read-then-set semantics) and recognizes O-word control
//! flow.

use thiserror::Error;

use ncmill_common::error::SyntaxError;

use crate::expr::{read_parameter_target, read_real, Scanner};
use crate::param::ParamTable;

/// Why a line failed to parse.
///
/// Undefined parameter reads are separated from syntax errors because
/// the interpreter reports them as semantic (`InterpError`) failures:
/// the block was well-formed, its data was not.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    /// Malformed line.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// Reference to a parameter that was never set.
    #[error("undefined parameter #{number}")]
    UndefinedParameter { number: u32 },
}

/// Word letters the language accepts (N and O are handled separately).
const WORD_LETTERS: &str = "ABCDFGHIJKLMPQRSTUVWXYZ";

/// One resolved word: letter, numeric value, source column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word {
    pub letter: char,
    pub value: f64,
    pub column: u32,
}

/// O-word control-flow constructs.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    /// `O<label> sub` — subroutine definition start.
    Sub,
    /// `O<label> endsub`.
    EndSub,
    /// `O<label> call [arg1] [arg2] …` — arguments become `#1`, `#2`, …
    Call { args: Vec<f64> },
    /// `O<label> return`.
    Return,
    /// `O<label> if [cond]`.
    If { cond: bool },
    /// `O<label> else`.
    Else,
    /// `O<label> endif`.
    EndIf,
    /// `O<label> while [cond]`.
    While { cond: bool },
    /// `O<label> endwhile`.
    EndWhile,
}

/// A parsed O-word.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlWord {
    pub label: u32,
    pub kind: ControlKind,
}

/// One parsed line of NC source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// 1-based source line number.
    pub line: u32,
    /// Resolved words in source order.
    pub words: Vec<Word>,
    /// Comment text, stripped but preserved for logging.
    pub comment: Option<String>,
    /// `(MSG, …)` payload, surfaced to the operator.
    pub message: Option<String>,
    /// `#n = value` assignments, already evaluated against the
    /// pre-line parameter table, not yet applied.
    pub assignments: Vec<(u32, f64)>,
    /// O-word control flow, if this line is one.
    pub control: Option<ControlWord>,
    /// N-word line number, if present.
    pub n_number: Option<u32>,
    /// Line started with the block-delete slash.
    pub deleted: bool,
}

impl Block {
    /// Value of the single occurrence of `letter`, if present.
    pub fn get(&self, letter: char) -> Option<f64> {
        self.words
            .iter()
            .find(|w| w.letter == letter)
            .map(|w| w.value)
    }

    /// True if the block carries the given word letter.
    pub fn has(&self, letter: char) -> bool {
        self.words.iter().any(|w| w.letter == letter)
    }

    /// All G-word values in source order.
    pub fn g_codes(&self) -> impl Iterator<Item = f64> + '_ {
        self.words
            .iter()
            .filter(|w| w.letter == 'G')
            .map(|w| w.value)
    }

    /// All M-word values in source order.
    pub fn m_codes(&self) -> impl Iterator<Item = f64> + '_ {
        self.words
            .iter()
            .filter(|w| w.letter == 'M')
            .map(|w| w.value)
    }

    /// True if the block contains any axis word (X Y Z A B C U V W).
    pub fn has_axis_word(&self) -> bool {
        self.words
            .iter()
            .any(|w| ncmill_common::types::Axis::from_letter(w.letter).is_some())
    }

    /// True if nothing in this block requires interpretation.
    pub fn is_empty(&self) -> bool {
        self.deleted
            || (self.words.is_empty() && self.assignments.is_empty() && self.control.is_none())
    }
}

/// Parse one line of NC source into a [`Block`].
///
/// `semicolon_comments` enables the `;` trailing-comment convention in
/// addition to `( … )` bracket comments.
pub fn parse_block(
    text: &str,
    line: u32,
    params: &ParamTable,
    semicolon_comments: bool,
) -> Result<Block, ParseFailure> {
    let mut s = Scanner::new(text, line);
    let mut block = Block {
        line,
        ..Block::default()
    };

    // Block-delete slash: the whole line is skippable.
    s.skip_ws();
    if s.peek() == Some('/') && s.column() <= 2 {
        block.deleted = true;
        return Ok(block);
    }

    loop {
        s.skip_ws();
        let Some(c) = s.peek() else { break };

        match c {
            '(' => read_comment(&mut s, &mut block)?,
            ';' if semicolon_comments => {
                let rest: String = s.text().chars().skip(s.column() as usize).collect();
                append_comment(&mut block, rest.trim());
                break;
            }
            '#' => {
                let target = read_parameter_target(&mut s, params)?;
                s.skip_ws();
                if s.bump() != Some('=') {
                    return Err(s.error_here(format!("#{target}"), "expected '=' in assignment"));
                }
                let value = read_real(&mut s, params)?;
                block.assignments.push((target, value));
            }
            c if c.is_ascii_alphabetic() => {
                let letter = c.to_ascii_uppercase();
                match letter {
                    'N' if block.n_number.is_none() && block.words.is_empty() => {
                        s.bump();
                        let value = read_real(&mut s, params)?;
                        block.n_number = Some(value as u32);
                    }
                    'O' => {
                        read_control_word(&mut s, params, &mut block)?;
                    }
                    _ => read_word(&mut s, params, &mut block, letter)?,
                }
            }
            other => {
                return Err(s.error_here(other, "unexpected character"));
            }
        }
    }

    Ok(block)
}

/// Read one `letter value` word, enforcing single occurrence for
/// everything except G and M (the language allows several modal groups
/// per block).
fn read_word(
    s: &mut Scanner<'_>,
    params: &ParamTable,
    block: &mut Block,
    letter: char,
) -> Result<(), ParseFailure> {
    let column = s.column();
    if !WORD_LETTERS.contains(letter) {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            column,
            letter,
            "unknown word letter",
        )));
    }
    s.bump();
    if letter != 'G' && letter != 'M' && block.has(letter) {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            column,
            letter,
            "word letter repeated in block",
        )));
    }
    let value = read_real(s, params)?;
    block.words.push(Word {
        letter,
        value,
        column,
    });
    Ok(())
}

/// Read a `( … )` comment, surfacing `(MSG, …)` payloads separately.
fn read_comment(s: &mut Scanner<'_>, block: &mut Block) -> Result<(), ParseFailure> {
    let open_col = s.column();
    s.bump(); // consume '('
    let mut text = String::new();
    loop {
        match s.bump() {
            Some(')') => break,
            Some(c) => text.push(c),
            None => {
                return Err(ParseFailure::Syntax(SyntaxError::new(
                    s.line(),
                    open_col,
                    "(",
                    "unterminated comment",
                )))
            }
        }
    }
    let trimmed = text.trim();
    if let Some(msg) = trimmed
        .strip_prefix("MSG,")
        .or_else(|| trimmed.strip_prefix("msg,"))
    {
        block.message = Some(msg.trim().to_string());
    } else {
        append_comment(block, trimmed);
    }
    Ok(())
}

fn append_comment(block: &mut Block, text: &str) {
    if text.is_empty() {
        return;
    }
    match &mut block.comment {
        Some(existing) => {
            existing.push_str("; ");
            existing.push_str(text);
        }
        None => block.comment = Some(text.to_string()),
    }
}

/// Read an O-word: `O<label> <keyword> …`.
fn read_control_word(
    s: &mut Scanner<'_>,
    params: &ParamTable,
    block: &mut Block,
) -> Result<(), ParseFailure> {
    let o_col = s.column();
    s.bump(); // consume 'O'
    s.skip_ws();
    let label = read_real(s, params)?;
    if label < 0.0 || label.fract() != 0.0 {
        return Err(ParseFailure::Syntax(SyntaxError::new(
            s.line(),
            o_col,
            format!("O{label}"),
            "O-word label must be a non-negative integer",
        )));
    }
    let label = label as u32;

    s.skip_ws();
    let kw_col = s.column();
    let mut keyword = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphabetic() {
            keyword.push(c.to_ascii_lowercase());
            s.bump();
        } else {
            break;
        }
    }

    let kind = match keyword.as_str() {
        "sub" => ControlKind::Sub,
        "endsub" => ControlKind::EndSub,
        "return" => ControlKind::Return,
        "else" => ControlKind::Else,
        "endif" => ControlKind::EndIf,
        "endwhile" => ControlKind::EndWhile,
        "call" => {
            let mut args = Vec::new();
            loop {
                s.skip_ws();
                if s.peek() == Some('[') {
                    args.push(read_real(s, params)?);
                } else {
                    break;
                }
            }
            ControlKind::Call { args }
        }
        "if" => ControlKind::If {
            cond: read_condition(s, params)?,
        },
        "while" => ControlKind::While {
            cond: read_condition(s, params)?,
        },
        other => {
            return Err(ParseFailure::Syntax(SyntaxError::new(
                s.line(),
                kw_col,
                other,
                "unknown O-word keyword",
            )))
        }
    };

    block.control = Some(ControlWord { label, kind });
    Ok(())
}

fn read_condition(s: &mut Scanner<'_>, params: &ParamTable) -> Result<bool, ParseFailure> {
    s.skip_ws();
    if s.peek() != Some('[') {
        return Err(s.error_here("", "expected bracketed condition expression"));
    }
    Ok(read_real(s, params)? != 0.0)
}
