//! Structured representation of evolved source code.
//!
//! The prompt builder works on code as data, not as flat text:
//! - `Function`: one function's name, argument list, return type,
//!   docstring, and body, all independently mutable
//! - `Program`: a preface (imports, constants, helpers, comments) plus an
//!   ordered, replaceable list of functions
//! - Rendering to Rust-style source text and parsing that text back
//! - `rename_function_calls`: whole-identifier call-site rewriting
//!
//! Round-tripping (render, then parse) recovers names, docstrings, and
//! bodies exactly for text this module's renderer produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised when parsing source text back into a `Program`.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed function signature: `{0}`")]
    BadSignature(String),

    #[error("unterminated body for function `{0}`")]
    UnterminatedBody(String),
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

/// A single function: the unit the oracle is asked to improve.
///
/// The body is stored verbatim (including indentation) so rendering does not
/// disturb code the oracle produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Argument list, verbatim text between the parentheses.
    pub args: String,
    /// Return type, without the `->` arrow. `None` for unit functions.
    pub return_type: Option<String>,
    /// Doc comment text, one string with embedded newlines. Rendered as
    /// `///` lines above the signature.
    pub docstring: Option<String>,
    /// Body text between the braces, without the braces themselves. Empty
    /// for a header the oracle has yet to fill in.
    pub body: String,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref docstring) = self.docstring {
            for line in docstring.lines() {
                if line.is_empty() {
                    writeln!(f, "///")?;
                } else {
                    writeln!(f, "/// {}", line)?;
                }
            }
        }
        match self.return_type {
            Some(ref ret) => writeln!(f, "fn {}({}) -> {} {{", self.name, self.args, ret)?,
            None => writeln!(f, "fn {}({}) {{", self.name, self.args)?,
        }
        if !self.body.is_empty() {
            writeln!(f, "{}", self.body)?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A whole source file: context code plus an ordered list of functions.
///
/// The function list is the slot the prompt builder replaces wholesale; the
/// preface (imports, constants, comments) is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Everything above the first function, verbatim.
    pub preface: String,
    /// The functions, in source order.
    pub functions: Vec<Function>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.preface.is_empty() {
            writeln!(f, "{}", self.preface)?;
            writeln!(f)?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}

impl Program {
    /// Parse rendered source text back into a `Program`.
    ///
    /// Recognizes top-level `fn` items with optional `///` doc comments;
    /// everything before the first function becomes the preface. Function
    /// bodies are captured verbatim by tracking brace depth, so nested
    /// blocks are fine; braces inside string literals are not tracked
    /// (the renderer never emits them unbalanced).
    pub fn parse(text: &str) -> Result<Program, ParseError> {
        let mut preface_lines: Vec<&str> = Vec::new();
        let mut functions: Vec<Function> = Vec::new();
        let mut pending_doc: Vec<String> = Vec::new();

        let mut lines = text.lines();
        while let Some(line) = lines.next() {
            if line.starts_with("///") {
                pending_doc.push(strip_doc_prefix(line));
            } else if line.starts_with("fn ") {
                let (name, args, return_type) = parse_signature(line)?;

                let mut depth = brace_delta(line);
                if depth <= 0 {
                    return Err(ParseError::BadSignature(line.to_string()));
                }

                let mut body_lines: Vec<&str> = Vec::new();
                loop {
                    let body_line = lines
                        .next()
                        .ok_or_else(|| ParseError::UnterminatedBody(name.clone()))?;
                    depth += brace_delta(body_line);
                    if depth <= 0 {
                        break;
                    }
                    body_lines.push(body_line);
                }

                let docstring = if pending_doc.is_empty() {
                    None
                } else {
                    Some(pending_doc.join("\n"))
                };
                pending_doc.clear();

                functions.push(Function {
                    name,
                    args,
                    return_type,
                    docstring,
                    body: body_lines.join("\n"),
                });
            } else {
                // Doc lines not followed by a function are discarded;
                // anything else before the first function is preface.
                pending_doc.clear();
                if functions.is_empty() {
                    preface_lines.push(line);
                }
            }
        }

        let preface = preface_lines.join("\n").trim_end().to_string();
        Ok(Program { preface, functions })
    }
}

/// Strip the `///` marker (and one following space, if present) from a doc line.
fn strip_doc_prefix(line: &str) -> String {
    let rest = &line[3..];
    rest.strip_prefix(' ').unwrap_or(rest).to_string()
}

/// Net brace count of one line: opens minus closes.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    for ch in line.chars() {
        match ch {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Split a `fn name(args) -> ret {` line into its parts.
fn parse_signature(line: &str) -> Result<(String, String, Option<String>), ParseError> {
    let bad = || ParseError::BadSignature(line.to_string());

    let rest = line.strip_prefix("fn ").ok_or_else(bad)?;
    let open = rest.find('(').ok_or_else(bad)?;
    let name = rest[..open].trim().to_string();
    if name.is_empty() {
        return Err(bad());
    }

    // The argument list may itself contain parentheses (tuples, fn types),
    // so find the matching close by depth rather than the last ')'.
    let mut depth = 0usize;
    let mut close = None;
    for (i, ch) in rest[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close.ok_or_else(bad)?;
    let args = rest[open + 1..close].to_string();

    let tail = rest[close + 1..].trim();
    let tail = tail.strip_suffix('{').ok_or_else(bad)?.trim();
    let return_type = if tail.is_empty() {
        None
    } else {
        let ret = tail.strip_prefix("->").ok_or_else(bad)?.trim();
        if ret.is_empty() {
            return Err(bad());
        }
        Some(ret.to_string())
    };

    Ok((name, args, return_type))
}

// ---------------------------------------------------------------------------
// Call-site renaming
// ---------------------------------------------------------------------------

/// Rewrite call sites of `old_name` to `new_name` in `source`.
///
/// A call site is the identifier `old_name` immediately followed by `(`,
/// with no identifier character on either side. Identifiers that merely
/// contain `old_name` as a substring (`old_name_helper`, `my_old_name`)
/// are left untouched.
pub fn rename_function_calls(source: &str, old_name: &str, new_name: &str) -> String {
    if old_name.is_empty() {
        return source.to_string();
    }

    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < source.len() {
        if source[i..].starts_with(old_name) {
            let end = i + old_name.len();
            let boundary_before = i == 0 || !is_ident_byte(bytes[i - 1]);
            let is_call = end < bytes.len() && bytes[end] == b'(';
            if boundary_before && is_call {
                out.push_str(new_name);
                i = end;
                continue;
            }
        }
        let ch = source[i..].chars().next().expect("index is a char boundary");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
