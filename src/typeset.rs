//! Math finalizer for completed assistant messages.
//!
//! Assistant replies carry LaTeX-style math between `\( \)` (inline) and
//! `\[ \]` (display) delimiters. Once a stream has ended, the controller hands
//! the full message to a [`Typesetter`] and shows its output instead of the
//! raw source.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesetError {
    /// An opening delimiter has no matching close
    #[error("unbalanced math delimiter {open} at char {position}")]
    Unbalanced { open: &'static str, position: usize },

    /// A closing delimiter appeared outside of math
    #[error("unexpected closing delimiter {close} at char {position}")]
    UnexpectedClose { close: &'static str, position: usize },
}

/// Renders math markup in a finished message
pub trait Typesetter: Send + Sync {
    fn typeset(&self, source: &str) -> Result<String, TypesetError>;
}

/// Renders common LaTeX math to plain Unicode for the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeMath;

static SYMBOLS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("alpha", "α"),
        ("beta", "β"),
        ("gamma", "γ"),
        ("delta", "δ"),
        ("Delta", "Δ"),
        ("epsilon", "ε"),
        ("theta", "θ"),
        ("lambda", "λ"),
        ("mu", "μ"),
        ("pi", "π"),
        ("rho", "ρ"),
        ("sigma", "σ"),
        ("Sigma", "Σ"),
        ("tau", "τ"),
        ("phi", "φ"),
        ("omega", "ω"),
        ("Omega", "Ω"),
        ("times", "×"),
        ("cdot", "·"),
        ("div", "÷"),
        ("pm", "±"),
        ("leq", "≤"),
        ("le", "≤"),
        ("geq", "≥"),
        ("ge", "≥"),
        ("neq", "≠"),
        ("approx", "≈"),
        ("infty", "∞"),
        ("sum", "∑"),
        ("int", "∫"),
        ("partial", "∂"),
        ("rightarrow", "→"),
        ("to", "→"),
        ("leftarrow", "←"),
        ("degree", "°"),
        ("circ", "°"),
        ("%", "%"),
        (",", " "),
        (";", " "),
        ("quad", "  "),
        ("left", ""),
        ("right", ""),
        ("text", ""),
        ("mathrm", ""),
    ])
});

fn superscript(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        '+' => '⁺',
        '-' => '⁻',
        'n' => 'ⁿ',
        _ => return None,
    })
}

fn subscript(c: char) -> Option<char> {
    Some(match c {
        '0' => '₀',
        '1' => '₁',
        '2' => '₂',
        '3' => '₃',
        '4' => '₄',
        '5' => '₅',
        '6' => '₆',
        '7' => '₇',
        '8' => '₈',
        '9' => '₉',
        '+' => '₊',
        '-' => '₋',
        _ => return None,
    })
}

impl Typesetter for UnicodeMath {
    fn typeset(&self, source: &str) -> Result<String, TypesetError> {
        let chars: Vec<char> = source.chars().collect();
        let mut out = String::with_capacity(source.len());
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '\\' && i + 1 < chars.len() {
                let (open, close_char) = match chars[i + 1] {
                    '(' => ("\\(", ')'),
                    '[' => ("\\[", ']'),
                    ')' => {
                        return Err(TypesetError::UnexpectedClose { close: "\\)", position: i });
                    }
                    ']' => {
                        return Err(TypesetError::UnexpectedClose { close: "\\]", position: i });
                    }
                    _ => {
                        out.push(chars[i]);
                        i += 1;
                        continue;
                    }
                };

                let body_start = i + 2;
                let end = find_close(&chars, body_start, close_char)
                    .ok_or(TypesetError::Unbalanced { open, position: i })?;
                let body: String = chars[body_start..end].iter().collect();
                let rendered = render_math(&body);
                if open == "\\[" {
                    out.push('\n');
                    out.push_str("    ");
                    out.push_str(rendered.trim());
                    out.push('\n');
                } else {
                    out.push_str(rendered.trim());
                }
                i = end + 2;
                continue;
            }
            out.push(chars[i]);
            i += 1;
        }

        Ok(out)
    }
}

/// Index of the backslash starting the closing delimiter
fn find_close(chars: &[char], from: usize, close: char) -> Option<usize> {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '\\' {
            if chars[i + 1] == close {
                return Some(i);
            }
            // skip escaped char so `\\` does not pair with the next char
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

fn render_math(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_alphabetic() {
                    end += 1;
                }
                if end == start && end < chars.len() {
                    // single-symbol command such as `\%` or `\,`
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                i = end;

                match name.as_str() {
                    "frac" => {
                        let (num, next) = read_group(&chars, i);
                        let (den, next) = read_group(&chars, next);
                        i = next;
                        out.push_str(&format!("({})/({})", render_math(&num), render_math(&den)));
                    }
                    "sqrt" => {
                        let (arg, next) = read_group(&chars, i);
                        i = next;
                        out.push_str(&format!("√({})", render_math(&arg)));
                    }
                    other => match SYMBOLS.get(other) {
                        Some(symbol) => out.push_str(symbol),
                        None => {
                            out.push('\\');
                            out.push_str(other);
                        }
                    },
                }
            }
            '^' | '_' => {
                let map = if chars[i] == '^' { superscript } else { subscript };
                let (arg, next) = read_group(&chars, i + 1);
                let rendered = render_math(&arg);
                match rendered.chars().map(map).collect::<Option<String>>() {
                    Some(script) if !script.is_empty() => out.push_str(&script),
                    _ => {
                        out.push(chars[i]);
                        out.push_str(&rendered);
                    }
                }
                i = next;
            }
            '{' | '}' => i += 1,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Read a `{...}` group or a single character starting at `at`
fn read_group(chars: &[char], at: usize) -> (String, usize) {
    let mut i = at;
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }
    if i >= chars.len() {
        return (String::new(), i);
    }
    if chars[i] != '{' {
        return (chars[i].to_string(), i + 1);
    }

    let mut depth = 0usize;
    let start = i + 1;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return (chars[start..i].iter().collect(), i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (chars[start..].iter().collect(), chars.len())
}
