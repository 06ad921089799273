//! Slider Extraction
//!
//! Finds `slider(value[, min[, max[, step]]])` declarations in panel and
//! master source code and turns them into [`SliderWidget`]s.
//!
//! A declaration may be named by the binding it is assigned to:
//!
//! ```text
//! const cutoff = slider(800, 100, 4000, 10)   → <scope>_cutoff
//! { gain: slider(0.5) }                        → <scope>_gain
//! note("c e g").lpf(slider(1200, 200, 5000))   → <scope>_<index>
//! ```
//!
//! Source is tokenized rather than pattern-matched, so declarations inside
//! string literals or comments are ignored and nested parentheses in
//! arguments do not confuse argument splitting. Parsed declarations are
//! cached by a hash of the source text; re-evaluating unchanged code does
//! not re-tokenize it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::model::SliderScope;
use crate::protocol::SliderWidget;

/// Default lower bound
pub const DEFAULT_MIN: f64 = 0.0;
/// Default upper bound
pub const DEFAULT_MAX: f64 = 1.0;
/// Default step
pub const DEFAULT_STEP: f64 = 0.01;

const CACHE_CAPACITY: usize = 256;

/// A slider declaration found in source, before scoping
#[derive(Clone, Debug, PartialEq)]
pub struct SliderDeclaration {
    /// Binding name, if the call was assigned to one
    pub name: Option<String>,
    /// Initial value, clamped to `[min, max]`
    pub value: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
    /// Step increment
    pub step: f64,
}

impl SliderDeclaration {
    /// Build the widget for this declaration at position `index` in `scope`
    #[must_use]
    pub fn to_widget(&self, scope: &SliderScope, index: usize) -> SliderWidget {
        let suffix = self
            .name
            .clone()
            .unwrap_or_else(|| index.to_string());
        SliderWidget {
            slider_id: format!("{}_{suffix}", scope.id_prefix()),
            label: self
                .name
                .clone()
                .unwrap_or_else(|| format!("slider {}", index + 1)),
            value: self.value,
            min: self.min,
            max: self.max,
            step: self.step,
        }
    }
}

/// Caching slider extractor
#[derive(Debug, Default)]
pub struct SliderExtractor {
    cache: HashMap<u64, Vec<SliderDeclaration>>,
}

impl SliderExtractor {
    /// Create an extractor with an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the widgets declared by `source` for `scope`
    pub fn extract(&mut self, scope: &SliderScope, source: &str) -> Vec<SliderWidget> {
        let key = source_hash(source);
        if !self.cache.contains_key(&key) {
            if self.cache.len() >= CACHE_CAPACITY {
                self.cache.clear();
            }
            self.cache.insert(key, parse_declarations(source));
        }

        self.cache
            .get(&key)
            .map(|decls| {
                decls
                    .iter()
                    .enumerate()
                    .map(|(i, decl)| decl.to_widget(scope, i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of cached sources
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str,
    LParen,
    RParen,
    Comma,
    Assign,
    Colon,
    Minus,
    Other,
}

fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '"' | '\'' | '`' => {
                let quote = c;
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Str);
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            // `==`, `=>` and friends are not assignments
            '=' if matches!(chars.get(i + 1), Some('=' | '>')) => {
                tokens.push(Token::Other);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            c if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(text.parse().map_or(Token::Other, Token::Number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }

    tokens
}

// ============================================================================
// Declaration parser
// ============================================================================

/// Parse every slider declaration in `source`, in source order
#[must_use]
pub fn parse_declarations(source: &str) -> Vec<SliderDeclaration> {
    let tokens = tokenize(source);
    let mut declarations = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let is_call = matches!(&tokens[i], Token::Ident(name) if name == "slider")
            && tokens.get(i + 1) == Some(&Token::LParen);
        if !is_call {
            i += 1;
            continue;
        }

        let Some((args, close)) = split_arguments(&tokens, i + 1) else {
            break;
        };

        if let Some(mut decl) = declaration_from_args(&args) {
            decl.name = binding_name(&tokens, i);
            declarations.push(decl);
        }
        i = close + 1;
    }

    declarations
}

/// Split the argument list starting at the `(` at `open`
///
/// Returns the top-level arguments and the index of the matching `)`,
/// or `None` when the parentheses never close.
fn split_arguments(tokens: &[Token], open: usize) -> Option<(Vec<&[Token]>, usize)> {
    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut start = open + 1;

    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    if idx > start {
                        args.push(&tokens[start..idx]);
                    }
                    return Some((args, idx));
                }
            }
            Token::Comma if depth == 1 => {
                args.push(&tokens[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    None
}

fn literal(arg: &[Token]) -> Option<f64> {
    match arg {
        [Token::Number(n)] => Some(*n),
        [Token::Minus, Token::Number(n)] => Some(-n),
        _ => None,
    }
}

fn declaration_from_args(args: &[&[Token]]) -> Option<SliderDeclaration> {
    let value = literal(args.first()?)?;
    let arg = |idx: usize, default: f64| args.get(idx).and_then(|a| literal(a)).unwrap_or(default);

    let mut min = arg(1, DEFAULT_MIN);
    let mut max = arg(2, DEFAULT_MAX);
    let mut step = arg(3, DEFAULT_STEP);

    // A lone value outside the default range widens it
    if args.len() == 1 && value > max {
        max = value;
    }
    if min > max {
        std::mem::swap(&mut min, &mut max);
    }
    if step <= 0.0 {
        step = DEFAULT_STEP;
    }

    Some(SliderDeclaration {
        name: None,
        value: value.clamp(min, max),
        min,
        max,
        step,
    })
}

/// Name bound by `name = slider(` or `name: slider(`
fn binding_name(tokens: &[Token], call: usize) -> Option<String> {
    if call < 2 {
        return None;
    }
    match (&tokens[call - 2], &tokens[call - 1]) {
        (Token::Ident(name), Token::Assign | Token::Colon) => Some(name.clone()),
        _ => None,
    }
}
