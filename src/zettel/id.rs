//! Hierarchical identifier model for Zettelkasten ids such as
//! `ZK_1_NB_1-5A1c3_V`.
//!
//! An identifier is a sequence of typed segments (digit runs, lowercase
//! runs, uppercase runs) separated by `_`/`-` delimiters, optionally ending
//! in the archive's `_V` version tag. Parsing keeps enough of the raw text
//! (delimiters, leading zeros) that formatting reproduces the input
//! byte-for-byte.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const VERSION_TAG: &str = "_V";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty identifier")]
    Empty,
    #[error("identifier `{raw}` has no segments")]
    NoSegments { raw: String },
    #[error("identifier `{raw}` contains invalid character `{ch}` at byte {pos}")]
    InvalidCharacter { raw: String, ch: char, pos: usize },
    #[error("identifier `{raw}` has a numeric segment too large to order")]
    NumberOverflow { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number { value: u64, text: String },
    Lower(String),
    Upper(String),
    Delim(char),
}

/// One element of the canonical order key.
///
/// The derived enum ordering is the whole point: `Number` variants sort
/// before `Lower` before `Upper`, numbers compare numerically, letter runs
/// lexicographically. Delimiters and the version tag never reach the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    Number(u64),
    Lower(String),
    Upper(String),
}

/// Total-order key of an identifier. `Vec` ordering is lexicographic with
/// shorter-prefix-first, so a parent id sorts before all of its children.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey(Vec<KeyPart>);

/// Case- and zero-padding-insensitive normalization used only for duplicate
/// detection. `a_1`, `A_1` and `A_01` share a folded key; they never share
/// an order key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FoldedPart {
    Number(u64),
    Letters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FoldedKey(Vec<FoldedPart>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    tokens: Vec<Token>,
    versioned: bool,
}

impl Identifier {
    /// Tokenize a raw identifier string.
    ///
    /// Characters outside {digit, lowercase, uppercase, `_`, `-`} are a
    /// `ParseError`: reportable data, never a crash, and never guessed at.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let (body, versioned) = match raw.strip_suffix(VERSION_TAG) {
            Some(rest) if !rest.is_empty() => (rest, true),
            _ => (raw, false),
        };

        let mut tokens: Vec<Token> = Vec::new();
        for (pos, ch) in body.char_indices() {
            match ch {
                '0'..='9' => match tokens.last_mut() {
                    Some(Token::Number { text, .. }) => text.push(ch),
                    _ => tokens.push(Token::Number {
                        value: 0,
                        text: ch.to_string(),
                    }),
                },
                'a'..='z' => match tokens.last_mut() {
                    Some(Token::Lower(text)) => text.push(ch),
                    _ => tokens.push(Token::Lower(ch.to_string())),
                },
                'A'..='Z' => match tokens.last_mut() {
                    Some(Token::Upper(text)) => text.push(ch),
                    _ => tokens.push(Token::Upper(ch.to_string())),
                },
                '_' | '-' => tokens.push(Token::Delim(ch)),
                _ => {
                    return Err(ParseError::InvalidCharacter {
                        raw: raw.to_string(),
                        ch,
                        pos,
                    });
                }
            }
        }

        let mut has_segment = false;
        for token in &mut tokens {
            if let Token::Number { value, text } = token {
                *value = text
                    .parse::<u64>()
                    .map_err(|_| ParseError::NumberOverflow {
                        raw: raw.to_string(),
                    })?;
            }
            if !matches!(token, Token::Delim(_)) {
                has_segment = true;
            }
        }
        if !has_segment {
            return Err(ParseError::NoSegments {
                raw: raw.to_string(),
            });
        }

        Ok(Self { tokens, versioned })
    }

    /// Inverse of `parse`: reproduces the original string byte-for-byte.
    pub fn format(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Number { text, .. } => out.push_str(text),
                Token::Lower(text) | Token::Upper(text) => out.push_str(text),
                Token::Delim(ch) => out.push(*ch),
            }
        }
        if self.versioned {
            out.push_str(VERSION_TAG);
        }
        out
    }

    pub fn canonical_key(&self) -> OrderKey {
        let parts = self
            .tokens
            .iter()
            .filter_map(|token| match token {
                Token::Number { value, .. } => Some(KeyPart::Number(*value)),
                Token::Lower(text) => Some(KeyPart::Lower(text.clone())),
                Token::Upper(text) => Some(KeyPart::Upper(text.clone())),
                Token::Delim(_) => None,
            })
            .collect();
        OrderKey(parts)
    }

    pub fn folded_key(&self) -> FoldedKey {
        let parts = self
            .tokens
            .iter()
            .filter_map(|token| match token {
                Token::Number { value, .. } => Some(FoldedPart::Number(*value)),
                Token::Lower(text) => Some(FoldedPart::Letters(text.clone())),
                Token::Upper(text) => Some(FoldedPart::Letters(text.to_ascii_lowercase())),
                Token::Delim(_) => None,
            })
            .collect();
        FoldedKey(parts)
    }

    pub fn versioned(&self) -> bool {
        self.versioned
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl Ord for Identifier {
    /// Canonical order, tie-broken by the formatted string so ids that share
    /// a key (case padding, version tag) still order deterministically.
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_key()
            .cmp(&other.canonical_key())
            .then_with(|| self.format().cmp(&other.format()))
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort identifiers into canonical archive order.
pub fn sort_canonical(ids: &mut [Identifier]) {
    ids.sort_by_cached_key(|id| (id.canonical_key(), id.format()));
}
