// Explicit finite-state marker tokenizer. Splits a text run into plain text,
// quotation/dash marker tokens, and (when the dash convention ends on any
// punctuation) word-final punctuation runs. Longest marker wins at every
// position; markers are matched as whole strings so multi-char markers and
// composite continuers never split mid-cluster.

use crate::quote_system::{DashEnd, QuoteSystem};

/// What a matched marker string can mean. One string may carry several roles
/// (straight quotes open and close with the same character).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    /// Opens the given 1-based quotation level.
    Open(usize),
    /// Closes the given 1-based quotation level.
    Close(usize),
    /// Continues the given 1-based quotation level at a paragraph start.
    Continuer(usize),
    DashStart,
    DashEnd,
}

#[derive(Debug)]
struct MarkerEntry {
    text: String,
    roles: Vec<MarkerRole>,
}

/// One token of a tokenized text run. Marker tokens reference their entry in
/// the owning `MarkerSet` so the parser can query roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Marker { text: &'a str, entry: usize },
    PunctRun(&'a str),
}

impl<'a> Token<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Token::Text(t) | Token::PunctRun(t) => t,
            Token::Marker { text, .. } => text,
        }
    }
}

/// Compiled marker table for one QuoteSystem.
#[derive(Debug)]
pub struct MarkerSet {
    entries: Vec<MarkerEntry>,
    punct_runs: bool,
}

fn add_marker(entries: &mut Vec<MarkerEntry>, text: &str, role: MarkerRole) {
    if text.is_empty() {
        return;
    }
    if let Some(entry) = entries.iter_mut().find(|e| e.text == text) {
        if !entry.roles.contains(&role) {
            entry.roles.push(role);
        }
    } else {
        entries.push(MarkerEntry { text: text.to_string(), roles: vec![role] });
    }
}

impl MarkerSet {
    pub fn new(system: &QuoteSystem) -> Self {
        let mut entries: Vec<MarkerEntry> = Vec::new();
        for (i, level) in system.levels.iter().enumerate() {
            let n = i + 1;
            add_marker(&mut entries, &level.open, MarkerRole::Open(n));
            add_marker(&mut entries, &level.close, MarkerRole::Close(n));
            add_marker(&mut entries, &level.continuer, MarkerRole::Continuer(n));
        }
        let mut punct_runs = false;
        if let Some(dash) = &system.dash {
            add_marker(&mut entries, &dash.marker, MarkerRole::DashStart);
            match &dash.end {
                DashEnd::Marker(m) => add_marker(&mut entries, m, MarkerRole::DashEnd),
                DashEnd::AnyPunctuation => punct_runs = true,
                DashEnd::ParagraphOnly => {}
            }
        }
        // Longest-match: try longer marker strings first at every position.
        entries.sort_by(|a, b| b.text.len().cmp(&a.text.len()));
        MarkerSet { entries, punct_runs }
    }

    pub fn roles(&self, entry: usize) -> &[MarkerRole] {
        &self.entries[entry].roles
    }

    pub fn tokenize<'a>(&self, text: &'a str) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        let mut pos = 0;
        let mut run_start = 0;
        'scan: while pos < text.len() {
            for (idx, entry) in self.entries.iter().enumerate() {
                if text[pos..].starts_with(entry.text.as_str()) {
                    if run_start < pos {
                        tokens.push(Token::Text(&text[run_start..pos]));
                    }
                    let end = pos + entry.text.len();
                    tokens.push(Token::Marker { text: &text[pos..end], entry: idx });
                    pos = end;
                    run_start = pos;
                    continue 'scan;
                }
            }
            let Some(ch) = text[pos..].chars().next() else {
                break;
            };
            if self.punct_runs && is_trailing_punctuation(ch) {
                let mut end = pos;
                for c in text[pos..].chars() {
                    if is_trailing_punctuation(c) {
                        end += c.len_utf8();
                    } else {
                        break;
                    }
                }
                let word_final = text[end..].chars().next().map_or(true, char::is_whitespace);
                if word_final {
                    if run_start < pos {
                        tokens.push(Token::Text(&text[run_start..pos]));
                    }
                    tokens.push(Token::PunctRun(&text[pos..end]));
                    pos = end;
                    run_start = pos;
                    continue;
                }
            }
            pos += ch.len_utf8();
        }
        if run_start < text.len() {
            tokens.push(Token::Text(&text[run_start..]));
        }
        tokens
    }
}

/// Punctuation that can trail a word and (under the AnyPunctuation dash
/// convention) terminate a dash quote. Quote marks and dashes are excluded;
/// those are markers.
pub fn is_trailing_punctuation(c: char) -> bool {
    matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '…')
}

/// Punctuation that ends a sentence; governs whether an open dash quote may
/// survive into a follow-on paragraph.
pub fn is_sentence_final(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}
