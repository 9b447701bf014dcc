//! Rule-based NER adapter.
//!
//! A deterministic recognizer over domain cue tokens: organization
//! suffixes, person titles, courts, case citations, statutes, money, and
//! dates. Confidence is a prior attached per match rule, not computed from
//! an external model, which keeps the output reproducible and auditable.
//!
//! Offsets are UTF-8 byte indices into the input text. Simple token
//! scanning, no regex dependency.

use async_trait::async_trait;

use crate::domain::{EntityType, ExtractedEntity, ExtractionMethod};

use super::{check_input, ExtractError, Extractor};

const PRIOR_ORGANIZATION: f64 = 0.80;
const PRIOR_PERSON: f64 = 0.90;
const PRIOR_COURT: f64 = 0.75;
const PRIOR_CITATION: f64 = 0.85;
const PRIOR_STATUTE: f64 = 0.90;
const PRIOR_MONEY: f64 = 0.90;
const PRIOR_DATE: f64 = 0.85;

const ORG_SUFFIXES: &[&str] = &[
    "Corp",
    "Corporation",
    "Inc",
    "LLC",
    "Ltd",
    "LLP",
    "Co",
    "Company",
    "Group",
    "Partners",
    "Holdings",
];

const PERSON_TITLES: &[&str] = &[
    "Mr", "Mrs", "Ms", "Dr", "Judge", "Justice", "Prof", "Attorney", "Hon",
];

const MONTHS: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Deterministic pattern-based entity recognizer.
pub struct NerExtractor {
    max_input_bytes: usize,
}

impl Default for NerExtractor {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

impl NerExtractor {
    pub fn new(max_input_bytes: usize) -> Self {
        Self { max_input_bytes }
    }

    fn recognize(&self, text: &str) -> Vec<ExtractedEntity> {
        let tokens = tokenize(text);
        let mut entities = Vec::new();

        entities.extend(match_org_suffixes(text, &tokens));
        entities.extend(match_person_titles(text, &tokens));
        entities.extend(match_courts(text, &tokens));
        entities.extend(match_citations(text, &tokens));
        entities.extend(match_statutes(text, &tokens));
        entities.extend(match_money(text, &tokens));
        entities.extend(match_dates(text, &tokens));

        // Drop exact duplicates (same span + type), keep the highest prior
        entities.sort_by(|a, b| {
            (a.start, a.end, a.entity_type)
                .cmp(&(b.start, b.end, b.entity_type))
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });
        entities.dedup_by(|a, b| a.start == b.start && a.end == b.end && a.entity_type == b.entity_type);
        entities
    }
}

#[async_trait]
impl Extractor for NerExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ner
    }

    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractError> {
        check_input(text, self.max_input_bytes)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.recognize(text))
    }
}

/// A whitespace-delimited token with punctuation trimmed, keeping byte
/// offsets of the trimmed region.
#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
}

fn is_trim_punct(c: char) -> bool {
    matches!(c, ',' | ';' | ':' | '!' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | '\'')
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;

    let flush = |tokens: &mut Vec<Token>, raw_start: usize, raw_end: usize, text: &str| {
        let raw = &text[raw_start..raw_end];

        let mut s = raw_start;
        for c in raw.chars() {
            if is_trim_punct(c) {
                s += c.len_utf8();
            } else {
                break;
            }
        }

        let mut e = raw_end;
        for c in text[s..raw_end].chars().rev() {
            if is_trim_punct(c) || c == '.' {
                e -= c.len_utf8();
            } else {
                break;
            }
        }
        // Keep a single trailing '.' inside abbreviations like "U.S.C."
        if e < raw_end && text[s..e].contains('.') && text[e..].starts_with('.') {
            e += 1;
        }

        if s < e {
            tokens.push(Token {
                text: text[s..e].to_string(),
                start: s,
                end: e,
            });
        }
    };

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                flush(&mut tokens, s, i, text);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        flush(&mut tokens, s, text.len(), text);
    }

    tokens
}

fn is_capitalized(token: &Token) -> bool {
    token
        .text
        .chars()
        .next()
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
}

/// Capitalized words that start sentences or clauses but are not names.
const CAP_STOPWORDS: &[&str] = &[
    "In", "The", "A", "An", "Of", "On", "At", "For", "To", "From", "By", "See", "Under", "And",
    "Or", "But", "As", "With",
];

fn is_name_token(token: &Token) -> bool {
    is_capitalized(token) && !CAP_STOPWORDS.contains(&token.text.as_str())
}

fn is_org_suffix(token: &Token) -> bool {
    let t = token.text.trim_end_matches('.');
    ORG_SUFFIXES.iter().any(|s| s.eq_ignore_ascii_case(t))
}

fn all_digits(token: &Token) -> bool {
    !token.text.is_empty() && token.text.chars().all(|c| c.is_ascii_digit())
}

fn make(text: &str, start: usize, end: usize, ty: EntityType, prior: f64) -> ExtractedEntity {
    ExtractedEntity::candidate(&text[start..end], ty, start, end, prior, ExtractionMethod::Ner)
}

fn match_org_suffixes(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !is_org_suffix(tok) || i == 0 {
            continue;
        }
        // Walk backwards over the capitalized name tokens
        let mut first = i;
        while first > 0
            && i - (first - 1) <= 4
            && is_name_token(&tokens[first - 1])
            && !is_org_suffix(&tokens[first - 1])
        {
            first -= 1;
        }
        if first < i {
            out.push(make(
                text,
                tokens[first].start,
                tok.end,
                EntityType::Organization,
                PRIOR_ORGANIZATION,
            ));
        }
    }
    out
}

fn match_person_titles(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        let t = tok.text.trim_end_matches('.');
        if !PERSON_TITLES.iter().any(|s| *s == t) {
            continue;
        }
        let mut last = i;
        while last + 1 < tokens.len() && last - i < 3 && is_name_token(&tokens[last + 1]) {
            last += 1;
        }
        if last > i {
            out.push(make(
                text,
                tokens[i + 1].start,
                tokens[last].end,
                EntityType::Person,
                PRIOR_PERSON,
            ));
        }
    }
    out
}

fn match_courts(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if tok.text != "Court" {
            continue;
        }
        let mut first = i;
        while first > 0 && i - (first - 1) <= 4 && is_name_token(&tokens[first - 1]) {
            first -= 1;
        }
        out.push(make(
            text,
            tokens[first].start,
            tok.end,
            EntityType::Court,
            PRIOR_COURT,
        ));
    }
    out
}

fn match_citations(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if tok.text != "v" && tok.text != "v." {
            continue;
        }
        if i == 0 || i + 1 >= tokens.len() {
            continue;
        }

        let mut first = i;
        while first > 0 && i - (first - 1) <= 4 && is_name_token(&tokens[first - 1]) {
            first -= 1;
        }
        let mut last = i;
        while last + 1 < tokens.len() && last - i < 4 && is_name_token(&tokens[last + 1]) {
            last += 1;
        }

        if first < i && last > i {
            out.push(make(
                text,
                tokens[first].start,
                tokens[last].end,
                EntityType::Citation,
                PRIOR_CITATION,
            ));
        }
    }
    out
}

fn match_statutes(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        let upper = tok.text.trim_end_matches('.').to_ascii_uppercase();
        if upper != "U.S.C" && upper != "USC" && !tok.text.starts_with('§') {
            continue;
        }

        let mut first = i;
        if first > 0 && all_digits(&tokens[first - 1]) {
            first -= 1;
        }
        let mut last = i;
        while last + 1 < tokens.len() {
            let next = &tokens[last + 1];
            if next.text.starts_with('§') || all_digits(next) {
                last += 1;
            } else {
                break;
            }
        }

        out.push(make(
            text,
            tokens[first].start,
            tokens[last].end,
            EntityType::Statute,
            PRIOR_STATUTE,
        ));
    }
    // A bare "§ 1983" inside "42 U.S.C. § 1983" produces a nested duplicate;
    // keep only the widest span per overlap group.
    out.sort_by_key(|e| (e.start, std::cmp::Reverse(e.end)));
    let mut filtered: Vec<ExtractedEntity> = Vec::new();
    for e in out {
        if !filtered.iter().any(|kept| kept.start <= e.start && e.end <= kept.end) {
            filtered.push(e);
        }
    }
    filtered
}

fn match_money(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !tok.text.starts_with('$') || tok.text.len() < 2 {
            continue;
        }
        if !tok.text[1..]
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '.')
        {
            continue;
        }

        let mut end = tok.end;
        if let Some(next) = tokens.get(i + 1) {
            if matches!(next.text.as_str(), "million" | "billion" | "thousand") {
                end = next.end;
            }
        }
        out.push(make(text, tok.start, end, EntityType::Money, PRIOR_MONEY));
    }
    out
}

fn match_dates(text: &str, tokens: &[Token]) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !MONTHS.contains(&tok.text.as_str()) {
            continue;
        }
        let Some(day) = tokens.get(i + 1) else { continue };
        if !all_digits(day) {
            continue;
        }

        let mut end = day.end;
        if let Some(year) = tokens.get(i + 2) {
            if all_digits(year) && year.text.len() == 4 {
                end = year.end;
            }
        }
        out.push(make(text, tok.start, end, EntityType::Date, PRIOR_DATE));
    }
    out
}
