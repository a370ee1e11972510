use crate::observation::Observation;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow<'a> {
    pub line: usize,
    pub tokens: Vec<&'a str>,
}

impl<'a> ParsedRow<'a> {
    pub fn token(&self, index: usize) -> Result<&'a str, FieldError> {
        self.tokens
            .get(index)
            .copied()
            .ok_or(FieldError::Missing {
                line: self.line,
                index,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("line {line}: column {index} is missing")]
    Missing { line: usize, index: usize },
    #[error("line {line}: column {index} value {token:?} is not a number")]
    Malformed {
        line: usize,
        index: usize,
        token: String,
    },
    #[error("{entity}: field {field} is absent")]
    Absent {
        entity: String,
        field: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("none of {rows} rows could be parsed, first failure: {first}")]
    NoValidRows { rows: usize, first: FieldError },
    #[error("output does not match {pattern:?}")]
    Pattern { pattern: &'static str },
}

#[derive(Debug, Default)]
pub struct Parsed {
    pub observations: Vec<Observation>,
    pub skipped: Vec<FieldError>,
}

pub fn tokenize(text: &str, skip_header: usize, skip_trailer: usize) -> Vec<ParsedRow<'_>> {
    let rows: Vec<ParsedRow<'_>> = text
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            (!tokens.is_empty()).then_some(ParsedRow {
                line: idx + 1,
                tokens,
            })
        })
        .collect();

    let end = rows.len().saturating_sub(skip_trailer);
    if skip_header >= end {
        return Vec::new();
    }
    rows.into_iter()
        .skip(skip_header)
        .take(end - skip_header)
        .collect()
}

pub fn extract_float(row: &ParsedRow<'_>, index: usize) -> Result<f64, FieldError> {
    coerce(row.token(index)?, row.line, index)
}

pub fn extract_percent(row: &ParsedRow<'_>, index: usize) -> Result<f64, FieldError> {
    let token = row.token(index)?;
    let trimmed = token.strip_suffix('%').unwrap_or(token);
    coerce_as(trimmed, token, row.line, index)
}

pub fn extract_unit_stripped(row: &ParsedRow<'_>, index: usize) -> Result<f64, FieldError> {
    let token = row.token(index)?;
    let trimmed = token
        .strip_suffix(|c: char| "KMGTPE".contains(c.to_ascii_uppercase()))
        .unwrap_or(token);
    coerce_as(trimmed, token, row.line, index)
}

pub(crate) fn coerce(token: &str, line: usize, index: usize) -> Result<f64, FieldError> {
    coerce_as(token, token, line, index)
}

fn coerce_as(candidate: &str, token: &str, line: usize, index: usize) -> Result<f64, FieldError> {
    match candidate.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(FieldError::Malformed {
            line,
            index,
            token: token.to_string(),
        }),
    }
}

/// Runs `emit` over every item, keeping all observations of an item or none.
/// Fails only when there was at least one item and every one of them failed.
pub fn collect_atomic<T, F>(items: impl IntoIterator<Item = T>, mut emit: F) -> Result<Parsed, ParseError>
where
    F: FnMut(&T) -> Result<Vec<Observation>, FieldError>,
{
    let mut parsed = Parsed::default();
    let mut total = 0_usize;
    for item in items {
        total += 1;
        match emit(&item) {
            Ok(observations) => parsed.observations.extend(observations),
            Err(err) => parsed.skipped.push(err),
        }
    }

    if total > 0 && parsed.skipped.len() == total {
        let first = parsed.skipped.swap_remove(0);
        return Err(ParseError::NoValidRows { rows: total, first });
    }
    Ok(parsed)
}
