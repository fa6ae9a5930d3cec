use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidInterval)?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too long"));
    }
    Ok(span)
}

pub(crate) fn validate_price(price: Decimal, config: &EngineConfig) -> Result<(), EngineError> {
    if price < config.min_price || price > config.max_price {
        return Err(EngineError::InvalidPrice(price));
    }
    Ok(())
}

/// Trimmed, non-empty, at most `MAX_LABEL_LEN` characters.
pub(crate) fn normalize_label(label: &str) -> Result<String, EngineError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(EngineError::LimitExceeded("spot label empty"));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(EngineError::LimitExceeded("spot label too long"));
    }
    Ok(label.to_string())
}

/// Blank optional text is treated as absent.
pub(crate) fn optional_text(
    value: Option<String>,
    max_len: usize,
    what: &'static str,
) -> Result<Option<String>, EngineError> {
    let Some(value) = value else { return Ok(None) };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max_len {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(Some(value.to_string()))
}
