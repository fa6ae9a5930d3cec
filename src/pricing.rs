use rust_decimal::{Decimal, RoundingStrategy};

use crate::engine::EngineError;
use crate::model::{HOUR_MS, Ms, Span};

/// Money is kept to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn exact_hours(span: &Span) -> Decimal {
    Decimal::from(span.duration_ms()) / Decimal::from(HOUR_MS)
}

/// Hours covered by `span`, rounded to two places for display.
pub fn duration_hours(span: &Span) -> Decimal {
    round_money(exact_hours(span))
}

/// `price_per_hour × hours(start, end)`, rounded once at the end.
pub fn compute_price(price_per_hour: Decimal, start: Ms, end: Ms) -> Result<Decimal, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidInterval)?;
    Ok(round_money(price_per_hour * exact_hours(&span)))
}
