//! Threshold filter chain on the forwarding path
//!
//! Rules are evaluated in declared order and the first rule that fires drops the
//! reading. Rules whose type or id selector does not match are skipped.

use crate::config::{Comparator, FilterRule};
use crate::reading::Reading;

/// Selector value matching any sensor
pub const WILDCARD: &str = "*";

/// Index of the rule that drops `reading`, if any
#[must_use]
pub fn first_drop(reading: &Reading, rules: &[FilterRule]) -> Option<usize> {
    rules.iter().position(|rule| fires(rule, reading))
}

/// Whether `reading` is dropped by `rules`
#[must_use]
pub fn evaluate(reading: &Reading, rules: &[FilterRule]) -> bool {
    first_drop(reading, rules).is_some()
}

fn selects(selector: &str, value: &str) -> bool {
    selector == WILDCARD || selector == value
}

fn fires(rule: &FilterRule, reading: &Reading) -> bool {
    if !selects(&rule.sensor_type, &reading.sensor_type)
        || !selects(&rule.sensor_id, &reading.sensor_id)
    {
        return false;
    }

    match rule.comparator {
        Comparator::GreaterThan => reading.raw_value > rule.threshold,
        Comparator::LessThan => reading.raw_value < rule.threshold,
    }
}
