// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `Retry-After` interpretation.
//!
//! EST servers send the hint in one of three shapes:
//!
//! - a duration string such as `2m`, `1h30m` or `1.5s`
//! - an integer number of seconds (RFC 7231 delay-seconds)
//! - an HTTP-date
//!
//! They are tried in that order. A hint that is missing, negative or
//! matches none of them yields the configured default and a warning.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Interpreted `Retry-After` hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryHint {
    /// Delay before the next poll.
    pub delay: Duration,
    /// Set when the default was used.
    pub warning: Option<String>,
}

impl RetryHint {
    fn fallback(default: Duration, warning: String) -> Self {
        Self {
            delay: default,
            warning: Some(warning),
        }
    }
}

/// Interpret a `Retry-After` header value.
pub fn parse_retry_after(value: Option<&str>, default: Duration, now: DateTime<Utc>) -> RetryHint {
    let Some(raw) = value.map(str::trim) else {
        return RetryHint::fallback(
            default,
            format!("no Retry-After header, retrying in {}s", default.as_secs()),
        );
    };

    let delta = parse_duration(raw)
        .or_else(|| raw.parse::<i64>().ok().and_then(TimeDelta::try_seconds))
        .or_else(|| parse_http_date(raw).map(|at| (at - now).max(TimeDelta::zero())));

    match delta.map(|d| d.to_std()) {
        Some(Ok(delay)) => RetryHint {
            delay,
            warning: None,
        },
        Some(Err(_)) => RetryHint::fallback(
            default,
            format!(
                "negative Retry-After '{}', retrying in {}s",
                raw,
                default.as_secs()
            ),
        ),
        None => RetryHint::fallback(
            default,
            format!(
                "unparseable Retry-After '{}', retrying in {}s",
                raw,
                default.as_secs()
            ),
        ),
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a duration string made of decimal numbers with unit suffixes,
/// e.g. `300ms`, `-1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0`
/// is accepted; any other number needs a unit.
pub fn parse_duration(input: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Some(TimeDelta::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let whole_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let whole = &rest[..whole_len];
        rest = &rest[whole_len..];

        let mut fraction = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            fraction = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = unit_nanos(&rest[..unit_len])?;
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut value = whole.checked_mul(unit)?;

        // Digits past nanosecond precision cannot change the result.
        let fraction = &fraction[..fraction.len().min(18)];
        if !fraction.is_empty() {
            let digits: u128 = fraction.parse().ok()?;
            let scale = 10u128.pow(fraction.len() as u32);
            value = value.checked_add(digits.checked_mul(unit)? / scale)?;
        }

        total = total.checked_add(value)?;
    }

    let nanos = i64::try_from(total).ok()?;
    Some(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}
