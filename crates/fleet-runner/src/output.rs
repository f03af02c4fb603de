//! Metrics extraction from worker stdout.
//!
//! Workers print free text; the two lines the fleet cares about look like
//!
//! ```text
//! Communication Cost: 123456 bytes
//! Total Time:	12.5 ms
//! ```

const COMM_MARKER: &str = "Communication Cost:";
const TIME_MARKER: &str = "Total Time:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleMetrics {
    pub comm_cost: u64,
    /// Milliseconds.
    pub total_time: f64,
}

/// Returns `None` unless both markers are present with valid numbers.
pub fn parse_worker_output(stdout: &str) -> Option<RoleMetrics> {
    let comm_cost = find_marker(stdout, COMM_MARKER, "bytes", is_digit)?
        .parse::<u64>()
        .ok()?;
    let total_time = find_marker(stdout, TIME_MARKER, "ms", is_digit_or_dot)?
        .parse::<f64>()
        .ok()?;
    Some(RoleMetrics {
        comm_cost,
        total_time,
    })
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn is_digit_or_dot(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// First occurrence of `marker <ws+> value <ws+> unit` whose value consists of
/// `accept` characters.
fn find_marker<'a>(
    text: &'a str,
    marker: &str,
    unit: &str,
    accept: fn(char) -> bool,
) -> Option<&'a str> {
    let mut from = 0;
    while let Some(pos) = text[from..].find(marker) {
        let start = from + pos + marker.len();
        if let Some(value) = match_value(&text[start..], unit, accept) {
            return Some(value);
        }
        from = start;
    }
    None
}

fn match_value<'a>(rest: &'a str, unit: &str, accept: fn(char) -> bool) -> Option<&'a str> {
    let after_ws = skip_whitespace(rest)?;
    let value_len = after_ws
        .char_indices()
        .find(|(_, c)| !accept(*c))
        .map(|(i, _)| i)
        .unwrap_or(after_ws.len());
    if value_len == 0 {
        return None;
    }
    let (value, tail) = after_ws.split_at(value_len);
    let tail = skip_whitespace(tail)?;
    tail.starts_with(unit).then_some(value)
}

/// Strips at least one leading ASCII whitespace character.
fn skip_whitespace(s: &str) -> Option<&str> {
    let trimmed = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    (trimmed.len() < s.len()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARER_STDOUT: &str = "Connecting to 127.0.0.1:8001\n\
        Shares written to 0Share.bin\n\
        Communication Cost: 40960 bytes\n\
        Total Time: 12.75 ms\n";

    #[test]
    fn parses_both_markers() {
        let metrics = parse_worker_output(SHARER_STDOUT).expect("metrics");
        assert_eq!(metrics.comm_cost, 40960);
        assert_eq!(metrics.total_time, 12.75);
    }

    #[test]
    fn accepts_tab_separated_time_line() {
        let out = "Communication Cost: 7 bytes\nTotal Time:\t3.5 ms\n";
        let metrics = parse_worker_output(out).expect("metrics");
        assert_eq!(metrics.total_time, 3.5);
    }

    #[test]
    fn missing_either_marker_yields_none() {
        assert!(parse_worker_output("Communication Cost: 10 bytes\n").is_none());
        assert!(parse_worker_output("Total Time: 1.0 ms\n").is_none());
        assert!(parse_worker_output("").is_none());
    }

    #[test]
    fn invalid_numbers_yield_none() {
        assert!(parse_worker_output("Communication Cost: 10 bytes\nTotal Time: 1.2.3 ms\n").is_none());
        assert!(parse_worker_output("Communication Cost: -10 bytes\nTotal Time: 1 ms\n").is_none());
        assert!(
            parse_worker_output("Communication Cost: 99999999999999999999999 bytes\nTotal Time: 1 ms\n")
                .is_none()
        );
    }

    #[test]
    fn uses_first_complete_match() {
        let out = "Communication Cost: pending\n\
            Communication Cost: 11 bytes\n\
            Communication Cost: 22 bytes\n\
            Total Time: 5 ms\nTotal Time: 9 ms\n";
        let metrics = parse_worker_output(out).expect("metrics");
        assert_eq!(metrics.comm_cost, 11);
        assert_eq!(metrics.total_time, 5.0);
    }

    #[test]
    fn requires_whitespace_around_value() {
        assert!(parse_worker_output("Communication Cost:10 bytes\nTotal Time: 1 ms\n").is_none());
        assert!(parse_worker_output("Communication Cost: 10bytes\nTotal Time: 1 ms\n").is_none());
    }

    #[test]
    fn only_ascii_whitespace_separates_value() {
        // U+00A0 and U+2003 are not separators.
        assert!(parse_worker_output("Communication Cost:\u{a0}10 bytes\nTotal Time: 1 ms\n").is_none());
        assert!(parse_worker_output("Communication Cost: 10\u{2003}bytes\nTotal Time: 1 ms\n").is_none());
        let metrics = parse_worker_output("Communication Cost:\r\n10\x0cbytes\nTotal Time: 1 ms\n")
            .expect("ascii separators");
        assert_eq!(metrics.comm_cost, 10);
    }

    #[test]
    fn parsing_is_idempotent() {
        for out in [SHARER_STDOUT, "garbage", "Total Time: 3 ms"] {
            assert_eq!(parse_worker_output(out), parse_worker_output(out));
        }
    }
}
