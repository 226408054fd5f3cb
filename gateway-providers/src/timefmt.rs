//! Timestamp normalization shared by every adapter.
//!
//! Upstreams hand back timestamps in a handful of shapes (RFC 3339 with a
//! `Z` suffix, RFC 3339 with explicit offsets, Unix seconds as an integer).
//! Every adapter funnels through here so the gateway always emits one
//! canonical millisecond-precision ISO-8601 string, matching the source's use
//! of `datetime.isoformat()`.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use gateway_core::{GatewayError, GatewayResult};

/// The current instant, formatted as millisecond-precision ISO-8601 UTC.
pub fn now_iso_millis() -> String {
    format_iso_millis(OffsetDateTime::now_utc())
}

/// Parse an RFC-3339 timestamp (as returned by BlockCypher, Blockbook,
/// Etherscan's `timeStamp`-as-seconds once converted, ...) and re-render it
/// as millisecond-precision ISO-8601 UTC.
pub fn parse_rfc3339(raw: &str) -> GatewayResult<String> {
    let parsed = OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| GatewayError::UpstreamDecodeError(format!("bad timestamp {raw:?}: {e}")))?;
    Ok(format_iso_millis(parsed))
}

/// Render a Unix-seconds timestamp (Etherscan, Ripple) as millisecond ISO-8601.
pub fn from_unix_seconds(secs: i64) -> GatewayResult<String> {
    let parsed = OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| GatewayError::UpstreamDecodeError(format!("bad unix timestamp {secs}: {e}")))?;
    Ok(format_iso_millis(parsed))
}

fn format_iso_millis(t: OffsetDateTime) -> String {
    let t = t.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}+00:00",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second(),
        t.millisecond(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zulu_and_offset_forms() {
        assert_eq!(
            parse_rfc3339("2021-04-01T12:34:56Z").unwrap(),
            "2021-04-01T12:34:56.000+00:00"
        );
        assert_eq!(
            parse_rfc3339("2021-04-01T12:34:56.789Z").unwrap(),
            "2021-04-01T12:34:56.789+00:00"
        );
    }

    #[test]
    fn unix_seconds_round_trips() {
        assert_eq!(
            from_unix_seconds(1_617_280_496).unwrap(),
            "2021-04-01T12:34:56.000+00:00"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_rfc3339("not-a-timestamp").is_err());
    }
}
