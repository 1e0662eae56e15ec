//! Deserialization helpers for exchange REST payloads.
//!
//! Venues encode prices and volumes as JSON strings and timestamps as epoch
//! milliseconds (sometimes themselves string-encoded); these helpers normalise
//! both into the crate's native types.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, de};
use std::{fmt::Display, str::FromStr};

/// Deserialize a `String` as the desired type `T`, eg/ `"16578.50"` -> `f64`.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    // Owned rather than borrowed so this also works through serde_json::Value
    let data = String::deserialize(deserializer)?;
    data.parse::<T>().map_err(de::Error::custom)
}

/// Construct a `DateTime<Utc>` from epoch milliseconds, `None` if out of range.
pub fn datetime_utc_from_epoch_ms(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse a string-encoded epoch-millisecond timestamp, eg/ Bybit kline rows.
pub fn datetime_utc_from_epoch_ms_str(data: &str) -> Option<DateTime<Utc>> {
    data.parse::<i64>().ok().and_then(datetime_utc_from_epoch_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_utc_from_epoch_ms() {
        let time = datetime_utc_from_epoch_ms(1672304486865).unwrap();
        assert_eq!(time.timestamp_millis(), 1672304486865);
        assert!(datetime_utc_from_epoch_ms(i64::MAX).is_none());
    }

    #[test]
    fn test_datetime_utc_from_epoch_ms_str() {
        assert_eq!(
            datetime_utc_from_epoch_ms_str("1672304486865").map(|dt| dt.timestamp_millis()),
            Some(1672304486865)
        );
        assert_eq!(datetime_utc_from_epoch_ms_str("not-a-number"), None);
    }
}
