//! Serialization utilities for durations
//!
//! Settings files express durations in (possibly fractional) seconds, while
//! status snapshots use whole milliseconds for JSON consumers.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Custom serialization module for Duration as milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use bulwark_resilience::duration_millis;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Custom serialization module for Duration as seconds (f64)
///
/// Accepts integers and floats on input (`timeout = 30` and
/// `min_wait = 0.25` are both valid). Negative or non-finite values are
/// rejected.
pub mod duration_secs {
    use serde::de::Error as _;

    use super::*;

    /// Serialize a Duration as fractional seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize fractional seconds into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {secs}")))
    }

    /// Same as the parent module, for `Option<Duration>` fields
    pub mod option {
        use serde::de::Error as _;

        use super::*;

        /// Serialize an optional Duration as fractional seconds
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize optional fractional seconds into a Duration
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<f64>::deserialize(deserializer)?
                .map(|secs| {
                    Duration::try_from_secs_f64(secs).map_err(|_| {
                        D::Error::custom(format!("invalid duration in seconds: {secs}"))
                    })
                })
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for duration serde helpers
    //!
    //! Tests cover millisecond output, fractional second input, and
    //! rejection of negative values.

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timings {
        #[serde(with = "duration_secs")]
        timeout: Duration,
        #[serde(default, with = "duration_secs::option")]
        jitter: Option<Duration>,
    }

    #[derive(Serialize)]
    struct Snapshot {
        #[serde(with = "duration_millis")]
        elapsed: Duration,
    }

    /// Tests that Duration serializes to milliseconds as u64
    #[test]
    fn test_duration_millis_serialize() {
        let data = Snapshot { elapsed: Duration::from_millis(1500) };

        let json = serde_json::to_string(&data).expect("Should serialize valid struct");
        assert_eq!(json, r#"{"elapsed":1500}"#);
    }

    /// Tests that integer and fractional seconds both parse
    #[test]
    fn test_duration_secs_accepts_int_and_float() {
        let parsed: Timings =
            toml::from_str("timeout = 30\njitter = 0.25").expect("Should parse durations");
        assert_eq!(parsed.timeout, Duration::from_secs(30));
        assert_eq!(parsed.jitter, Some(Duration::from_millis(250)));

        let parsed: Timings = toml::from_str("timeout = 1.5").expect("Should parse without jitter");
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
        assert_eq!(parsed.jitter, None);
    }

    #[test]
    fn test_duration_secs_rejects_negative() {
        let result: Result<Timings, _> = toml::from_str("timeout = -1.0");
        assert!(result.is_err());
    }
}
