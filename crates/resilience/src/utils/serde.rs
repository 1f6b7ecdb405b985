//! Serde helpers for durations expressed in milliseconds
//!
//! Settings files and serialized events carry durations as plain integer
//! milliseconds.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use pulsearc_resilience::utils::serde::duration_millis;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Example {
//!     #[serde(with = "duration_millis")]
//!     open_duration: Duration,
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

fn to_millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `Duration` as `u64` milliseconds
pub mod duration_millis {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(to_millis(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `Option<Duration>` as optional `u64` milliseconds
pub mod option_duration_millis {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&to_millis(duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Window {
        #[serde(with = "duration_millis")]
        open_duration: Duration,
        #[serde(with = "option_duration_millis", default)]
        ttl: Option<Duration>,
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let window = Window { open_duration: Duration::from_millis(1500), ttl: None };
        let json = serde_json::to_string(&window).expect("serializes");
        assert_eq!(json, r#"{"open_duration":1500,"ttl":null}"#);
    }

    #[test]
    fn test_missing_optional_duration_defaults_to_none() {
        let window: Window =
            serde_json::from_str(r#"{"open_duration":250}"#).expect("deserializes");
        assert_eq!(window, Window { open_duration: Duration::from_millis(250), ttl: None });
    }

    #[test]
    fn test_optional_duration_round_trips() {
        let window: Window =
            serde_json::from_str(r#"{"open_duration":0,"ttl":60000}"#).expect("deserializes");
        assert_eq!(window.ttl, Some(Duration::from_secs(60)));
    }
}
