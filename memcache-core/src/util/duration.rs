use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Duration as written in configuration files: either plain milliseconds (`500`) or a table such
/// as `{ seconds = 1, milliseconds = 500 }`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ConfigDuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    milliseconds: Option<u64>,
}

impl ConfigDuration {
    pub fn to_std_duration(&self) -> Duration {
        let minutes = self.minutes.unwrap_or(0);
        let seconds = self.seconds.unwrap_or(0);
        let milliseconds = self.milliseconds.unwrap_or(0);
        Duration::from_secs(minutes * 60 + seconds) + Duration::from_millis(milliseconds)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            minutes: None,
            seconds: None,
            milliseconds: Some(millis),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self {
            minutes: None,
            seconds: Some(secs),
            milliseconds: None,
        }
    }

    pub fn from_mins(mins: u64) -> Self {
        Self {
            minutes: Some(mins),
            seconds: None,
            milliseconds: None,
        }
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(u64),
            Table {
                #[serde(default)]
                minutes: Option<u64>,
                #[serde(default)]
                seconds: Option<u64>,
                #[serde(default)]
                milliseconds: Option<u64>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Millis(millis) => Ok(Self::from_millis(millis)),
            Repr::Table { minutes, seconds, milliseconds } => Ok(Self { minutes, seconds, milliseconds }),
        }
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.to_std_duration()
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self::from_millis(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use crate::util::duration::ConfigDuration;

    #[derive(Deserialize)]
    struct Holder {
        plain: ConfigDuration,
        table: ConfigDuration,
    }

    #[test]
    fn test_both_forms() -> anyhow::Result<()> {
        let holder: Holder = toml::from_str("plain = 250\ntable = { minutes = 1, seconds = 2, milliseconds = 3 }")?;
        assert_eq!(holder.plain.to_std_duration(), Duration::from_millis(250));
        assert_eq!(holder.table.to_std_duration(), Duration::from_millis(62_003));
        Ok(())
    }
}
