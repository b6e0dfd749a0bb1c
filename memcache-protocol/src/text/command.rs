use std::fmt::{Display, Formatter};

use bytes::Bytes;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl Display for StoreVerb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let verb = match self {
            StoreVerb::Set => "set",
            StoreVerb::Add => "add",
            StoreVerb::Replace => "replace",
            StoreVerb::Append => "append",
            StoreVerb::Prepend => "prepend",
            StoreVerb::Cas => "cas",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Clone)]
pub enum TextCommand {
    Get {
        keys: Vec<String>,
    },
    Gets {
        keys: Vec<String>,
    },
    Store {
        verb: StoreVerb,
        key: String,
        flags: u32,
        expiration: u32,
        data: Bytes,
        cas: u64,
    },
    Delete {
        key: String,
        time: Option<u32>,
    },
    Incr {
        key: String,
        delta: u64,
    },
    Decr {
        key: String,
        delta: u64,
    },
    FlushAll {
        delay: Option<u32>,
    },
    Stats {
        group: Option<String>,
    },
    Version,
}

impl TextCommand {
    /// The command line without its CRLF terminator.
    pub fn line(&self) -> String {
        match self {
            TextCommand::Get { keys } => format!("get {}", keys.join(" ")),
            TextCommand::Gets { keys } => format!("gets {}", keys.join(" ")),
            TextCommand::Store { verb: StoreVerb::Cas, key, flags, expiration, data, cas } => {
                format!("cas {} {} {} {} {}", key, flags, expiration, data.len(), cas)
            }
            TextCommand::Store { verb, key, flags, expiration, data, .. } => {
                format!("{} {} {} {} {}", verb, key, flags, expiration, data.len())
            }
            TextCommand::Delete { key, time: Some(time) } => format!("delete {} {}", key, time),
            TextCommand::Delete { key, time: None } => format!("delete {}", key),
            TextCommand::Incr { key, delta } => format!("incr {} {}", key, delta),
            TextCommand::Decr { key, delta } => format!("decr {} {}", key, delta),
            TextCommand::FlushAll { delay: Some(delay) } => format!("flush_all {}", delay),
            TextCommand::FlushAll { delay: None } => "flush_all".to_string(),
            TextCommand::Stats { group: Some(group) } => format!("stats {}", group),
            TextCommand::Stats { group: None } => "stats".to_string(),
            TextCommand::Version => "version".to_string(),
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            TextCommand::Store { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::text::command::{StoreVerb, TextCommand};

    #[test]
    fn test_command_lines() {
        let get = TextCommand::Gets { keys: vec!["a".to_string(), "b".to_string()] };
        assert_eq!(get.line(), "gets a b");
        let set = TextCommand::Store {
            verb: StoreVerb::Set,
            key: "k".to_string(),
            flags: 3,
            expiration: 60,
            data: Bytes::from_static(b"hello"),
            cas: 0,
        };
        assert_eq!(set.line(), "set k 3 60 5");
        let cas = TextCommand::Store {
            verb: StoreVerb::Cas,
            key: "k".to_string(),
            flags: 0,
            expiration: 0,
            data: Bytes::from_static(b"v"),
            cas: 77,
        };
        assert_eq!(cas.line(), "cas k 0 0 1 77");
        assert_eq!(TextCommand::Delete { key: "k".to_string(), time: Some(5) }.line(), "delete k 5");
        assert_eq!(TextCommand::FlushAll { delay: None }.line(), "flush_all");
        assert_eq!(TextCommand::Stats { group: Some("slabs".to_string()) }.line(), "stats slabs");
    }
}
