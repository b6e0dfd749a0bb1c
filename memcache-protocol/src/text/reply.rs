/// A single reply line from a text protocol server, classified.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TextReply {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    End,
    Ok,
    Error,
    ClientError(String),
    ServerError(String),
    Stat { name: String, value: String },
    Version(String),
    Number(u64),
    Unknown(String),
}

impl TextReply {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line {
            "STORED" => TextReply::Stored,
            "NOT_STORED" => TextReply::NotStored,
            "EXISTS" => TextReply::Exists,
            "NOT_FOUND" => TextReply::NotFound,
            "DELETED" => TextReply::Deleted,
            "END" => TextReply::End,
            "OK" => TextReply::Ok,
            "ERROR" => TextReply::Error,
            _ => {
                if let Some(message) = line.strip_prefix("CLIENT_ERROR") {
                    TextReply::ClientError(message.trim().to_string())
                } else if let Some(message) = line.strip_prefix("SERVER_ERROR") {
                    TextReply::ServerError(message.trim().to_string())
                } else if let Some(version) = line.strip_prefix("VERSION ") {
                    TextReply::Version(version.trim().to_string())
                } else if let Some(stat) = line.strip_prefix("STAT ") {
                    match stat.split_once(' ') {
                        Some((name, value)) => TextReply::Stat {
                            name: name.to_string(),
                            value: value.to_string(),
                        },
                        None => TextReply::Stat {
                            name: stat.to_string(),
                            value: String::new(),
                        },
                    }
                } else if let Ok(number) = line.trim().parse::<u64>() {
                    TextReply::Number(number)
                } else {
                    TextReply::Unknown(line.to_string())
                }
            }
        }
    }
}
