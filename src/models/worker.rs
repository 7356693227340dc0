use serde::{ Serialize, Deserialize };

/// Commands the hosting page sends to the cache manager.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(rename = "GET_VERSION")]
    GetVersion,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionReply {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_commands() {
        let skip: WorkerMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(skip, WorkerMessage::SkipWaiting);
        let ver: WorkerMessage = serde_json::from_str(r#"{"type":"GET_VERSION"}"#).unwrap();
        assert_eq!(ver, WorkerMessage::GetVersion);
        assert!(serde_json::from_str::<WorkerMessage>(r#"{"type":"PUSH"}"#).is_err());
    }
}
