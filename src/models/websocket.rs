use serde::{ Serialize, Deserialize };

use crate::llm::TaskKind;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "load_model")] LoadModel {
        model: String,
        #[serde(default)]
        task: Option<TaskKind>,
    },
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "response")] Response {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "progress")] Progress {
        percent: u8,
        message: String,
    },
    #[serde(rename = "model_ready")] ModelReady {
        model: String,
        task: TaskKind,
    },
}
