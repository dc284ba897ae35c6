//! 文件操作错误定义

use shaperstudy_core::error::StudyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Shape stream of {0} contains the record delimiter")]
    DelimiterInStream(String),

    #[error("Text {text:?} of {entry} contains a reserved escape token")]
    ReservedToken { entry: String, text: String },

    #[error("Study error: {0}")]
    Study(#[from] StudyError),
}
