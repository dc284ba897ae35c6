//! 核心错误定义

use crate::kernel::ShapeType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Entity not found: {0}")]
    UnknownEntry(String),

    #[error("Tree node not found: {0}")]
    UnknownNode(String),

    #[error("Tree node is owned by the study engine: {0}")]
    ReservedNode(String),

    #[error("Entry already registered: {0}")]
    DuplicateEntry(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Entity is not published in the study: {0}")]
    NotPublished(String),

    #[error("Entity is already published: {0}")]
    AlreadyPublished(String),

    #[error("Entity {entry} is not a {expected}")]
    WrongKind { entry: String, expected: &'static str },

    #[error("Unsupported selection type: {0:?}")]
    UnsupportedSelectionType(ShapeType),

    #[error("Sub-shape of type {found:?} can not be added to a group of {expected:?}")]
    MismatchedSubShape { expected: ShapeType, found: ShapeType },

    #[error("Sub-shape is not found in the main shape")]
    SubShapeNotFound,

    #[error("Invalid field step: {0}")]
    InvalidFieldStep(String),

    #[error("Archive does not contain a shape")]
    MissingArchiveShape,

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type StudyResult<T> = Result<T, StudyError>;
