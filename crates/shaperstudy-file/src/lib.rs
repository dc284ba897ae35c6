//! SHAPERSTUDY 文件格式处理
//!
//! 支持：
//! - 组件字节流（`|` 分隔的记录，研究保存/加载的文件级约定）
//! - `.shst` 压缩容器（MessagePack + Zstd，带文件头和元数据）
//! - 形状归档（JSON）

pub mod archive;
pub mod codec;
pub mod error;
pub mod native;

pub use error::FileError;
pub use native::StudyMetadata;
