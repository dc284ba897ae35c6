//! 形状数据
//!
//! 保存一个几何实体的当前字节流和上一版本字节流。更早的历史只存在于
//! 冻结的死亡副本中。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShapeData {
    /// 当前形状流（BRep）
    stream: Vec<u8>,

    /// 最近一次更新之前的形状流
    old_stream: Vec<u8>,
}

impl ShapeData {
    /// 新形状的"上一版本"就是它自己
    pub fn new(stream: Vec<u8>) -> Self {
        Self {
            old_stream: stream.clone(),
            stream,
        }
    }

    /// 从持久化数据恢复，两个版本都原样保留
    pub fn restore(stream: Vec<u8>, old_stream: Vec<u8>) -> Self {
        Self { stream, old_stream }
    }

    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    pub fn old_stream(&self) -> &[u8] {
        &self.old_stream
    }

    /// 更新当前形状；流完全相同时不做任何事并返回 false
    pub fn update(&mut self, stream: Vec<u8>) -> bool {
        if self.stream == stream {
            return false;
        }
        self.old_stream = std::mem::replace(&mut self.stream, stream);
        true
    }

    /// 直接替换两个版本（归档导入）
    pub(crate) fn replace(&mut self, stream: Vec<u8>) {
        self.old_stream = stream.clone();
        self.stream = stream;
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }
}
