//! 研究会话配置

use crate::error::StudyResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// 组件数据类型（在研究树中查找组件根节点）
    pub component_type: String,

    /// 组件根节点的显示名称
    pub component_name: String,

    /// 组件根节点的图标
    pub component_pixmap: String,

    /// 历史容器的显示名称
    pub history_name: String,

    /// 死亡副本tick调整的阈值：原形状tick大于此值时，副本tick = 原tick - 1
    pub dead_tick_threshold: u32,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            component_type: "SHAPERSTUDY".to_string(),
            component_name: "ShaperResults".to_string(),
            component_pixmap: "shaper.png".to_string(),
            history_name: "History".to_string(),
            dead_tick_threshold: 2,
        }
    }
}

impl StudyConfig {
    /// 从JSON文本加载配置，缺失的字段取默认值
    pub fn from_json(text: &str) -> StudyResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> StudyResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
