//! 研究树结构约定
//!
//! 发布实体的子节点标签（tag）分配规则。修改这里的任何值都会破坏
//! 已保存研究的兼容性。

/// 活动（"红色"）引用子节点的标签
pub const REFERENCE_TAG: u32 = 1;

/// 历史容器的哨兵标签，不能分配给普通子节点
pub const HISTORY_TAG: u32 = 2;

/// 普通组/场/子形状的第一个可用标签
pub const FIRST_CHILD_TAG: u32 = 3;

/// 死亡实体 entry 的前缀
pub const DEAD_PREFIX: &str = "dead";

/// 组实体 entry 的前缀
pub const GROUP_PREFIX: &str = "group";

/// 场实体 entry 的前缀
pub const FIELD_PREFIX: &str = "field";

/// 判断标签是否被保留
pub fn is_reserved_tag(tag: u32) -> bool {
    tag < FIRST_CHILD_TAG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_tags() {
        assert!(is_reserved_tag(REFERENCE_TAG));
        assert!(is_reserved_tag(HISTORY_TAG));
        assert!(!is_reserved_tag(FIRST_CHILD_TAG));
    }
}
