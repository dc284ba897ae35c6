//! 导出脚本的变量名表
//!
//! 研究entry → 脚本变量名。名称由显示名称转换为合法标识符并去重；
//! 构造会话和每次加载时清空。脚本文本本身不在这里生成。

use crate::study::Study;
use std::collections::HashSet;

/// 把显示名称转换为标识符
fn sanitize(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() {
        ident.push_str("obj");
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

impl Study {
    /// 按遍历顺序为每个发布的实体生成唯一的变量名；返回名称个数
    pub fn build_dump_names(&mut self) -> usize {
        let named: Vec<(String, String)> = self
            .published()
            .into_iter()
            .map(|(node, _)| {
                (
                    self.tree.entry(node),
                    sanitize(self.tree.name(node).unwrap_or_default()),
                )
            })
            .collect();

        self.dump_names.clear();
        let mut used = HashSet::new();
        for (study_entry, base) in named {
            let mut candidate = base.clone();
            let mut suffix = 0;
            while !used.insert(candidate.clone()) {
                suffix += 1;
                candidate = format!("{}_{}", base, suffix);
            }
            self.dump_names.insert(study_entry, candidate);
        }
        tracing::debug!("{} dump names registered", self.dump_names.len());
        self.dump_names.len()
    }

    /// 节点的变量名
    pub fn dump_name(&self, study_entry: &str) -> Option<&str> {
        self.dump_names.get(study_entry).map(String::as_str)
    }

    /// 全部变量名，按遍历顺序
    pub fn all_dump_names(&self) -> Vec<&str> {
        self.published()
            .into_iter()
            .filter_map(|(node, _)| self.dump_name(&self.tree.entry(node)))
            .collect()
    }
}
