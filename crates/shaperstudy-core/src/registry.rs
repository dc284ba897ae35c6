//! 实体注册表
//!
//! entry → 实体 的内存索引，另带 对象引用 → entry 的反查。每次加载前清空重建；
//! 本身不持久化，持久化通过字节流里嵌入的 entry 完成。

use crate::entity::{Entity, Entry, ObjectRef};
use crate::error::{StudyError, StudyResult};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<Entry, Entity>,
    by_ref: HashMap<ObjectRef, Entry>,

    /// 自动分配 entry 的计数器（按前缀）
    counters: HashMap<&'static str, u64>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册实体；entry 已存在时报错（entry 永不复用）
    pub fn register(&mut self, entity: Entity) -> StudyResult<&mut Entity> {
        let entry = entity.entry().clone();
        if self.entities.contains_key(&entry) {
            return Err(StudyError::DuplicateEntry(entry.to_string()));
        }
        self.by_ref.insert(entity.object_ref().clone(), entry.clone());
        Ok(self.entities.entry(entry).or_insert(entity))
    }

    /// 未知 entry 返回 None，调用方把它当作"无事可做"
    pub fn resolve(&self, entry: &Entry) -> Option<&Entity> {
        self.entities.get(entry)
    }

    pub fn resolve_mut(&mut self, entry: &Entry) -> Option<&mut Entity> {
        self.entities.get_mut(entry)
    }

    pub fn resolve_ref(&self, object_ref: &ObjectRef) -> Option<&Entity> {
        self.by_ref
            .get(object_ref)
            .and_then(|entry| self.entities.get(entry))
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.entities.contains_key(entry)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_ref.clear();
        self.counters.clear();
    }

    /// 分配一个未使用的 `<prefix><N>` entry
    pub fn allocate(&mut self, prefix: &'static str) -> Entry {
        loop {
            let counter = self.counters.entry(prefix).or_insert(0);
            *counter += 1;
            let text = format!("{}{}", prefix, counter);
            if let Ok(entry) = Entry::new(text) {
                if !self.entities.contains_key(&entry) {
                    return entry;
                }
            }
        }
    }
}
