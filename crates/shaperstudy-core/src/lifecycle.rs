//! 形状生命周期：冻结（MakeDead）与断链（BreakLink）
//!
//! 活形状被冻结为历史快照时，快照挂在原节点的历史容器下，
//! 原来指向活形状及其组/场的活动引用被改写为指向快照。

use crate::entity::{Entity, Entry};
use crate::error::{StudyError, StudyResult};
use crate::schema::HISTORY_TAG;
use crate::shape::ShapeData;
use crate::study::Study;
use crate::tree::NodeId;
use crate::walker::TreeWalker;

/// 依赖形状几何的外部对象（如网格）
///
/// 断链后会收到新的死亡形状，用它替换自己的工作几何。
pub trait ShapeConsumer {
    fn replace_shape(&mut self, dead: &Entity);
}

impl Study {
    /// 为活实体创建死亡副本，连同它直接发布的组和场
    ///
    /// 返回死亡形状的 entry 和树节点。
    pub fn make_dead(&mut self, entry: &Entry) -> StudyResult<(Entry, NodeId)> {
        let original = self.entity_or_err(entry)?;
        if !original.kind().is_shape() || original.is_dead() {
            return Err(StudyError::WrongKind {
                entry: entry.to_string(),
                expected: "live shape",
            });
        }
        let node = original
            .node()
            .ok_or_else(|| StudyError::NotPublished(entry.to_string()))?;
        let old_stream = original
            .shape()
            .map(|data| data.old_stream().to_vec())
            .unwrap_or_default();
        let dead_tick = if original.tick() > self.config.dead_tick_threshold {
            original.tick() - 1
        } else {
            1
        };
        let subs: Vec<(Entity, String)> = self
            .tree
            .children(node)
            .filter_map(|child| self.entity_at(child).map(|e| (child, e)))
            .filter(|(_, e)| e.kind().is_group_like())
            .map(|(child, e)| {
                let name = self.tree.name(child).unwrap_or_default().to_string();
                (e.clone(), name)
            })
            .collect();

        // 先确定代数并检查所有副本 entry，确认无冲突后才修改树
        let generation = self
            .tree
            .find_sub_object(node, HISTORY_TAG)
            .map(|history| self.tree.next_tag(history))
            .unwrap_or(1);
        let dead_entry = Entry::dead(generation, entry);
        let taken = std::iter::once(dead_entry.clone())
            .chain(subs.iter().map(|(sub, _)| Entry::dead(generation, sub.entry())))
            .find(|copy| self.registry.contains(copy));
        if let Some(copy) = taken {
            return Err(StudyError::DuplicateEntry(copy.to_string()));
        }

        let history = self.tree.new_object_to_tag(node, HISTORY_TAG);
        self.tree.set_name(history, self.config.history_name.clone());
        let dead_node = self.tree.new_object_to_tag(history, generation);

        let dead = Entity::new_shape(dead_entry.clone(), ShapeData::new(old_stream))
            .with_tick(dead_tick);
        self.registry.register(dead)?;
        let name = format!(
            "{} ({})",
            self.tree.name(node).unwrap_or_default(),
            generation
        );
        self.bind_node(&dead_entry, dead_node, &name)?;

        for (sub, name) in subs {
            let sub_entry = Entry::dead(generation, sub.entry());
            let copy = match (sub.field(), sub.selection()) {
                (Some(field), _) => Entity::new_field(sub_entry.clone(), field.clone()),
                (None, Some(selection)) => Entity::new_group(sub_entry.clone(), selection.clone()),
                (None, None) => continue,
            };
            self.registry.register(copy.with_tick(dead_tick))?;
            self.add_in_study(&sub_entry, &name, Some(&dead_entry))?;
        }

        tracing::info!(
            "Shape {} frozen as {} at {}",
            entry,
            dead_entry,
            self.tree.entry(dead_node)
        );
        Ok((dead_entry, dead_node))
    }

    /// 断开节点与活形状的联系，改为引用它的死亡快照
    ///
    /// 节点不存在、没有活动引用、目标没有发布实体或已经死亡时什么都不做，返回 `Ok(None)`。
    pub fn break_link(&mut self, tree_entry: &str) -> StudyResult<Option<Entry>> {
        let Some(trigger) = self.tree.find_object_id(tree_entry) else {
            tracing::debug!("BreakLink: no node at {}", tree_entry);
            return Ok(None);
        };
        let Some(reference) = self.tree.referenced_object(trigger).filter(|r| r.active) else {
            tracing::debug!("BreakLink: {} holds no active reference", tree_entry);
            return Ok(None);
        };
        let target = reference.target;
        let Some(original) = self.entity_at(target) else {
            tracing::debug!("BreakLink: nothing published at {}", self.tree.entry(target));
            return Ok(None);
        };
        if original.is_dead() || !original.kind().is_shape() {
            tracing::debug!("BreakLink: {} is not a live shape", original.entry());
            return Ok(None);
        }
        let original_entry = original.entry().clone();

        let (dead_entry, dead_node) = self.make_dead(&original_entry)?;
        self.tree.add_reference(trigger, dead_node, true);

        let owner = self.tree.parent(trigger).unwrap_or(trigger);
        self.reroute_sub_references(owner, trigger, target, dead_node);

        if let Some(dead) = self.registry.resolve(&dead_entry) {
            for key in [owner, trigger] {
                if let Some(consumer) = self.consumers.get_mut(&key) {
                    consumer.replace_shape(dead);
                    break;
                }
            }
        }

        tracing::info!("Link {} -> {} broken", tree_entry, original_entry);
        Ok(Some(dead_entry))
    }

    /// 把 `owner` 子树里指向原形状组/场的活动引用改为指向死亡副本中相同位置的组/场
    fn reroute_sub_references(
        &mut self,
        owner: NodeId,
        trigger: NodeId,
        original: NodeId,
        dead: NodeId,
    ) {
        let live_subs = self.group_like_children(original);
        let dead_subs = self.group_like_children(dead);

        let redirects: Vec<(NodeId, NodeId)> = TreeWalker::new(&self.tree, owner)
            .filter(|&node| node != trigger)
            .filter_map(|node| {
                let reference = self.tree.referenced_object(node)?;
                if !reference.active {
                    return None;
                }
                let target = self.entity_at(reference.target)?;
                if target.is_dead() {
                    return None;
                }
                let position = live_subs.iter().position(|&n| n == reference.target)?;
                dead_subs.get(position).map(|&to| (node, to))
            })
            .collect();

        for (from, to) in redirects {
            tracing::debug!(
                "Reference {} rerouted to {}",
                self.tree.entry(from),
                self.tree.entry(to)
            );
            self.tree.add_reference(from, to, true);
        }
    }

    /// 发布了组/场的直接子节点；结构性子节点（引用、历史、子形状）不计入位置
    fn group_like_children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .children(node)
            .filter(|&child| {
                self.entity_at(child)
                    .is_some_and(|entity| entity.kind().is_group_like())
            })
            .collect()
    }
}
