//! SHAPERSTUDY 核心引擎
//!
//! 把外部参数化建模器产生的形状发布到研究树中，并维护父子引用图，
//! 使依赖对象（网格、组、场）能够跨越修改、失效（"死亡"）和替换来追踪形状。
//!
//! # 架构设计
//!
//! - `ShapeData`: 形状的当前/上一版本字节流
//! - `Entity`: 带标识（entry）、修改计数（tick）的形状/组/场
//! - `EntityRegistry`: entry → 实体 的索引
//! - `StudyTree`: 宿主研究树（仅追加）
//! - `Study`: 会话上下文，提供发布、断链（BreakLink）和各类操作
//!
//! # 示例
//!
//! ```rust
//! use shaperstudy_core::prelude::*;
//!
//! let mut study = Study::new(ListingKernel::new());
//! let entry = Entry::new("0:1:1").unwrap();
//! let node = study
//!     .publish_shape(&entry, "Box_1_1", b"SOLID s1".to_vec(), None)
//!     .unwrap();
//! assert_eq!(study.tree().name(node), Some("Box_1_1"));
//! ```

pub mod archive;
pub mod config;
pub mod dump;
pub mod entity;
pub mod error;
pub mod kernel;
pub mod lifecycle;
pub mod listing;
pub mod operations;
pub mod registry;
pub mod schema;
pub mod shape;
pub mod study;
pub mod tree;
pub mod walker;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::archive::{Archive, ArchiveField, ArchiveGroup};
    pub use crate::config::StudyConfig;
    pub use crate::entity::{
        Entity, EntityBody, EntityKind, Entry, FieldData, FieldStep, ObjectRef, SelectionData,
        StepValues, ValueKind,
    };
    pub use crate::error::{StudyError, StudyResult};
    pub use crate::kernel::{GeometryKernel, ShapeType, SubShape};
    pub use crate::lifecycle::ShapeConsumer;
    pub use crate::listing::ListingKernel;
    pub use crate::operations::{
        FieldOperations, GroupOperations, MeasureOperations, OperationStatus, ShapeArg,
        ShapesOperations,
    };
    pub use crate::registry::EntityRegistry;
    pub use crate::shape::ShapeData;
    pub use crate::study::Study;
    pub use crate::tree::{NodeId, Reference, StudyTree};
    pub use crate::walker::TreeWalker;
}
