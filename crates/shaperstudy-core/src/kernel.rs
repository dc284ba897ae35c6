//! 几何内核接口
//!
//! 本引擎不做任何几何计算：形状以不透明的字节流（BRep格式）传递，
//! 所有拓扑、距离、容差查询都委托给实现了 [`GeometryKernel`] 的内核。

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// 拓扑形状类型
///
/// 数值与持久化格式中的整数一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShapeType {
    Compound = 0,
    CompSolid = 1,
    Solid = 2,
    Shell = 3,
    Face = 4,
    Wire = 5,
    Edge = 6,
    Vertex = 7,
    Shape = 8,
    /// 展平的复合体成员
    Flat = 9,
}

impl ShapeType {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => ShapeType::Compound,
            1 => ShapeType::CompSolid,
            2 => ShapeType::Solid,
            3 => ShapeType::Shell,
            4 => ShapeType::Face,
            5 => ShapeType::Wire,
            6 => ShapeType::Edge,
            7 => ShapeType::Vertex,
            8 => ShapeType::Shape,
            9 => ShapeType::Flat,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// 大写类型名（用于子形状命名和文本格式）
    pub fn name(self) -> &'static str {
        match self {
            ShapeType::Compound => "COMPOUND",
            ShapeType::CompSolid => "COMPSOLID",
            ShapeType::Solid => "SOLID",
            ShapeType::Shell => "SHELL",
            ShapeType::Face => "FACE",
            ShapeType::Wire => "WIRE",
            ShapeType::Edge => "EDGE",
            ShapeType::Vertex => "VERTEX",
            ShapeType::Shape => "SHAPE",
            ShapeType::Flat => "FLAT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "COMPOUND" => ShapeType::Compound,
            "COMPSOLID" => ShapeType::CompSolid,
            "SOLID" => ShapeType::Solid,
            "SHELL" => ShapeType::Shell,
            "FACE" => ShapeType::Face,
            "WIRE" => ShapeType::Wire,
            "EDGE" => ShapeType::Edge,
            "VERTEX" => ShapeType::Vertex,
            "SHAPE" => ShapeType::Shape,
            "FLAT" => ShapeType::Flat,
            _ => return None,
        })
    }

    /// 场所在形状的维度：0 顶点，1 边，2 面，3 体，-1 整个形状
    pub fn dimension(self) -> i32 {
        match self {
            ShapeType::Vertex => 0,
            ShapeType::Edge => 1,
            ShapeType::Face => 2,
            ShapeType::Solid => 3,
            _ => -1,
        }
    }

    /// 组允许选择的子形状类型
    pub fn is_group_selectable(self) -> bool {
        matches!(
            self,
            ShapeType::Vertex | ShapeType::Edge | ShapeType::Face | ShapeType::Solid
        )
    }
}

/// 未发布的子形状（内核查询的结果）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubShape {
    pub shape_type: ShapeType,
    pub stream: Vec<u8>,
}

impl SubShape {
    pub fn new(shape_type: ShapeType, stream: Vec<u8>) -> Self {
        Self { shape_type, stream }
    }
}

/// 几何内核
///
/// 索引约定与 BRep 内核一致：主形状的全部子形状（包括主形状本身）按
/// 拓扑遍历顺序从1开始编号；0 表示"不存在"。
pub trait GeometryKernel {
    /// 形状的拓扑类型，空流返回 [`ShapeType::Shape`]
    fn shape_type(&self, stream: &[u8]) -> ShapeType;

    /// 由主形状和子形状索引列表构造组的形状
    fn group_shape(&self, main: &[u8], indices: &[i64]) -> Vec<u8>;

    /// 按全局索引取子形状
    fn sub_shape(&self, main: &[u8], index: i64) -> Option<SubShape>;

    /// 子形状在主形状中的全局索引
    fn sub_shape_index(&self, main: &[u8], sub: &[u8]) -> Option<i64>;

    /// 子形状在同类型子形状中的索引
    fn topology_index(&self, main: &[u8], sub: &[u8]) -> Option<i64>;

    /// 给定类型的所有子形状的全局索引；`sorted` 时按重心坐标排序
    fn all_sub_shape_ids(&self, main: &[u8], shape_type: ShapeType, sorted: bool) -> Vec<i64>;

    /// 给定类型的所有子形状
    fn extract_sub_shapes(&self, main: &[u8], shape_type: ShapeType, sorted: bool)
        -> Vec<SubShape>;

    /// 两个形状共享的给定类型的子形状
    fn shared_shapes(&self, first: &[u8], second: &[u8], shape_type: ShapeType) -> Vec<SubShape>;

    /// 顶点坐标
    fn point_coordinates(&self, vertex: &[u8]) -> Option<Point3<f64>>;

    /// 两个顶点间的最小距离
    fn min_distance(&self, first: &[u8], second: &[u8]) -> Option<f64>;

    /// 给定类型的子形状数量
    fn count(&self, shape: &[u8], shape_type: ShapeType) -> usize;

    /// 顶点容差
    fn tolerance(&self, vertex: &[u8]) -> Option<f64>;

    /// 边的第一个（index == 0）或最后一个顶点
    fn vertex_by_index(&self, edge: &[u8], index: usize, use_orientation: bool)
        -> Option<SubShape>;
}
