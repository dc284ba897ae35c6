//! 文本拓扑清单内核
//!
//! 一个不依赖 BRep 库的参考内核，用于测试和离线工具。形状流是UTF-8文本，
//! 每行描述一个子形状，行的顺序就是全局索引顺序（第一行是主形状本身）：
//!
//! ```text
//! FACE f1 > w1
//! WIRE w1 > e1 e2
//! EDGE e1 > v1 v2
//! VERTEX v1 0 0 0
//! VERTEX v2 10 0 0 0.001
//! ```
//!
//! 标签后面可以跟坐标 `x y z` 和可选的容差，`reversed` 表示反向的边，
//! `>` 之后是直接子形状的标签。

use crate::kernel::{GeometryKernel, ShapeType, SubShape};
use nalgebra::Point3;
use std::collections::{HashMap, HashSet};

/// 顶点的默认容差
const DEFAULT_TOLERANCE: f64 = 1e-7;

#[derive(Debug, Clone)]
struct Record {
    shape_type: ShapeType,
    label: String,
    point: Option<Point3<f64>>,
    tolerance: Option<f64>,
    reversed: bool,
    children: Vec<String>,
    line: String,
}

impl Record {
    fn parse(line: &str) -> Option<Self> {
        let (head, tail) = match line.split_once('>') {
            Some((head, tail)) => (head, Some(tail)),
            None => (line, None),
        };
        let mut tokens = head.split_whitespace();
        let shape_type = ShapeType::from_name(tokens.next()?)?;
        let label = tokens.next()?.to_string();

        let mut numbers = Vec::new();
        let mut reversed = false;
        for token in tokens {
            if token == "reversed" {
                reversed = true;
            } else if let Ok(value) = token.parse::<f64>() {
                numbers.push(value);
            }
        }
        let point = (numbers.len() >= 3).then(|| Point3::new(numbers[0], numbers[1], numbers[2]));
        let tolerance = numbers.get(3).copied();
        let children = tail
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Some(Self {
            shape_type,
            label,
            point,
            tolerance,
            reversed,
            children,
            line: line.trim().to_string(),
        })
    }
}

/// 解析后的清单
#[derive(Debug, Default)]
struct Listing {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl Listing {
    fn parse(stream: &[u8]) -> Self {
        let mut listing = Listing::default();
        let text = String::from_utf8_lossy(stream);
        for record in text.lines().filter_map(Record::parse) {
            if listing.positions.contains_key(&record.label) {
                continue;
            }
            listing
                .positions
                .insert(record.label.clone(), listing.records.len());
            listing.records.push(record);
        }
        listing
    }

    fn main(&self) -> Option<&Record> {
        self.records.first()
    }

    fn get(&self, label: &str) -> Option<&Record> {
        self.positions.get(label).map(|&pos| &self.records[pos])
    }

    /// 记录本身及其所有后代的标签
    fn closure(&self, roots: &[&str]) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<String> = roots.iter().map(|s| s.to_string()).collect();
        while let Some(label) = stack.pop() {
            if !seen.insert(label.clone()) {
                continue;
            }
            if let Some(record) = self.get(&label) {
                stack.extend(record.children.iter().cloned());
            }
        }
        seen
    }

    /// 按本清单的顺序输出一组记录
    fn write(&self, header: Option<String>, labels: &HashSet<String>) -> Vec<u8> {
        let mut lines: Vec<String> = header.into_iter().collect();
        lines.extend(
            self.records
                .iter()
                .filter(|r| labels.contains(&r.label))
                .map(|r| r.line.clone()),
        );
        lines.join("\n").into_bytes()
    }

    fn sub_stream(&self, position: usize) -> SubShape {
        let record = &self.records[position];
        let labels = self.closure(&[record.label.as_str()]);
        let mut ordered: Vec<String> = vec![record.line.clone()];
        ordered.extend(
            self.records
                .iter()
                .filter(|r| r.label != record.label && labels.contains(&r.label))
                .map(|r| r.line.clone()),
        );
        SubShape::new(record.shape_type, ordered.join("\n").into_bytes())
    }

    /// 顶点后代的重心，用于排序
    fn centroid(&self, position: usize) -> (f64, usize) {
        let record = &self.records[position];
        let labels = self.closure(&[record.label.as_str()]);
        let points: Vec<Point3<f64>> = self
            .records
            .iter()
            .filter(|r| labels.contains(&r.label))
            .filter_map(|r| r.point)
            .collect();
        if points.is_empty() {
            return (0.0, 0);
        }
        let n = points.len() as f64;
        let (x, y, z) = points
            .iter()
            .fold((0.0, 0.0, 0.0), |acc, p| (acc.0 + p.x, acc.1 + p.y, acc.2 + p.z));
        ((x / n) * 999.0 + (y / n) * 99.0 + (z / n) * 0.9, points.len())
    }

    fn positions_of(&self, shape_type: ShapeType) -> Vec<usize> {
        let Some(main) = self.main() else {
            return Vec::new();
        };
        let explode_compound = main.shape_type == ShapeType::Compound
            && matches!(
                shape_type,
                ShapeType::Shape | ShapeType::Flat | ShapeType::Compound
            );
        if !explode_compound {
            return (0..self.records.len())
                .filter(|&pos| self.records[pos].shape_type == shape_type)
                .collect();
        }

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        for child in &main.children {
            self.collect_members(child, shape_type, &mut seen, &mut result);
        }
        result
    }

    fn collect_members(
        &self,
        label: &str,
        shape_type: ShapeType,
        seen: &mut HashSet<String>,
        result: &mut Vec<usize>,
    ) {
        if !seen.insert(label.to_string()) {
            return;
        }
        let Some(&pos) = self.positions.get(label) else {
            return;
        };
        let record = &self.records[pos];
        match shape_type {
            ShapeType::Flat if record.shape_type == ShapeType::Compound => {
                for child in &record.children {
                    self.collect_members(child, shape_type, seen, result);
                }
            }
            ShapeType::Flat | ShapeType::Shape => result.push(pos),
            _ if record.shape_type == shape_type => result.push(pos),
            _ => {}
        }
    }
}

/// 基于文本清单的几何内核
#[derive(Debug, Clone, Default)]
pub struct ListingKernel;

impl ListingKernel {
    pub fn new() -> Self {
        Self
    }

    fn sorted_positions(&self, listing: &Listing, shape_type: ShapeType, sorted: bool) -> Vec<usize> {
        let mut positions = listing.positions_of(shape_type);
        if sorted {
            let mut keyed: Vec<(usize, (f64, usize))> = positions
                .iter()
                .map(|&pos| (pos, listing.centroid(pos)))
                .collect();
            keyed.sort_by(|a, b| {
                a.1 .0
                    .partial_cmp(&b.1 .0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1 .1.cmp(&b.1 .1))
            });
            positions = keyed.into_iter().map(|(pos, _)| pos).collect();
        }
        positions
    }
}

impl GeometryKernel for ListingKernel {
    fn shape_type(&self, stream: &[u8]) -> ShapeType {
        Listing::parse(stream)
            .main()
            .map(|r| r.shape_type)
            .unwrap_or(ShapeType::Shape)
    }

    fn group_shape(&self, main: &[u8], indices: &[i64]) -> Vec<u8> {
        let listing = Listing::parse(main);
        let roots: Vec<&str> = indices
            .iter()
            .filter(|&&i| i >= 1 && (i as usize) <= listing.records.len())
            .map(|&i| listing.records[i as usize - 1].label.as_str())
            .collect();
        let labels = listing.closure(&roots);
        let name = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("_");
        let header = format!("COMPOUND group_{} > {}", name, roots.join(" "));
        listing.write(Some(header), &labels)
    }

    fn sub_shape(&self, main: &[u8], index: i64) -> Option<SubShape> {
        let listing = Listing::parse(main);
        if index < 1 || index as usize > listing.records.len() {
            return None;
        }
        Some(listing.sub_stream(index as usize - 1))
    }

    fn sub_shape_index(&self, main: &[u8], sub: &[u8]) -> Option<i64> {
        let sub_listing = Listing::parse(sub);
        let label = &sub_listing.main()?.label;
        Listing::parse(main)
            .positions
            .get(label)
            .map(|&pos| pos as i64 + 1)
    }

    fn topology_index(&self, main: &[u8], sub: &[u8]) -> Option<i64> {
        let sub_listing = Listing::parse(sub);
        let sub_main = sub_listing.main()?;
        let listing = Listing::parse(main);
        listing
            .records
            .iter()
            .filter(|r| r.shape_type == sub_main.shape_type)
            .position(|r| r.label == sub_main.label)
            .map(|pos| pos as i64 + 1)
    }

    fn all_sub_shape_ids(&self, main: &[u8], shape_type: ShapeType, sorted: bool) -> Vec<i64> {
        let listing = Listing::parse(main);
        self.sorted_positions(&listing, shape_type, sorted)
            .into_iter()
            .map(|pos| pos as i64 + 1)
            .collect()
    }

    fn extract_sub_shapes(
        &self,
        main: &[u8],
        shape_type: ShapeType,
        sorted: bool,
    ) -> Vec<SubShape> {
        let listing = Listing::parse(main);
        self.sorted_positions(&listing, shape_type, sorted)
            .into_iter()
            .map(|pos| listing.sub_stream(pos))
            .collect()
    }

    fn shared_shapes(&self, first: &[u8], second: &[u8], shape_type: ShapeType) -> Vec<SubShape> {
        let first = Listing::parse(first);
        let second = Listing::parse(second);
        second
            .records
            .iter()
            .filter(|r| r.shape_type == shape_type)
            .filter_map(|r| first.positions.get(&r.label).copied())
            .map(|pos| first.sub_stream(pos))
            .collect()
    }

    fn point_coordinates(&self, vertex: &[u8]) -> Option<Point3<f64>> {
        let listing = Listing::parse(vertex);
        let record = listing.main()?;
        if record.shape_type != ShapeType::Vertex {
            return None;
        }
        record.point
    }

    fn min_distance(&self, first: &[u8], second: &[u8]) -> Option<f64> {
        let a = self.point_coordinates(first)?;
        let b = self.point_coordinates(second)?;
        Some(nalgebra::distance(&a, &b))
    }

    fn count(&self, shape: &[u8], shape_type: ShapeType) -> usize {
        Listing::parse(shape)
            .records
            .iter()
            .filter(|r| r.shape_type == shape_type)
            .count()
    }

    fn tolerance(&self, vertex: &[u8]) -> Option<f64> {
        let listing = Listing::parse(vertex);
        let record = listing.main()?;
        if record.shape_type != ShapeType::Vertex {
            return None;
        }
        Some(record.tolerance.unwrap_or(DEFAULT_TOLERANCE))
    }

    fn vertex_by_index(
        &self,
        edge: &[u8],
        index: usize,
        use_orientation: bool,
    ) -> Option<SubShape> {
        let listing = Listing::parse(edge);
        let record = listing.main()?;
        if record.shape_type != ShapeType::Edge {
            return None;
        }
        let vertices: Vec<&String> = record
            .children
            .iter()
            .filter(|label| {
                listing
                    .get(label)
                    .is_some_and(|r| r.shape_type == ShapeType::Vertex)
            })
            .collect();
        let first_wanted = (index == 0) != (use_orientation && record.reversed);
        let label = if first_wanted {
            vertices.first()?
        } else {
            vertices.last()?
        };
        listing.positions.get(*label).map(|&pos| listing.sub_stream(pos))
    }
}

/// 常用的示例形状
pub mod samples {
    /// 10x10 的正方形面：1 面、1 线框、4 边、4 顶点
    pub const SQUARE_FACE: &str = "FACE f1 > w1
WIRE w1 > e1 e2 e3 e4
EDGE e1 > v1 v2
VERTEX v1 0 0 0
VERTEX v2 10 0 0
EDGE e2 > v2 v3
VERTEX v3 10 10 0
EDGE e3 > v3 v4
VERTEX v4 0 10 0 0.001
EDGE e4 reversed > v4 v1";

    /// 只有两个面的简化实体
    pub const BOX_SOLID: &str = "SOLID box > sh
SHELL sh > top bottom
FACE top
FACE bottom";

    /// 同一实体的另一个版本（顶面被重建）
    pub const BOX_SOLID_V2: &str = "SOLID box > sh
SHELL sh > top2 bottom
FACE top2
FACE bottom";

    /// 第三个版本
    pub const BOX_SOLID_V3: &str = "SOLID box > sh
SHELL sh > top3 bottom
FACE top3
FACE bottom";
}

#[cfg(test)]
mod tests {
    use super::samples::SQUARE_FACE as SQUARE;
    use super::*;

    #[test]
    fn test_indices_follow_topology_order() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        assert_eq!(kernel.shape_type(face), ShapeType::Face);

        let vertices = kernel.extract_sub_shapes(face, ShapeType::Vertex, false);
        assert_eq!(vertices.len(), 4);
        assert_eq!(kernel.sub_shape_index(face, &vertices[0].stream), Some(4));

        let wire = kernel.sub_shape(face, 2).unwrap();
        assert_eq!(wire.shape_type, ShapeType::Wire);
        assert!(kernel.sub_shape(face, 0).is_none());
        assert!(kernel.sub_shape(face, 11).is_none());
    }

    #[test]
    fn test_measures() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        let vertices = kernel.extract_sub_shapes(face, ShapeType::Vertex, false);

        let d = kernel.min_distance(&vertices[0].stream, &vertices[1].stream);
        assert_eq!(d, Some(10.0));
        assert_eq!(kernel.tolerance(&vertices[3].stream), Some(0.001));
        assert_eq!(kernel.tolerance(&vertices[0].stream), Some(DEFAULT_TOLERANCE));
        assert_eq!(kernel.count(face, ShapeType::Edge), 4);
        assert_eq!(kernel.count(face, ShapeType::Face), 1);

        let p = kernel.point_coordinates(&vertices[2].stream).unwrap();
        assert_eq!(p, Point3::new(10.0, 10.0, 0.0));
    }

    #[test]
    fn test_vertex_by_index_respects_orientation() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        let edges = kernel.extract_sub_shapes(face, ShapeType::Edge, false);
        let last = &edges[3].stream;

        let first = kernel.vertex_by_index(last, 0, false).unwrap();
        assert_eq!(kernel.sub_shape_index(face, &first.stream), Some(9));
        let oriented = kernel.vertex_by_index(last, 0, true).unwrap();
        assert_eq!(kernel.sub_shape_index(face, &oriented.stream), Some(4));
    }

    #[test]
    fn test_group_shape_contains_selection() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        let group = kernel.group_shape(face, &[3, 6]);
        assert_eq!(kernel.shape_type(&group), ShapeType::Compound);
        assert_eq!(kernel.count(&group, ShapeType::Edge), 2);
        assert_eq!(kernel.count(&group, ShapeType::Vertex), 3);
    }

    #[test]
    fn test_sorted_ids() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        // v1(0,0) < v4(0,10) < v2(10,0) < v3(10,10)
        let ids = kernel.all_sub_shape_ids(face, ShapeType::Vertex, true);
        assert_eq!(ids, vec![4, 9, 5, 7]);
        let unsorted = kernel.all_sub_shape_ids(face, ShapeType::Vertex, false);
        assert_eq!(unsorted, vec![4, 5, 7, 9]);
    }

    #[test]
    fn test_shared_and_topology_index() {
        let kernel = ListingKernel::new();
        let face = SQUARE.as_bytes();
        let edges = kernel.extract_sub_shapes(face, ShapeType::Edge, false);
        let shared = kernel.shared_shapes(&edges[0].stream, &edges[1].stream, ShapeType::Vertex);
        assert_eq!(shared.len(), 1);
        assert_eq!(kernel.sub_shape_index(face, &shared[0].stream), Some(5));
        assert_eq!(kernel.topology_index(face, &edges[2].stream), Some(3));
    }

    #[test]
    fn test_empty_stream() {
        let kernel = ListingKernel::new();
        assert_eq!(kernel.shape_type(b""), ShapeType::Shape);
        assert!(kernel.extract_sub_shapes(b"", ShapeType::Edge, false).is_empty());
    }
}
