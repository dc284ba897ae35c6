//! 研究组件文件格式（.shst）
//!
//! 基于 MessagePack + Zstd 的紧凑二进制容器：
//! - 文件头：魔数、版本、标志位、压缩后长度
//! - 内容：元数据、宿主研究树、节点的持久ID、组件字节流
//!
//! 组件字节流本身是 [`crate::codec`] 的 `|` 分隔格式，容器只负责把它和
//! 研究树一起保存下来，使文件脱离文档服务也能重新打开。

use crate::codec;
use crate::error::FileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shaperstudy_core::entity::Entry;
use shaperstudy_core::study::Study;
use shaperstudy_core::tree::{NodeId, StudyTree};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// 文件魔数 "SHST"
const MAGIC: &[u8; 4] = b"SHST";

/// 当前文件格式版本
const FORMAT_VERSION: u32 = 1;

/// Zstd 压缩级别（1-22，3 是默认值，平衡速度和压缩比）
const COMPRESSION_LEVEL: i32 = 3;

/// 文件头（16 字节）
#[derive(Debug)]
struct FileHeader {
    /// 魔数 "SHST"
    magic: [u8; 4],
    /// 格式版本
    version: u32,
    /// 标志位（预留）
    flags: u32,
    /// 压缩后数据长度
    compressed_size: u32,
}

impl FileHeader {
    fn new(compressed_size: u32) -> Self {
        Self {
            magic: *MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            compressed_size,
        }
    }

    fn write(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        Ok(())
    }

    fn read(reader: &mut impl Read) -> Result<Self, FileError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;

        if &magic != MAGIC {
            return Err(FileError::InvalidFormat(
                "Invalid magic number, not a SHAPERSTUDY file".to_string(),
            ));
        }

        let mut buf = [0u8; 4];

        reader.read_exact(&mut buf)?;
        let version = u32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let flags = u32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let compressed_size = u32::from_le_bytes(buf);

        Ok(Self {
            magic,
            version,
            flags,
            compressed_size,
        })
    }
}

/// 研究元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub title: String,
    pub author: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl StudyMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            author: String::new(),
            created: now,
            modified: now,
        }
    }
}

impl Default for StudyMetadata {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// 可序列化的文件内容
#[derive(Debug, Serialize, Deserialize)]
struct FileContent {
    /// 研究元数据
    metadata: StudyMetadata,
    /// 宿主研究树
    tree: StudyTree,
    /// 发布节点的持久ID
    bindings: Vec<(NodeId, Entry)>,
    /// 组件字节流
    stream: Vec<u8>,
}

/// 保存研究到文件
pub fn save(study: &Study, metadata: &StudyMetadata, path: &Path) -> Result<(), FileError> {
    let mut metadata = metadata.clone();
    metadata.modified = Utc::now();

    let content = FileContent {
        metadata,
        tree: study.tree().clone(),
        bindings: codec::persistent_ids(study),
        stream: codec::save(study)?,
    };

    // 序列化为 MessagePack
    let msgpack_data = rmp_serde::to_vec(&content)?;

    // 使用 Zstd 压缩
    let compressed_data = zstd::encode_all(msgpack_data.as_slice(), COMPRESSION_LEVEL)?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header = FileHeader::new(compressed_data.len() as u32);
    header.write(&mut writer)?;

    writer.write_all(&compressed_data)?;
    writer.flush()?;

    tracing::info!(
        "Saved {} entities, {} tree nodes to {} ({} bytes compressed)",
        content.bindings.len(),
        content.tree.len(),
        path.display(),
        compressed_data.len()
    );

    Ok(())
}

/// 从文件加载研究，替换会话的研究树和注册表
///
/// 文件内容全部校验通过之后才修改会话。
pub fn load(study: &mut Study, path: &Path) -> Result<StudyMetadata, FileError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let header = FileHeader::read(&mut reader)?;

    // 版本检查
    if header.version > FORMAT_VERSION {
        return Err(FileError::UnsupportedVersion(format!(
            "File version {} is newer than supported version {}",
            header.version, FORMAT_VERSION
        )));
    }

    let mut compressed_data = vec![0u8; header.compressed_size as usize];
    reader.read_exact(&mut compressed_data)?;

    let msgpack_data = zstd::decode_all(compressed_data.as_slice())?;
    let content: FileContent = rmp_serde::from_slice(&msgpack_data)?;

    let entities = codec::parse(&content.stream)?;
    study.replace_tree(content.tree);
    study.insert_loaded(entities)?;
    let bound = codec::rebind(study, &content.bindings);
    if bound != content.bindings.len() {
        tracing::warn!(
            "{} of {} nodes could not be bound",
            content.bindings.len() - bound,
            content.bindings.len()
        );
    }

    tracing::info!(
        "Loaded {} entities, {} tree nodes from {}",
        study.registry().len(),
        study.tree().len(),
        path.display()
    );

    Ok(content.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaperstudy_core::entity::Entity;
    use shaperstudy_core::kernel::ShapeType;
    use shaperstudy_core::lifecycle::ShapeConsumer;
    use std::cell::RefCell;
    use std::rc::Rc;
    use shaperstudy_core::listing::samples::{BOX_SOLID, BOX_SOLID_V2};
    use shaperstudy_core::listing::ListingKernel;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file_path = dir.path().join("study.shst");

        let mut study = Study::new(ListingKernel::new());
        let shape = Entry::new("0:1:1").unwrap();
        study
            .publish_shape(&shape, "Box_1_1", BOX_SOLID.into(), None)
            .unwrap();
        study
            .publish_shape(&shape, "Box_1_1", BOX_SOLID_V2.into(), None)
            .unwrap();
        let group = study.create_group(&shape, ShapeType::Face).unwrap();
        study.set_selection(&group, vec![3]).unwrap();
        study.add_in_study(&group, "Top", Some(&shape)).unwrap();

        let mut metadata = StudyMetadata::new("Test Study");
        metadata.author = "tester".to_string();
        save(&study, &metadata, &file_path).expect("Failed to save");

        // 验证文件头
        let file = File::open(&file_path).expect("Failed to open");
        let mut reader = BufReader::new(file);
        let header = FileHeader::read(&mut reader).expect("Failed to read header");
        assert_eq!(&header.magic, MAGIC);
        assert_eq!(header.version, FORMAT_VERSION);

        let mut loaded = Study::new(ListingKernel::new());
        let loaded_metadata = load(&mut loaded, &file_path).expect("Failed to load");

        assert_eq!(loaded_metadata.title, "Test Study");
        assert_eq!(loaded_metadata.author, "tester");
        assert_eq!(loaded_metadata.created, metadata.created);
        assert_eq!(loaded.registry().len(), 2);
        assert_eq!(loaded.tree().len(), study.tree().len());

        let node = loaded.entity(&shape).unwrap().node().unwrap();
        assert_eq!(loaded.tree().name(node), Some("Box_1_1"));
        assert_eq!(loaded.entity(&shape).unwrap().tick(), 2);
        assert_eq!(loaded.name(&group), Some("Top"));
        assert_eq!(
            loaded.entity(&group).unwrap().selection().unwrap().indices(),
            &[3]
        );
    }

    #[test]
    fn test_load_drops_consumers_of_previous_study() {
        struct Recorder(Rc<RefCell<Vec<String>>>);
        impl ShapeConsumer for Recorder {
            fn replace_shape(&mut self, dead: &Entity) {
                self.0.borrow_mut().push(dead.entry().to_string());
            }
        }

        fn study_with_mesh() -> (Study, NodeId, NodeId) {
            let mut study = Study::new(ListingKernel::new());
            let shape = Entry::new("0:1:1").unwrap();
            let node = study
                .publish_shape(&shape, "Box_1_1", BOX_SOLID.into(), None)
                .unwrap();
            let component = study.foreign_component("SMESH").unwrap();
            let mesh = study.new_foreign_object(component).unwrap();
            let shape_ref = study.new_reference_object(mesh, node, true).unwrap();
            (study, mesh, shape_ref)
        }

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file_path = dir.path().join("other.shst");
        let (other, _, _) = study_with_mesh();
        save(&other, &StudyMetadata::new("Other"), &file_path).expect("Failed to save");

        let (mut study, mesh, shape_ref) = study_with_mesh();
        let log = Rc::new(RefCell::new(Vec::new()));
        study.attach_consumer(mesh, Box::new(Recorder(Rc::clone(&log))));

        load(&mut study, &file_path).expect("Failed to load");
        let trigger = study.tree().entry(shape_ref);
        let dead = study.break_link(&trigger).unwrap();
        assert_eq!(dead.map(|e| e.to_string()), Some("dead1_0:1:1".to_string()));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_invalid_magic() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file_path = dir.path().join("invalid.shst");

        let mut file = File::create(&file_path).expect("Failed to create");
        file.write_all(b"XXXX").expect("Failed to write");
        file.write_all(&[0u8; 12]).expect("Failed to write padding");

        let mut study = Study::new(ListingKernel::new());
        let result = load(&mut study, &file_path);
        assert!(matches!(result, Err(FileError::InvalidFormat(_))));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file_path = dir.path().join("future.shst");

        let mut file = File::create(&file_path).expect("Failed to create");
        let mut header = FileHeader::new(0);
        header.version = FORMAT_VERSION + 1;
        header.write(&mut file).expect("Failed to write header");

        let mut study = Study::new(ListingKernel::new());
        let result = load(&mut study, &file_path);
        assert!(matches!(result, Err(FileError::UnsupportedVersion(_))));
    }
}
