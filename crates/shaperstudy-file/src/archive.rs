//! 形状归档文件（JSON）

use crate::error::FileError;
use shaperstudy_core::archive::Archive;
use shaperstudy_core::entity::Entry;
use shaperstudy_core::study::Study;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub fn write_archive(archive: &Archive, path: &Path) -> Result<(), FileError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, archive)?;
    writer.flush()?;
    Ok(())
}

pub fn read_archive(path: &Path) -> Result<Archive, FileError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// 把活形状导出到归档文件
pub fn export_to_file(
    study: &Study,
    entry: &Entry,
    author: &str,
    path: &Path,
) -> Result<(), FileError> {
    let archive = study.export_archive(entry, author)?;
    write_archive(&archive, path)?;
    tracing::info!(
        "Exported {} with {} groups, {} fields to {}",
        entry,
        archive.groups.len(),
        archive.fields.len(),
        path.display()
    );
    Ok(())
}

/// 从归档文件导入死亡形状；返回更新的组/场个数
pub fn import_from_file(study: &mut Study, dead: &Entry, path: &Path) -> Result<usize, FileError> {
    let archive = read_archive(path)?;
    Ok(study.import_archive(dead, &archive)?)
}
