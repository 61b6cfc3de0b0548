//! 配置文件输出：每个节点一个 `{name}.json`

use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{JsonStyle, OutputDir};
use crate::proxy::ServerDescriptor;
use crate::v2ray::{ProxyConfigDocument, Templates, document_for};

/// 使用哪个模板生成文档
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// 完整配置（路由、dns 等）
    Full,
    /// 测速用配置，只有一个 http 入站
    Probe,
}

/// 节点在目录中对应的文件路径
pub fn config_path(dir: &Path, descriptor: &ServerDescriptor) -> PathBuf {
    dir.join(format!("{}.json", descriptor.file_stem()))
}

/// 删除并重建目录，只在阶段切换时调用
pub fn clear_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

pub fn write_document(
    path: &Path,
    document: &ProxyConfigDocument,
    style: JsonStyle,
) -> io::Result<()> {
    let json = document.to_json(style)?;
    fs::write(path, json)
}

/// 同名节点追加序号，避免输出文件互相覆盖
///
/// 首次出现的名称保持不变；追加的序号同时避开订阅中已有的名称和已分配的名称。
pub fn dedupe_names(descriptors: &mut [ServerDescriptor]) {
    let originals: HashSet<String> = descriptors.iter().map(|d| d.file_stem()).collect();
    let mut taken: HashSet<String> = HashSet::new();

    for descriptor in descriptors.iter_mut() {
        if taken.insert(descriptor.file_stem()) {
            continue;
        }

        let base = descriptor.display_name.clone();
        let mut count = 2;
        loop {
            descriptor.display_name = format!("{}_{}", base, count);
            let stem = descriptor.file_stem();
            if !originals.contains(&stem) && taken.insert(stem) {
                break;
            }
            count += 1;
        }
    }
}

/// 为每个节点写一个文件，返回写入数量；目录不存在时创建
pub fn write_all(
    templates: &Templates,
    descriptors: &[ServerDescriptor],
    kind: DocumentKind,
    target: &OutputDir,
) -> io::Result<usize> {
    let template = match kind {
        DocumentKind::Full => &templates.full,
        DocumentKind::Probe => &templates.probe,
    };
    fs::create_dir_all(&target.path)?;

    let mut written: HashSet<PathBuf> = HashSet::new();
    for descriptor in descriptors {
        let path = config_path(&target.path, descriptor);
        if written.contains(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("重复的配置文件名: {}", path.display()),
            ));
        }

        let document = document_for(template, descriptor)?;
        write_document(&path, &document, target.style)?;
        debug!("写入 {}", path.display());
        written.insert(path);
    }

    info!(
        "已写入 {} 个配置到 {}",
        written.len(),
        target.path.display()
    );
    Ok(written.len())
}
