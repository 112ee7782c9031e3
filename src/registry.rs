// 该文件是 Xunmu （寻目） 项目的一部分。
// src/registry.rs - 已安装模型登记
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::ModelDescriptor;
use crate::package::WEIGHTS_FILE;

pub const DESCRIPTOR_FILE: &str = "descriptor.json";
const STAGING_PREFIX: &str = ".import-";

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("描述文件错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("模型 id 已存在: {0}")]
  DuplicateId(String),
}

/// 基于目录的模型登记表
///
/// 布局为 `<root>/<id>/descriptor.json` 与 `<root>/<id>/model.tflite`。
pub struct ModelRegistry {
  root: PathBuf,
  models: RwLock<HashMap<String, ModelDescriptor>>,
}

impl ModelRegistry {
  /// 打开（必要时创建）模型目录并载入全部描述
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;

    let mut models = HashMap::new();
    for entry in std::fs::read_dir(&root)? {
      let entry = entry?;
      if !entry.file_type()?.is_dir() {
        continue;
      }
      let path = entry.path();

      if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
        warn!("清理未完成的导入: {}", path.display());
        std::fs::remove_dir_all(&path)?;
        continue;
      }

      match load_descriptor(&path) {
        Ok(descriptor) => {
          debug!("载入模型 {} ({})", descriptor.name(), descriptor.id());
          models.insert(descriptor.id().to_string(), descriptor);
        }
        Err(e) => warn!("跳过无效模型目录 {}: {}", path.display(), e),
      }
    }

    info!("模型目录 {} 共 {} 个模型", root.display(), models.len());
    Ok(Self {
      root,
      models: RwLock::new(models),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 在模型目录内创建暂存目录，丢弃时自动删除
  pub fn staging_dir(&self) -> Result<TempDir, RegistryError> {
    Ok(
      tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&self.root)?,
    )
  }

  /// 写入描述并将暂存目录原子地重命名为 `<root>/<id>`
  pub fn insert(&self, descriptor: ModelDescriptor, staged: TempDir) -> Result<(), RegistryError> {
    let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
    let id = descriptor.id().to_string();
    let target = self.root.join(&id);
    if models.contains_key(&id) || target.exists() {
      return Err(RegistryError::DuplicateId(id));
    }

    let json = serde_json::to_string_pretty(&descriptor)?;
    std::fs::write(staged.path().join(DESCRIPTOR_FILE), json)?;
    std::fs::rename(staged.path(), &target)?;

    info!("模型已登记: {} ({})", descriptor.name(), id);
    models.insert(id, descriptor);
    Ok(())
  }

  /// 按名称精确匹配；重名时取最早导入的模型
  pub fn find_by_name(&self, name: &str) -> Option<ModelDescriptor> {
    self
      .models
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .filter(|descriptor| descriptor.name() == name)
      .min_by_key(|descriptor| descriptor.imported_at())
      .cloned()
  }

  pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
    self
      .models
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(id)
      .cloned()
  }

  /// 全部模型，按导入时间排序
  pub fn models(&self) -> Vec<ModelDescriptor> {
    let mut models: Vec<_> = self
      .models
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    models.sort_by_key(|descriptor| descriptor.imported_at());
    models
  }

  pub fn model_names(&self) -> Vec<String> {
    self
      .models()
      .into_iter()
      .map(|descriptor| descriptor.name().to_string())
      .collect()
  }

  pub fn weights_path(&self, id: &str) -> PathBuf {
    self.root.join(id).join(WEIGHTS_FILE)
  }

  /// 删除模型描述与权重，返回模型是否存在
  pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
    let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
    let Some(descriptor) = models.remove(id) else {
      return Ok(false);
    };

    let directory = self.root.join(id);
    if directory.exists() {
      std::fs::remove_dir_all(&directory)?;
    }
    info!("模型已删除: {} ({})", descriptor.name(), id);
    Ok(true)
  }

  pub fn len(&self) -> usize {
    self
      .models
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn load_descriptor(directory: &Path) -> Result<ModelDescriptor, Box<dyn std::error::Error>> {
  let json = std::fs::read_to_string(directory.join(DESCRIPTOR_FILE))?;
  let descriptor: ModelDescriptor = serde_json::from_str(&json)?;
  descriptor.validate()?;
  Ok(descriptor)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Accelerator, YoloVersion};

  fn descriptor(name: &str) -> ModelDescriptor {
    ModelDescriptor::builder()
      .name(name)
      .version(YoloVersion::V8)
      .labels(["cat"])
      .accelerator(Accelerator::Cpu)
      .build()
      .unwrap()
  }

  fn install(registry: &ModelRegistry, descriptor: &ModelDescriptor) {
    let staged = registry.staging_dir().unwrap();
    std::fs::write(staged.path().join(WEIGHTS_FILE), b"weights").unwrap();
    registry.insert(descriptor.clone(), staged).unwrap();
  }

  #[test]
  fn insert_persists_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let model = descriptor("pets");
    install(&registry, &model);

    assert_eq!(registry.find_by_name("pets"), Some(model.clone()));
    assert!(registry.weights_path(model.id()).is_file());

    let reopened = ModelRegistry::open(dir.path()).unwrap();
    assert_eq!(reopened.get(model.id()), Some(model));
    assert_eq!(reopened.model_names(), vec!["pets".to_string()]);
  }

  #[test]
  fn name_lookup_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    install(&registry, &descriptor("pets"));

    assert!(registry.find_by_name("Pets").is_none());
    assert!(registry.find_by_name("pet").is_none());
  }

  #[test]
  fn duplicate_names_resolve_to_earliest() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let first = descriptor("pets");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = descriptor("pets");
    install(&registry, &second);
    install(&registry, &first);

    assert_eq!(registry.find_by_name("pets").unwrap().id(), first.id());
    assert_eq!(registry.models().first().unwrap().id(), first.id());
  }

  #[test]
  fn remove_deletes_files() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let model = descriptor("pets");
    install(&registry, &model);

    assert!(registry.remove(model.id()).unwrap());
    assert!(!registry.remove(model.id()).unwrap());
    assert!(!dir.path().join(model.id()).exists());
    assert!(registry.is_empty());
  }

  #[test]
  fn open_skips_broken_and_staged_directories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("broken")).unwrap();
    std::fs::write(dir.path().join("broken").join(DESCRIPTOR_FILE), b"{}").unwrap();
    std::fs::create_dir(dir.path().join(".import-leftover")).unwrap();

    let registry = ModelRegistry::open(dir.path()).unwrap();
    assert!(registry.is_empty());
    assert!(!dir.path().join(".import-leftover").exists());
  }

  #[test]
  fn dropped_staging_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let staged = registry.staging_dir().unwrap();
    std::fs::write(staged.path().join(WEIGHTS_FILE), b"partial").unwrap();
    drop(staged);

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }
}
