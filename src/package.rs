// 该文件是 Xunmu （寻目） 项目的一部分。
// src/package.rs - 模型包解包
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

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::ModelMetadata;

pub const METADATA_FILE: &str = "metadata.json";
pub const WEIGHTS_SUFFIX: &str = ".tflite";
pub const WEIGHTS_FILE: &str = "model.tflite";

const ZIP_MAGIC: [u8; 2] = *b"PK";

#[derive(Error, Debug)]
pub enum PackageError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("zip 解包错误: {0}")]
  ZipError(#[from] zip::result::ZipError),
  #[error("模型包缺少 metadata.json")]
  MissingMetadata,
  #[error("模型包缺少 .tflite 权重文件")]
  MissingWeights,
  #[error("模型包包含多个 metadata.json")]
  DuplicateMetadata,
  #[error("模型包包含多个权重文件: {0:?}")]
  DuplicateWeights(PathBuf),
  #[error("元数据解析错误: {0}")]
  MetadataError(#[from] serde_json::Error),
}

/// 解包后的模型包，权重已写入暂存目录
#[derive(Debug)]
pub struct ModelPackage {
  pub metadata: ModelMetadata,
  pub weights: PathBuf,
}

impl ModelPackage {
  /// 读取 zip 或 tar 模型包，权重写入 `staging/model.tflite`
  ///
  /// 按文件头识别格式。需要恰好一个 `metadata.json` 与一个 `.tflite` 文件。
  pub fn unpack(archive: &Path, staging: &Path) -> Result<Self, PackageError> {
    info!("解包模型: {}", archive.display());
    let mut file = File::open(archive)?;
    let mut magic = [0u8; 2];
    let is_zip = file.read_exact(&mut magic).is_ok() && magic == ZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;

    let mut entries = PackageEntries::new(staging);
    if is_zip {
      let mut archive = zip::ZipArchive::new(file)?;
      for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if !entry.is_file() {
          continue;
        }
        let path = PathBuf::from(entry.name());
        entries.accept(&path, &mut entry)?;
      }
    } else {
      let mut archive = tar::Archive::new(file);
      for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
          continue;
        }
        let path = entry.path()?.into_owned();
        entries.accept(&path, &mut entry)?;
      }
    }

    entries.finish()
  }
}

/// 逐条收集包内文件，与归档格式无关
struct PackageEntries<'a> {
  staging: &'a Path,
  metadata_json: Option<String>,
  weights: Option<PathBuf>,
}

impl<'a> PackageEntries<'a> {
  fn new(staging: &'a Path) -> Self {
    Self {
      staging,
      metadata_json: None,
      weights: None,
    }
  }

  fn accept(&mut self, path: &Path, reader: &mut impl Read) -> Result<(), PackageError> {
    let is_metadata = path
      .file_name()
      .is_some_and(|name| name == METADATA_FILE);

    if is_metadata {
      if self.metadata_json.is_some() {
        return Err(PackageError::DuplicateMetadata);
      }
      let mut json = String::new();
      reader.read_to_string(&mut json)?;
      self.metadata_json = Some(json);
    } else if path
      .to_string_lossy()
      .to_lowercase()
      .contains(WEIGHTS_SUFFIX)
    {
      if self.weights.is_some() {
        return Err(PackageError::DuplicateWeights(path.to_path_buf()));
      }
      let target = self.staging.join(WEIGHTS_FILE);
      let size = io::copy(reader, &mut File::create(&target)?)?;
      debug!(
        "权重 {} 写入 {}, {:.2} MB",
        path.display(),
        target.display(),
        size as f64 / (1024.0 * 1024.0)
      );
      self.weights = Some(target);
    }
    Ok(())
  }

  fn finish(self) -> Result<ModelPackage, PackageError> {
    let metadata_json = self.metadata_json.ok_or(PackageError::MissingMetadata)?;
    let weights = self.weights.ok_or(PackageError::MissingWeights)?;
    let metadata = ModelMetadata::from_json(&metadata_json)?;

    Ok(ModelPackage { metadata, weights })
  }
}
