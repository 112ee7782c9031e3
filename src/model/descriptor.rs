// 该文件是 Xunmu （寻目） 项目的一部分。
// src/model/descriptor.rs - 模型元数据
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_IMAGE_SIZE: u32 = 640;
pub const DETECTION_STRIDES: [u32; 3] = [8, 16, 32];
const IMAGE_SIZE_ALIGN: u32 = 32;

/// YOLO 模型版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YoloVersion {
  V8,
  V10,
  V11,
  Unknown,
}

impl YoloVersion {
  /// 按子串匹配版本号，依次检查 "8"、"10"、"11"
  pub fn parse(name: &str) -> Self {
    if name.contains('8') {
      YoloVersion::V8
    } else if name.contains("10") {
      YoloVersion::V10
    } else if name.contains("11") {
      YoloVersion::V11
    } else {
      YoloVersion::Unknown
    }
  }
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Accelerator {
  #[default]
  None,
  Cpu,
  Gpu,
}

/// 模型输出框坐标的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxUnits {
  /// 已是模型输入像素坐标
  #[default]
  Pixel,
  /// 相对输入尺寸归一化到 [0, 1]
  Normalized,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
  #[error("模型名称为空")]
  EmptyName,
  #[error("无法识别的模型版本: {0:?}")]
  UnknownVersion(String),
  #[error("标签列表为空")]
  EmptyLabels,
  #[error("输入尺寸 {0} 不是 32 的正整数倍")]
  InvalidImageSize(u32),
}

/// 模型包中 `metadata.json` 的原始内容
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
  pub name: Option<String>,
  pub version: Option<String>,
  pub description: Option<String>,
  pub author: Option<String>,
  pub labels: Option<Vec<String>>,
  pub image_size: Option<u32>,
  pub box_units: Option<BoxUnits>,
}

impl ModelMetadata {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }
}

/// 已安装模型的不可变描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
  id: String,
  name: String,
  version: YoloVersion,
  #[serde(default)]
  description: String,
  #[serde(default)]
  author: String,
  labels: Vec<String>,
  image_size: u32,
  #[serde(default)]
  accelerator: Accelerator,
  #[serde(default)]
  box_units: BoxUnits,
  imported_at: DateTime<Utc>,
}

impl ModelDescriptor {
  pub fn builder() -> DescriptorBuilder {
    DescriptorBuilder::default()
  }

  /// 从模型包元数据构造，校验失败则拒绝
  pub fn from_metadata(metadata: ModelMetadata) -> Result<Self, DescriptorError> {
    let version = metadata.version.unwrap_or_default();
    let mut builder = Self::builder()
      .name(metadata.name.unwrap_or_default())
      .version(YoloVersion::parse(&version))
      .description(metadata.description.unwrap_or_default())
      .author(metadata.author.unwrap_or_default())
      .labels(metadata.labels.unwrap_or_default())
      .image_size(metadata.image_size.unwrap_or(DEFAULT_IMAGE_SIZE));
    if let Some(units) = metadata.box_units {
      builder = builder.box_units(units);
    }

    builder.build().map_err(|e| match e {
      DescriptorError::UnknownVersion(_) => DescriptorError::UnknownVersion(version),
      other => other,
    })
  }

  pub fn validate(&self) -> Result<(), DescriptorError> {
    if self.name.is_empty() {
      return Err(DescriptorError::EmptyName);
    }
    if self.version == YoloVersion::Unknown {
      return Err(DescriptorError::UnknownVersion(format!("{:?}", self.version)));
    }
    if self.labels.is_empty() {
      return Err(DescriptorError::EmptyLabels);
    }
    if self.image_size == 0 || self.image_size % IMAGE_SIZE_ALIGN != 0 {
      return Err(DescriptorError::InvalidImageSize(self.image_size));
    }
    Ok(())
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> YoloVersion {
    self.version
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn author(&self) -> &str {
    &self.author
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn image_size(&self) -> u32 {
    self.image_size
  }

  pub fn accelerator(&self) -> Accelerator {
    self.accelerator
  }

  pub fn box_units(&self) -> BoxUnits {
    self.box_units
  }

  pub fn imported_at(&self) -> DateTime<Utc> {
    self.imported_at
  }

  /// 三个检测头的网格总数
  pub fn box_count(&self) -> usize {
    DETECTION_STRIDES
      .iter()
      .map(|stride| {
        let side = (self.image_size / stride) as usize;
        side * side
      })
      .sum()
  }

  /// 返回记录了探测结果的新描述
  pub fn with_accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = accelerator;
    self
  }
}

pub struct DescriptorBuilder {
  id: Option<String>,
  name: String,
  version: YoloVersion,
  description: String,
  author: String,
  labels: Vec<String>,
  image_size: u32,
  accelerator: Accelerator,
  box_units: BoxUnits,
}

impl Default for DescriptorBuilder {
  fn default() -> Self {
    Self {
      id: None,
      name: String::new(),
      version: YoloVersion::Unknown,
      description: String::new(),
      author: String::new(),
      labels: Vec::new(),
      image_size: DEFAULT_IMAGE_SIZE,
      accelerator: Accelerator::None,
      box_units: BoxUnits::Pixel,
    }
  }
}

impl DescriptorBuilder {
  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn version(mut self, version: YoloVersion) -> Self {
    self.version = version;
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn author(mut self, author: impl Into<String>) -> Self {
    self.author = author.into();
    self
  }

  pub fn labels<I, S>(mut self, labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn image_size(mut self, image_size: u32) -> Self {
    self.image_size = image_size;
    self
  }

  pub fn accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = accelerator;
    self
  }

  pub fn box_units(mut self, box_units: BoxUnits) -> Self {
    self.box_units = box_units;
    self
  }

  pub fn build(self) -> Result<ModelDescriptor, DescriptorError> {
    let descriptor = ModelDescriptor {
      id: self
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
      name: self.name,
      version: self.version,
      description: self.description,
      author: self.author,
      labels: self.labels,
      image_size: self.image_size,
      accelerator: self.accelerator,
      box_units: self.box_units,
      imported_at: Utc::now(),
    };
    descriptor.validate()?;
    Ok(descriptor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn metadata(json: &str) -> ModelMetadata {
    ModelMetadata::from_json(json).unwrap()
  }

  #[test]
  fn version_matches_by_substring() {
    assert_eq!(YoloVersion::parse("yolov8n"), YoloVersion::V8);
    assert_eq!(YoloVersion::parse("v10"), YoloVersion::V10);
    assert_eq!(YoloVersion::parse("yolo11s"), YoloVersion::V11);
    assert_eq!(YoloVersion::parse("v5"), YoloVersion::Unknown);
    assert_eq!(YoloVersion::parse(""), YoloVersion::Unknown);
    // "8" 优先于其它版本
    assert_eq!(YoloVersion::parse("v18"), YoloVersion::V8);
  }

  #[test]
  fn parses_full_metadata() {
    let descriptor = ModelDescriptor::from_metadata(metadata(
      r#"{"name":"pets","version":"yolov8","description":"d","author":"a",
          "labels":["cat","dog"],"imageSize":320,"boxUnits":"normalized"}"#,
    ))
    .unwrap();

    assert_eq!(descriptor.name(), "pets");
    assert_eq!(descriptor.version(), YoloVersion::V8);
    assert_eq!(descriptor.labels(), &["cat".to_string(), "dog".to_string()]);
    assert_eq!(descriptor.image_size(), 320);
    assert_eq!(descriptor.box_units(), BoxUnits::Normalized);
    assert_eq!(descriptor.accelerator(), Accelerator::None);
    assert!(!descriptor.id().is_empty());
  }

  #[test]
  fn image_size_defaults_to_640() {
    let descriptor = ModelDescriptor::from_metadata(metadata(
      r#"{"name":"pets","version":"11","labels":["cat"]}"#,
    ))
    .unwrap();
    assert_eq!(descriptor.image_size(), 640);
    assert_eq!(descriptor.box_units(), BoxUnits::Pixel);
  }

  #[test]
  fn rejects_invalid_metadata() {
    assert_eq!(
      ModelDescriptor::from_metadata(metadata(r#"{"version":"8","labels":["a"]}"#)),
      Err(DescriptorError::EmptyName)
    );
    assert_eq!(
      ModelDescriptor::from_metadata(metadata(r#"{"name":"m","version":"v5","labels":["a"]}"#)),
      Err(DescriptorError::UnknownVersion("v5".to_string()))
    );
    assert_eq!(
      ModelDescriptor::from_metadata(metadata(r#"{"name":"m","version":"8","labels":[]}"#)),
      Err(DescriptorError::EmptyLabels)
    );
    assert_eq!(
      ModelDescriptor::from_metadata(metadata(
        r#"{"name":"m","version":"8","labels":["a"],"imageSize":600}"#
      )),
      Err(DescriptorError::InvalidImageSize(600))
    );
    assert_eq!(
      ModelDescriptor::from_metadata(metadata(
        r#"{"name":"m","version":"8","labels":["a"],"imageSize":0}"#
      )),
      Err(DescriptorError::InvalidImageSize(0))
    );
  }

  #[test]
  fn box_count_sums_three_strides() {
    let descriptor = ModelDescriptor::builder()
      .name("m")
      .version(YoloVersion::V8)
      .labels(["a"])
      .build()
      .unwrap();
    assert_eq!(descriptor.box_count(), 80 * 80 + 40 * 40 + 20 * 20);
    assert_eq!(descriptor.box_count(), 8400);
  }

  #[test]
  fn serializes_for_the_store() {
    let descriptor = ModelDescriptor::builder()
      .id("fixed")
      .name("m")
      .version(YoloVersion::V10)
      .labels(["a", "b"])
      .accelerator(Accelerator::Gpu)
      .build()
      .unwrap();
    let json = serde_json::to_string(&descriptor).unwrap();
    assert!(json.contains("\"GPU\""));
    let back: ModelDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, descriptor);
  }
}
