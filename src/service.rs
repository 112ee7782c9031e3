// 该文件是 Xunmu （寻目） 项目的一部分。
// src/service.rs - 检测服务
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

use std::path::Path;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::NhwcTensor,
  letterbox::LetterBox,
  model::{DecodeError, Decoder, DescriptorError, Detection, ModelDescriptor, YoloVersion},
  package::{ModelPackage, PackageError},
  registry::{ModelRegistry, RegistryError},
  runtime::{CacheError, ModelCache, ModelRuntime, RuntimeBackend},
};

/// 一次检测请求
#[derive(Debug, Clone)]
pub struct DetectRequest {
  pub image: RgbImage,
  pub model_name: String,
  /// 置信度阈值，取值 [0, 1]
  pub threshold: f32,
}

impl DetectRequest {
  pub fn new(image: RgbImage, model_name: impl Into<String>, threshold: f32) -> Self {
    Self {
      image,
      model_name: model_name.into(),
      threshold,
    }
  }
}

/// 检测结果，坐标位于原图像素空间；空结果同样有效
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResponse {
  pub detections: Vec<Detection>,
}

impl DetectResponse {
  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }
}

/// 与传输方式无关的检测接口
pub trait DetectionEndpoint {
  fn run_detection(&self, request: &DetectRequest) -> DetectResponse;
  fn model_list(&self) -> Vec<String>;
}

#[derive(Error, Debug)]
pub enum DetectError<E>
where
  E: std::error::Error + 'static,
{
  #[error("未找到模型: {0}")]
  UnknownModel(String),
  #[error("不支持的模型版本: {0:?}")]
  UnsupportedVersion(YoloVersion),
  #[error("输入图像为空")]
  EmptyImage,
  #[error("置信度阈值 {0} 不在 [0, 1] 范围内")]
  InvalidThreshold(f32),
  #[error("获取模型失败: {0}")]
  CacheError(#[from] CacheError<E>),
  #[error("推理失败: {0}")]
  RuntimeError(#[source] E),
  #[error("模型没有输出")]
  NoOutput,
  #[error("解码失败: {0}")]
  DecodeError(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum ImportError {
  #[error("模型包错误: {0}")]
  PackageError(#[from] PackageError),
  #[error("模型元数据无效: {0}")]
  DescriptorError(#[from] DescriptorError),
  #[error("模型登记错误: {0}")]
  RegistryError(#[from] RegistryError),
}

/// 持有模型登记表与运行时缓存的服务上下文
pub struct DetectionService<B: RuntimeBackend> {
  registry: ModelRegistry,
  cache: ModelCache<B>,
}

impl<B: RuntimeBackend> DetectionService<B> {
  pub fn new(registry: ModelRegistry, backend: B) -> Self {
    Self {
      registry,
      cache: ModelCache::new(backend),
    }
  }

  pub fn registry(&self) -> &ModelRegistry {
    &self.registry
  }

  pub fn cache(&self) -> &ModelCache<B> {
    &self.cache
  }

  /// 尽力而为的检测：任何失败都记录日志并返回空结果
  pub fn detect(&self, request: &DetectRequest) -> DetectResponse {
    match self.try_detect(request) {
      Ok(detections) => DetectResponse { detections },
      Err(DetectError::UnknownModel(name)) => {
        warn!("未找到模型: {}", name);
        DetectResponse::default()
      }
      Err(e) => {
        error!("模型 {} 检测失败: {}", request.model_name, e);
        DetectResponse::default()
      }
    }
  }

  pub fn try_detect(&self, request: &DetectRequest) -> Result<Vec<Detection>, DetectError<B::Error>> {
    let descriptor = self
      .registry
      .find_by_name(&request.model_name)
      .ok_or_else(|| DetectError::UnknownModel(request.model_name.clone()))?;
    let decoder = Decoder::for_model(&descriptor)
      .ok_or(DetectError::UnsupportedVersion(descriptor.version()))?;
    if request.image.width() == 0 || request.image.height() == 0 {
      return Err(DetectError::EmptyImage);
    }
    // NaN 同样被拒绝
    if !(0.0..=1.0).contains(&request.threshold) {
      return Err(DetectError::InvalidThreshold(request.threshold));
    }

    let runtime = self
      .cache
      .get(&descriptor, &self.registry.weights_path(descriptor.id()))?;

    let now = std::time::Instant::now();
    let size = descriptor.image_size();
    let (padded, letterbox) = LetterBox::create(&request.image, size, size);
    let input = NhwcTensor::from(&padded);
    debug!("输入张量 {:?}, 画布 {:?}", input.shape(), letterbox.target_size());

    let outputs = runtime.run(&input).map_err(DetectError::RuntimeError)?;
    let output = outputs.first().ok_or(DetectError::NoOutput)?;
    let items = decoder.decode(output, request.threshold)?;
    let detections = letterbox.restore(items);

    info!(
      "模型 {} 检测到 {} 个目标，耗时: {:.2?}",
      descriptor.name(),
      detections.len(),
      now.elapsed()
    );
    debug!("检测结果: {:?}", detections);
    Ok(detections)
  }

  /// 导入模型包；任何失败都不会留下部分写入的文件
  pub fn import_model(&self, archive: &Path) -> Result<ModelDescriptor, ImportError> {
    let staging = self.registry.staging_dir()?;
    let package = ModelPackage::unpack(archive, staging.path())?;
    let descriptor = ModelDescriptor::from_metadata(package.metadata)?;

    let accelerator = self.cache.select_accelerator(&package.weights);
    let descriptor = descriptor.with_accelerator(accelerator);

    self.registry.insert(descriptor.clone(), staging)?;
    info!(
      "导入模型 {} ({:?}, {:?}, {} 个标签)",
      descriptor.name(),
      descriptor.version(),
      descriptor.accelerator(),
      descriptor.labels().len()
    );
    Ok(descriptor)
  }

  /// 删除模型并关闭其运行时
  ///
  /// 先从登记表移除，之后的请求不会再为该模型构建运行时。
  pub fn remove_model(&self, id: &str) -> Result<bool, RegistryError> {
    let removed = self.registry.remove(id);
    self.cache.evict(id);
    removed
  }

  /// 关闭全部缓存的运行时
  pub fn shutdown(&self) {
    let closed = self.cache.clear();
    info!("服务关闭，释放 {} 个模型运行时", closed);
  }
}

impl<B: RuntimeBackend> DetectionEndpoint for DetectionService<B> {
  fn run_detection(&self, request: &DetectRequest) -> DetectResponse {
    self.detect(request)
  }

  fn model_list(&self) -> Vec<String> {
    self.registry.model_names()
  }
}

impl<B: RuntimeBackend> Drop for DetectionService<B> {
  fn drop(&mut self) {
    self.shutdown();
  }
}
