// 该文件是 Xunmu （寻目） 项目的一部分。
// src/runtime/replay.rs - 回放预先录制的输出张量
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::NhwcTensor,
  model::Accelerator,
  runtime::{ModelRuntime, RuntimeBackend},
};

const F32_BYTES: usize = 4;

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型文件不存在: {0:?}")]
  MissingWeights(PathBuf),
  #[error("不支持的加速器: {0:?}")]
  UnsupportedAccelerator(Accelerator),
  #[error("张量文件长度 {0} 不是 4 字节的整数倍")]
  MisalignedTensor(usize),
  #[error("没有录制的输出张量")]
  NoRecording,
  #[error("输入张量形状错误: {0:?}")]
  InputShape([usize; 3]),
}

/// 以录制的原始输出（小端 f32）代替真实前向计算的后端
///
/// 用于离线复现与调试后处理流程。
#[derive(Debug, Clone, Default)]
pub struct ReplayBackend {
  recording: Option<PathBuf>,
  gpu: bool,
}

impl ReplayBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_recording(mut self, path: impl Into<PathBuf>) -> Self {
    self.recording = Some(path.into());
    self
  }

  /// 是否声明支持 GPU
  pub fn with_gpu(mut self, gpu: bool) -> Self {
    self.gpu = gpu;
    self
  }
}

impl RuntimeBackend for ReplayBackend {
  type Runtime = ReplayRuntime;
  type Environment = ();
  type Error = ReplayError;

  fn create_environment(&self) -> Result<(), ReplayError> {
    if self.gpu {
      Ok(())
    } else {
      Err(ReplayError::UnsupportedAccelerator(Accelerator::Gpu))
    }
  }

  fn compile(
    &self,
    weights: &Path,
    accelerator: Accelerator,
    _environment: Option<&()>,
  ) -> Result<ReplayRuntime, ReplayError> {
    if !weights.is_file() {
      return Err(ReplayError::MissingWeights(weights.to_path_buf()));
    }
    match accelerator {
      Accelerator::Cpu => {}
      Accelerator::Gpu if self.gpu => {}
      other => return Err(ReplayError::UnsupportedAccelerator(other)),
    }

    let output = match &self.recording {
      Some(path) => Some(read_f32_file(path)?),
      None => None,
    };
    info!("回放运行时就绪: {} ({:?})", weights.display(), accelerator);

    Ok(ReplayRuntime { output })
  }
}

pub struct ReplayRuntime {
  output: Option<Box<[f32]>>,
}

impl ModelRuntime for ReplayRuntime {
  type Error = ReplayError;

  fn run(&self, input: &NhwcTensor) -> Result<Vec<Box<[f32]>>, Self::Error> {
    if input.height() != input.width() || input.channels() != 3 {
      return Err(ReplayError::InputShape(input.shape()));
    }
    let output = self.output.as_ref().ok_or(ReplayError::NoRecording)?;
    debug!("回放输出张量 {} 个元素", output.len());
    Ok(vec![output.clone()])
  }
}

/// 读取小端 f32 原始张量文件
pub fn read_f32_file(path: &Path) -> Result<Box<[f32]>, ReplayError> {
  let bytes = std::fs::read(path)?;
  if bytes.len() % F32_BYTES != 0 {
    return Err(ReplayError::MisalignedTensor(bytes.len()));
  }
  Ok(
    bytes
      .chunks_exact(F32_BYTES)
      .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn write_f32(path: &Path, values: &[f32]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(path, bytes).unwrap();
  }

  #[test]
  fn replays_recorded_output() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.tflite");
    let recording = dir.path().join("output.bin");
    std::fs::write(&weights, b"weights").unwrap();
    write_f32(&recording, &[1.0, -2.5, 0.25]);

    let backend = ReplayBackend::new().with_recording(&recording);
    let runtime = backend.compile(&weights, Accelerator::Cpu, None).unwrap();
    let input = NhwcTensor::from(&RgbImage::new(32, 32));
    let outputs = runtime.run(&input).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(&*outputs[0], &[1.0, -2.5, 0.25]);
  }

  #[test]
  fn gpu_requires_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.tflite");
    std::fs::write(&weights, b"weights").unwrap();

    let backend = ReplayBackend::new();
    assert!(backend.create_environment().is_err());
    assert!(matches!(
      backend.compile(&weights, Accelerator::Gpu, Some(&())),
      Err(ReplayError::UnsupportedAccelerator(Accelerator::Gpu))
    ));

    let backend = backend.with_gpu(true);
    assert!(backend.compile(&weights, Accelerator::Gpu, Some(&())).is_ok());
  }

  #[test]
  fn rejects_missing_weights_and_bad_recordings() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.tflite");
    assert!(matches!(
      ReplayBackend::new().compile(&weights, Accelerator::Cpu, None),
      Err(ReplayError::MissingWeights(_))
    ));

    std::fs::write(&weights, b"weights").unwrap();
    let recording = dir.path().join("bad.bin");
    std::fs::write(&recording, [0u8; 6]).unwrap();
    assert!(matches!(
      ReplayBackend::new()
        .with_recording(&recording)
        .compile(&weights, Accelerator::Cpu, None),
      Err(ReplayError::MisalignedTensor(6))
    ));
  }

  #[test]
  fn runtime_without_recording_fails_to_run() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.tflite");
    std::fs::write(&weights, b"weights").unwrap();

    let runtime = ReplayBackend::new()
      .compile(&weights, Accelerator::Cpu, None)
      .unwrap();
    let input = NhwcTensor::from(&RgbImage::new(32, 32));
    assert!(matches!(runtime.run(&input), Err(ReplayError::NoRecording)));
  }

  #[test]
  fn non_square_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.tflite");
    let recording = dir.path().join("output.bin");
    std::fs::write(&weights, b"weights").unwrap();
    write_f32(&recording, &[0.0]);

    let runtime = ReplayBackend::new()
      .with_recording(&recording)
      .compile(&weights, Accelerator::Cpu, None)
      .unwrap();
    let input = NhwcTensor::from(&RgbImage::new(32, 16));
    assert!(matches!(
      runtime.run(&input),
      Err(ReplayError::InputShape([16, 32, 3]))
    ));
  }
}
