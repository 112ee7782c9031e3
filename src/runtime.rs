// 该文件是 Xunmu （寻目） 项目的一部分。
// src/runtime.rs - 推理运行时接口
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

use crate::{frame::NhwcTensor, model::Accelerator};

/// 已编译的模型
///
/// 输入为 `image_size x image_size x 3` 的 HWC 浮点张量，输出为一个或多个按版本约定展开的扁平张量。
/// 输入输出缓冲区在 `run` 返回时释放，无论成功与否。
pub trait ModelRuntime: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&self, input: &NhwcTensor) -> Result<Vec<Box<[f32]>>, Self::Error>;
}

/// 运行时构建器
pub trait RuntimeBackend: Send + Sync {
  type Runtime: ModelRuntime<Error = Self::Error>;
  /// GPU 加速所需的进程级共享环境
  type Environment: Send + Sync;
  type Error: std::error::Error + Send + Sync + 'static;

  fn create_environment(&self) -> Result<Self::Environment, Self::Error>;

  /// 使用指定加速器编译模型，GPU 构建时传入共享环境
  fn compile(
    &self,
    weights: &Path,
    accelerator: Accelerator,
    environment: Option<&Self::Environment>,
  ) -> Result<Self::Runtime, Self::Error>;
}

mod cache;
mod replay;

pub use self::cache::{CacheError, ModelCache};
pub use self::replay::{ReplayBackend, ReplayError, ReplayRuntime};
