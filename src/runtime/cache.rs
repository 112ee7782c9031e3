// 该文件是 Xunmu （寻目） 项目的一部分。
// src/runtime/cache.rs - 已编译模型缓存
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
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{Accelerator, ModelDescriptor};
use crate::runtime::RuntimeBackend;

#[derive(Error, Debug)]
pub enum CacheError<E>
where
  E: std::error::Error + 'static,
{
  #[error("模型 {0} 没有记录可用的加速器")]
  NoAccelerator(String),
  #[error("创建 GPU 环境失败: {0}")]
  Environment(#[source] E),
  #[error("模型编译失败: {0}")]
  Build(#[source] E),
}

/// 以模型 id 为键的运行时缓存
///
/// 每个 id 至多构建一次：同一 id 的构建由独立的键锁串行化，拿到锁后再次检查缓存。
/// 任意一次构建失败都会清空整个缓存，所有已缓存的运行时随之关闭
/// （调用方仍持有的 `Arc` 在释放后关闭）。
pub struct ModelCache<B: RuntimeBackend> {
  backend: B,
  environment: Mutex<Option<Arc<B::Environment>>>,
  entries: RwLock<HashMap<String, Arc<B::Runtime>>>,
  build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: RuntimeBackend> ModelCache<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      environment: Mutex::new(None),
      entries: RwLock::new(HashMap::new()),
      build_locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  /// 获取模型运行时，首次使用时按描述中的加速器构建
  pub fn get(
    &self,
    descriptor: &ModelDescriptor,
    weights: &Path,
  ) -> Result<Arc<B::Runtime>, CacheError<B::Error>> {
    let id = descriptor.id();
    if let Some(runtime) = self.lookup(id) {
      return Ok(runtime);
    }

    let key_lock = self.build_lock(id);
    let result = {
      let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
      match self.lookup(id) {
        Some(runtime) => Ok(runtime),
        None => self.build_and_insert(descriptor, weights),
      }
    };
    self.release_build_lock(id, &key_lock);
    result
  }

  fn build_and_insert(
    &self,
    descriptor: &ModelDescriptor,
    weights: &Path,
  ) -> Result<Arc<B::Runtime>, CacheError<B::Error>> {
    let id = descriptor.id();
    let accelerator = descriptor.accelerator();
    info!("构建模型运行时: {} ({:?})", descriptor.name(), accelerator);
    match self.build(id, weights, accelerator) {
      Ok(runtime) => {
        let runtime = Arc::new(runtime);
        self
          .entries
          .write()
          .unwrap_or_else(PoisonError::into_inner)
          .insert(id.to_string(), runtime.clone());
        Ok(runtime)
      }
      Err(e @ CacheError::NoAccelerator(_)) => {
        warn!("{}", e);
        Err(e)
      }
      Err(e) => {
        error!("模型 {} 构建失败: {}", descriptor.name(), e);
        let closed = self.clear();
        warn!("构建失败后清空缓存，关闭 {} 个运行时", closed);
        Err(e)
      }
    }
  }

  /// 导入时探测加速器：GPU 构建成功则为 GPU，否则回退 CPU
  pub fn select_accelerator(&self, weights: &Path) -> Accelerator {
    let selected = self.gpu_environment().and_then(|environment| {
      self
        .backend
        .compile(weights, Accelerator::Gpu, Some(&*environment))
        .map_err(CacheError::Build)
    });

    match selected {
      Ok(_runtime) => {
        info!("模型支持 GPU 加速");
        Accelerator::Gpu
      }
      Err(e) => {
        warn!("GPU 不可用，回退到 CPU: {}", e);
        Accelerator::Cpu
      }
    }
  }

  /// 移除单个模型的运行时
  pub fn evict(&self, id: &str) -> bool {
    let removed = self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(id);
    removed.is_some()
  }

  /// 一次性清空缓存，返回被移除的运行时数量
  pub fn clear(&self) -> usize {
    let drained = std::mem::take(&mut *self.entries.write().unwrap_or_else(PoisonError::into_inner));
    let count = drained.len();
    drop(drained);
    count
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, id: &str) -> bool {
    self.lookup(id).is_some()
  }

  fn lookup(&self, id: &str) -> Option<Arc<B::Runtime>> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(id)
      .cloned()
  }

  fn build_lock(&self, id: &str) -> Arc<Mutex<()>> {
    self
      .build_locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(id.to_string())
      .or_default()
      .clone()
  }

  /// 没有其他线程等待同一个键锁时将其移除
  fn release_build_lock(&self, id: &str, key_lock: &Arc<Mutex<()>>) {
    let mut locks = self
      .build_locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    // 表内一份，调用方一份
    if Arc::strong_count(key_lock) <= 2 {
      locks.remove(id);
    }
  }

  fn build(
    &self,
    id: &str,
    weights: &Path,
    accelerator: Accelerator,
  ) -> Result<B::Runtime, CacheError<B::Error>> {
    match accelerator {
      Accelerator::None => Err(CacheError::NoAccelerator(id.to_string())),
      Accelerator::Cpu => self
        .backend
        .compile(weights, Accelerator::Cpu, None)
        .map_err(CacheError::Build),
      Accelerator::Gpu => {
        let environment = self.gpu_environment()?;
        self
          .backend
          .compile(weights, Accelerator::Gpu, Some(&*environment))
          .map_err(CacheError::Build)
      }
    }
  }

  /// 进程内共享的 GPU 环境，首次需要时创建
  fn gpu_environment(&self) -> Result<Arc<B::Environment>, CacheError<B::Error>> {
    let mut slot = self
      .environment
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(environment) = slot.as_ref() {
      return Ok(environment.clone());
    }

    debug!("创建 GPU 环境");
    let environment = Arc::new(
      self
        .backend
        .create_environment()
        .map_err(CacheError::Environment)?,
    );
    *slot = Some(environment.clone());
    Ok(environment)
  }
}
