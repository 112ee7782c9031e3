// 该文件是 Xunmu （寻目） 项目的一部分。
// src/task.rs - 检测任务
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

use std::time::Duration;

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  output::Render,
  service::{DetectRequest, DetectResponse, DetectionEndpoint},
};

/// 预热轮数，不计入平均耗时
const WARMUP_RUNS: usize = 2;

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, endpoint: &E, output: O) -> Result<(), Self::Error>;
}

/// 单次检测所需的模型名称与阈值
#[derive(Debug, Clone)]
pub struct TaskConfig {
  pub model_name: String,
  pub threshold: f32,
}

impl TaskConfig {
  fn request(&self, image: RgbImage) -> DetectRequest {
    DetectRequest::new(image, self.model_name.clone(), self.threshold)
  }
}

pub struct OneShotTask {
  config: TaskConfig,
}

impl OneShotTask {
  pub fn new(config: TaskConfig) -> Self {
    Self { config }
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  E: DetectionEndpoint,
  O: Render<RgbImage, DetectResponse, Error = RE>,
> Task<I, E, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, endpoint: &E, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let request = self.config.request(frame);
    let now = std::time::Instant::now();
    let result = endpoint.run_detection(&request);
    let elapsed = now.elapsed();
    info!("推理完成，{} 个目标，耗时: {:.2?}", result.len(), elapsed);
    output.render_result(&request.image, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 重复检测同一帧以测量平均耗时
pub struct RepeatShotTask {
  config: TaskConfig,
  times: usize,
}

impl RepeatShotTask {
  pub fn new(config: TaskConfig, times: usize) -> Self {
    Self {
      config,
      times: times.max(1),
    }
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  E: DetectionEndpoint,
  O: Render<RgbImage, DetectResponse, Error = RE>,
> Task<I, E, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, endpoint: &E, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let request = self.config.request(frame);
    let mut times = Vec::with_capacity(self.times);
    let mut last = DetectResponse::default();
    for i in 0..self.times {
      let now = std::time::Instant::now();
      last = endpoint.run_detection(&request);
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
    }
    output.render_result(&request.image, &last)?;

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = times.get(WARMUP_RUNS..)?;
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}
