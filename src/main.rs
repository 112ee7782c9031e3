// 该文件是 Xunmu （寻目） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use xunmu::{
  FromUrl,
  input::ImageFileInput,
  output::OutputWrapper,
  registry::ModelRegistry,
  runtime::ReplayBackend,
  service::{DetectionEndpoint, DetectionService},
  task::{OneShotTask, RepeatShotTask, Task, TaskConfig},
};

use crate::args::{Args, Command};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let registry = ModelRegistry::open(&args.store)?;
  info!("模型目录: {}", registry.root().display());

  match args.command {
    Command::Import { archive, gpu } => {
      let service = DetectionService::new(registry, ReplayBackend::new().with_gpu(gpu));
      let descriptor = service.import_model(&archive)?;
      println!("{}\t{}", descriptor.id(), descriptor.name());
    }
    Command::List => {
      for descriptor in registry.models() {
        println!(
          "{}\t{}\t{:?}\t{:?}\t{}\t{}",
          descriptor.id(),
          descriptor.name(),
          descriptor.version(),
          descriptor.accelerator(),
          descriptor.image_size(),
          descriptor.labels().join(",")
        );
      }
    }
    Command::Remove { id } => {
      let service = DetectionService::new(registry, ReplayBackend::new());
      if !service.remove_model(&id)? {
        anyhow::bail!("模型不存在: {}", id);
      }
    }
    Command::Detect {
      model,
      input,
      tensor,
      output,
      threshold,
      repeat,
      gpu,
    } => {
      info!("模型: {}", model);
      info!("输入来源: {}", input);
      info!("输出路径: {}", output);

      let backend = ReplayBackend::new().with_recording(tensor).with_gpu(gpu);
      let service = DetectionService::new(registry, backend);
      if !service.model_list().contains(&model) {
        anyhow::bail!("模型不存在: {}", model);
      }

      let input = ImageFileInput::from_url(&input)?;
      let output = OutputWrapper::from_url(&output)?;
      let config = TaskConfig {
        model_name: model,
        threshold,
      };

      if repeat > 1 {
        RepeatShotTask::new(config, repeat).run_task(input, &service, output)?;
      } else {
        OneShotTask::new(config).run_task(input, &service, output)?;
      }
    }
  }

  Ok(())
}
