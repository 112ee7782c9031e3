// 该文件是 Xunmu （寻目） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

/// Xunmu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录
  #[arg(long, global = true, default_value = "models", value_name = "DIR")]
  pub store: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 导入模型包（zip 或 tar）
  Import {
    /// 模型包路径，需包含 metadata.json 与 .tflite 权重
    #[arg(long, value_name = "FILE")]
    archive: PathBuf,
    /// 允许使用 GPU
    #[arg(long)]
    gpu: bool,
  },
  /// 列出已安装的模型
  List,
  /// 删除模型
  Remove {
    #[arg(long, value_name = "ID")]
    id: String,
  },
  /// 运行检测
  Detect {
    /// 模型名称
    #[arg(long, value_name = "NAME")]
    model: String,
    /// 输入来源，例如 image:///path/to/input.jpg
    #[arg(long, value_name = "SOURCE")]
    input: Url,
    /// 录制的模型输出张量（小端 f32）
    #[arg(long, value_name = "FILE")]
    tensor: PathBuf,
    /// 输出路径，支持 image://（可加 ?font=字体文件）与 json://（可加 ?pretty）
    #[arg(long, value_name = "OUTPUT", default_value = "json:///dev/stdout?pretty")]
    output: Url,
    /// 置信度阈值 (0.0 - 1.0)
    #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
    threshold: f32,
    /// 重复次数，大于 1 时报告平均耗时
    #[arg(long, default_value = "1", value_name = "COUNT")]
    repeat: usize,
    /// 允许使用 GPU
    #[arg(long)]
    gpu: bool,
  },
}
