// 该文件是 Xunmu （寻目） 项目的一部分。
// src/model.rs - 模型描述与检测结果
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

use serde::Serialize;

/// 解码得到的候选框，坐标位于模型输入（填充后方形画布）像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [left, top, right, bottom]
}

/// 最终检测结果，坐标位于原图像素空间
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

mod decoder;
mod descriptor;
mod nms;

pub use self::decoder::{DecodeError, Decoder, OutputLayout};
pub use self::descriptor::{
  Accelerator, BoxUnits, DescriptorBuilder, DescriptorError, ModelDescriptor, ModelMetadata,
  YoloVersion,
};
pub use self::nms::{IOU_THRESHOLD, intersection_over_union, non_max_suppression};
