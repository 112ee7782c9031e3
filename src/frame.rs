// 该文件是 Xunmu （寻目） 项目的一部分。
// src/frame.rs - NHWC 浮点张量定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;
const PIXEL_SCALE: f32 = 255.0;

/// 模型输入张量，HWC 排列，数值已除以 255
#[derive(Debug, Clone)]
pub struct NhwcTensor {
  data: Box<[f32]>,
  width: usize,
  height: usize,
}

impl NhwcTensor {
  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 张量形状 `[height, width, channels]`
  pub fn shape(&self) -> [usize; 3] {
    [self.height, self.width, RGB_CHANNELS]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

impl From<&RgbImage> for NhwcTensor {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 的原始缓冲区本身就是 HWC 排列，通道顺序保持不变
    let data = image
      .as_raw()
      .iter()
      .map(|&value| value as f32 / PIXEL_SCALE)
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      data,
      width: width as usize,
      height: height as usize,
    }
  }
}

impl AsRef<[f32]> for NhwcTensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}
