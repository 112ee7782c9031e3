// 该文件是 Xunmu （寻目） 项目的一部分。
// src/letterbox.rs - 等比缩放填充与坐标还原
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

use image::{Rgb, RgbImage, imageops};
use tracing::debug;

use crate::model::{DetectItem, Detection};

/// 填充区域使用的中性灰
pub const LETTERBOX_FILL: [u8; 3] = [114, 114, 114];

/// 一次推理请求内的等比缩放参数
///
/// 同一个实例既用于前向的图像填充，也用于结果坐标的逆向还原。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterBox {
  scale: f32,
  offset_x: i32,
  offset_y: i32,
  target_width: u32,
  target_height: u32,
}

impl LetterBox {
  /// 仅计算几何参数，不处理像素
  pub fn compute(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> Self {
    let scale = f32::min(
      target_width as f32 / src_width as f32,
      target_height as f32 / src_height as f32,
    );
    let (resized_width, resized_height) = resized_dims(src_width, src_height, scale);

    Self {
      scale,
      offset_x: (target_width as i32 - resized_width as i32) / 2,
      offset_y: (target_height as i32 - resized_height as i32) / 2,
      target_width,
      target_height,
    }
  }

  /// 由已知参数直接构造
  pub fn from_parts(scale: f32, offset_x: i32, offset_y: i32, target_size: u32) -> Self {
    Self {
      scale,
      offset_x,
      offset_y,
      target_width: target_size,
      target_height: target_size,
    }
  }

  /// 单位变换（scale = 1，无偏移）
  pub fn identity(target_size: u32) -> Self {
    Self::from_parts(1.0, 0, 0, target_size)
  }

  /// 将图像等比缩放后居中粘贴到灰色画布上
  pub fn create(image: &RgbImage, target_width: u32, target_height: u32) -> (RgbImage, Self) {
    let (src_width, src_height) = image.dimensions();
    let letterbox = Self::compute(src_width, src_height, target_width, target_height);
    let (resized_width, resized_height) = resized_dims(src_width, src_height, letterbox.scale);

    debug!(
      "等比缩放: {}x{} -> {}x{}, 缩放 {:.4}, 偏移 ({}, {})",
      src_width,
      src_height,
      resized_width,
      resized_height,
      letterbox.scale,
      letterbox.offset_x,
      letterbox.offset_y
    );

    let resized = imageops::resize(
      image,
      resized_width,
      resized_height,
      imageops::FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb(LETTERBOX_FILL));
    imageops::overlay(
      &mut canvas,
      &resized,
      letterbox.offset_x as i64,
      letterbox.offset_y as i64,
    );

    (canvas, letterbox)
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn offset_x(&self) -> i32 {
    self.offset_x
  }

  pub fn offset_y(&self) -> i32 {
    self.offset_y
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  /// 原图坐标 -> 模型输入坐标
  pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale + self.offset_x as f32,
      y * self.scale + self.offset_y as f32,
    )
  }

  /// 模型输入坐标 -> 原图坐标
  pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.offset_x as f32) / self.scale,
      (y - self.offset_y as f32) / self.scale,
    )
  }

  /// 还原一个 `[left, top, right, bottom]` 框，不裁剪到原图边界
  pub fn restore_bbox(&self, bbox: &[f32; 4]) -> [f32; 4] {
    let (left, top) = self.inverse(bbox[0], bbox[1]);
    let (right, bottom) = self.inverse(bbox[2], bbox[3]);
    [left, top, right, bottom]
  }

  /// 将候选框映射回原图坐标，得到最终检测结果
  pub fn restore(&self, items: Vec<DetectItem>) -> Vec<Detection> {
    items
      .into_iter()
      .map(|item| {
        let [left, top, right, bottom] = self.restore_bbox(&item.bbox);
        Detection {
          label: item.label,
          confidence: item.score,
          left,
          top,
          right,
          bottom,
        }
      })
      .collect()
  }
}

fn resized_dims(src_width: u32, src_height: u32, scale: f32) -> (u32, u32) {
  let width = (src_width as f32 * scale).round().max(1.0) as u32;
  let height = (src_height as f32 * scale).round().max(1.0) as u32;
  (width, height)
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  #[test]
  fn wide_image_is_padded_vertically() {
    let image = RgbImage::from_pixel(100, 50, Rgb([10, 20, 30]));
    let (padded, letterbox) = LetterBox::create(&image, 640, 640);

    assert_relative_eq!(letterbox.scale(), 6.4, epsilon = 1e-6);
    assert_eq!(letterbox.offset_x(), 0);
    assert_eq!(letterbox.offset_y(), 160);
    assert_eq!(padded.dimensions(), (640, 640));
    assert_eq!(letterbox.target_size(), padded.dimensions());
    assert_eq!(padded.get_pixel(320, 10).0, LETTERBOX_FILL);
    assert_eq!(padded.get_pixel(320, 639).0, LETTERBOX_FILL);
    assert_eq!(padded.get_pixel(320, 320).0, [10, 20, 30]);
  }

  #[test]
  fn tall_image_is_padded_horizontally() {
    let letterbox = LetterBox::compute(300, 600, 320, 320);
    assert_relative_eq!(letterbox.scale(), 320.0 / 600.0);
    // 300 * 0.5333 = 160
    assert_eq!(letterbox.offset_x(), 80);
    assert_eq!(letterbox.offset_y(), 0);
  }

  #[test]
  fn odd_padding_floors() {
    // 缩放后宽度 639，剩余 1 像素，偏移取整为 0
    let letterbox = LetterBox::compute(640, 639, 640, 640);
    assert_eq!(letterbox.offset_x(), 0);
    assert_eq!(letterbox.offset_y(), 0);

    let letterbox = LetterBox::compute(640, 637, 640, 640);
    assert_eq!(letterbox.offset_y(), 1);
  }

  #[test]
  fn forward_then_inverse_round_trips() {
    let letterbox = LetterBox::from_parts(6.4, 0, 160, 640);
    for &(x, y) in &[(0.0, 0.0), (12.5, 47.25), (100.0, 50.0), (-3.0, 120.0)] {
      let (mx, my) = letterbox.forward(x, y);
      let (sx, sy) = letterbox.inverse(mx, my);
      assert_relative_eq!(sx, x, epsilon = 1e-4);
      assert_relative_eq!(sy, y, epsilon = 1e-4);
    }
  }

  #[test]
  fn restore_does_not_clamp() {
    let letterbox = LetterBox::from_parts(2.0, 0, 100, 640);
    let bbox = letterbox.restore_bbox(&[-20.0, 60.0, 700.0, 120.0]);
    assert_relative_eq!(bbox[0], -10.0);
    assert_relative_eq!(bbox[1], -20.0);
    assert_relative_eq!(bbox[2], 350.0);
    assert_relative_eq!(bbox[3], 10.0);
  }

  #[test]
  fn identity_keeps_coordinates() {
    let letterbox = LetterBox::identity(640);
    let detections = letterbox.restore(vec![DetectItem {
      class_id: 0,
      label: "cat".to_string(),
      score: 0.9,
      bbox: [288.0, 288.0, 352.0, 352.0],
    }]);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "cat");
    assert_relative_eq!(detections[0].left, 288.0);
    assert_relative_eq!(detections[0].bottom, 352.0);
  }
}
