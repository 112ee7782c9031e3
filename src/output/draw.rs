// 该文件是 Xunmu （寻目） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontVec, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::model::Detection;

const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BOX_THICKNESS: i32 = 2;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("读取字体文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(#[from] InvalidFont),
}

pub struct Draw {
  color: [u8; 3],
  thickness: i32,
  /// 未提供字体时只绘制边框
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: BOX_COLOR,
      thickness: BOX_THICKNESS,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  /// 载入 TTF/OTF 字体，用于绘制 "标签 置信度"
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在原图上绘制检测框；坐标仅在绘制时裁剪到图像范围内
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      if detection.width() <= 0.0 || detection.height() <= 0.0 {
        continue;
      }
      if let Some((x_min, y_min)) = self.draw_bbox(image, detection) {
        self.draw_label(image, detection, x_min, y_min);
      }
    }
  }

  /// 返回裁剪后框的左上角，框完全落在图像外时返回 None
  fn draw_bbox(&self, image: &mut RgbImage, detection: &Detection) -> Option<(i32, i32)> {
    if image.width() == 0 || image.height() == 0 {
      return None;
    }
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = (detection.left.floor() as i32).clamp(0, w - 1);
    let y_min = (detection.top.floor() as i32).clamp(0, h - 1);
    let x_max = (detection.right.ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.bottom.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    // 向内加粗
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }

    Some((x_min, y_min))
  }

  fn draw_label(&self, image: &mut RgbImage, detection: &Detection, x_min: i32, y_min: i32) {
    let Some(font) = &self.font else {
      return;
    };
    let label = format!("{} {:.2}", detection.label, detection.confidence);

    // 标签放在边框上方，超出图像时贴边
    let text_width = (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = x_min.max(0);
    let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(image.width() as i32 - label_x);
    if label_width <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, Rgb(self.color));
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      PxScale::from(LABEL_FONT_SIZE),
      font,
      &label,
    );
  }
}
