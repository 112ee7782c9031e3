// 该文件是 Xunmu （寻目） 项目的一部分。
// src/model/decoder.rs - 模型输出张量解码
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{
  BoxUnits, DetectItem, IOU_THRESHOLD, ModelDescriptor, YoloVersion, non_max_suppression,
};

const FIXED_CANDIDATES: usize = 300;
const FIXED_CHANNELS: usize = 6;
const BOX_CHANNELS: usize = 4;

/// 输出张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// `(4 + 类别数) x 网格数`，按通道展开，需要 NMS
  Dense,
  /// 300 x `[left, top, right, bottom, score, class]`，运行时已去重
  FixedCandidates,
}

const LAYOUTS: [(YoloVersion, OutputLayout); 3] = [
  (YoloVersion::V8, OutputLayout::Dense),
  (YoloVersion::V10, OutputLayout::FixedCandidates),
  (YoloVersion::V11, OutputLayout::Dense),
];

impl OutputLayout {
  pub fn for_version(version: YoloVersion) -> Option<Self> {
    LAYOUTS
      .iter()
      .find(|(v, _)| *v == version)
      .map(|&(_, layout)| layout)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出张量长度不足: 期望至少 {expected}, 实际 {actual}")]
  TensorTooShort { expected: usize, actual: usize },
}

/// 按模型版本选定一次解码策略
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
  descriptor: &'a ModelDescriptor,
  layout: OutputLayout,
}

impl<'a> Decoder<'a> {
  /// 未知版本返回 None
  pub fn for_model(descriptor: &'a ModelDescriptor) -> Option<Self> {
    OutputLayout::for_version(descriptor.version()).map(|layout| Self { descriptor, layout })
  }

  pub fn layout(&self) -> OutputLayout {
    self.layout
  }

  /// 期望的输出张量长度
  pub fn expected_len(&self) -> usize {
    match self.layout {
      OutputLayout::Dense => {
        (BOX_CHANNELS + self.descriptor.labels().len()) * self.descriptor.box_count()
      }
      OutputLayout::FixedCandidates => FIXED_CANDIDATES * FIXED_CHANNELS,
    }
  }

  pub fn decode(&self, output: &[f32], conf_threshold: f32) -> Result<Vec<DetectItem>, DecodeError> {
    let expected = self.expected_len();
    if output.len() < expected {
      return Err(DecodeError::TensorTooShort {
        expected,
        actual: output.len(),
      });
    }

    let items = match self.layout {
      OutputLayout::Dense => {
        let candidates = self.decode_dense(output, conf_threshold);
        debug!("阈值过滤后候选框 {} 个", candidates.len());
        non_max_suppression(candidates, IOU_THRESHOLD)
      }
      OutputLayout::FixedCandidates => self.decode_fixed(output, conf_threshold),
    };

    debug!("解码得到 {} 个目标", items.len());
    Ok(items)
  }

  fn coord_scale(&self) -> f32 {
    match self.descriptor.box_units() {
      BoxUnits::Pixel => 1.0,
      BoxUnits::Normalized => self.descriptor.image_size() as f32,
    }
  }

  fn decode_dense(&self, output: &[f32], conf_threshold: f32) -> Vec<DetectItem> {
    let labels = self.descriptor.labels();
    let box_count = self.descriptor.box_count();
    let coord_scale = self.coord_scale();
    let mut items = Vec::new();

    for i in 0..box_count {
      let mut max_score = -1.0f32;
      let mut class_id = None;
      for c in 0..labels.len() {
        let score = output[(BOX_CHANNELS + c) * box_count + i];
        if score > max_score {
          max_score = score;
          class_id = Some(c);
        }
      }

      let Some(class_id) = class_id else {
        continue;
      };
      if max_score < conf_threshold {
        continue;
      }

      let cx = output[i] * coord_scale;
      let cy = output[box_count + i] * coord_scale;
      let w = output[2 * box_count + i] * coord_scale;
      let h = output[3 * box_count + i] * coord_scale;

      items.push(DetectItem {
        class_id,
        label: labels[class_id].clone(),
        score: max_score,
        bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      });
    }

    items
  }

  fn decode_fixed(&self, output: &[f32], conf_threshold: f32) -> Vec<DetectItem> {
    let labels = self.descriptor.labels();
    let coord_scale = self.coord_scale();

    output
      .chunks_exact(FIXED_CHANNELS)
      .take(FIXED_CANDIDATES)
      .filter_map(|candidate| {
        let score = candidate[4];
        if score < conf_threshold {
          return None;
        }

        let raw_class = candidate[5];
        let label = if raw_class >= 0.0 {
          labels.get(raw_class as usize)
        } else {
          None
        };
        let Some(label) = label else {
          warn!("候选框类别 {} 超出标签范围，已跳过", raw_class);
          return None;
        };

        Some(DetectItem {
          class_id: raw_class as usize,
          label: label.clone(),
          score,
          bbox: [
            candidate[0] * coord_scale,
            candidate[1] * coord_scale,
            candidate[2] * coord_scale,
            candidate[3] * coord_scale,
          ],
        })
      })
      .collect()
  }
}
