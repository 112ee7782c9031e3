// 该文件是 Xunmu （寻目） 项目的一部分。
// src/model/nms.rs - 按类别的非极大值抑制
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

use std::collections::VecDeque;

use crate::model::DetectItem;

/// 同标签候选框 IoU 严格大于该值即被抑制
pub const IOU_THRESHOLD: f32 = 0.5;

/// 贪心 NMS，结果按置信度降序
pub fn non_max_suppression(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 稳定排序，置信度相同时保持原顺序
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut remaining = VecDeque::from(items);
  let mut kept = Vec::new();

  while let Some(best) = remaining.pop_front() {
    remaining.retain(|other| {
      other.label != best.label
        || intersection_over_union(&best.bbox, &other.bbox) <= iou_threshold
    });
    kept.push(best);
  }

  kept
}

/// 计算两个 `[left, top, right, bottom]` 框的 IoU
pub fn intersection_over_union(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let left = a[0].max(b[0]);
  let top = a[1].max(b[1]);
  let right = a[2].min(b[2]);
  let bottom = a[3].min(b[3]);

  let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
