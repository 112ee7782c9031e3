// 该文件是 Xunmu （寻目） 项目的一部分。
// tests/pipeline.rs - 端到端检测流程
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

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use approx::assert_relative_eq;
use image::RgbImage;

use xunmu::{
  letterbox::LetterBox,
  model::{Decoder, ModelDescriptor, YoloVersion},
  registry::ModelRegistry,
  runtime::ReplayBackend,
  service::{DetectRequest, DetectionEndpoint, DetectionService},
};

const BOX_COUNT: usize = 80 * 80 + 40 * 40 + 20 * 20;

/// 单个候选框的 V8 输出张量，标签为 cat/dog
fn dense_output(cell: usize, bbox: [f32; 4], scores: [f32; 2]) -> Vec<f32> {
  let mut data = vec![0.0f32; 6 * BOX_COUNT];
  for (channel, value) in bbox.iter().chain(scores.iter()).enumerate() {
    data[channel * BOX_COUNT + cell] = *value;
  }
  data
}

fn write_archive(path: &Path, metadata: &[u8]) {
  let mut builder = tar::Builder::new(File::create(path).unwrap());
  for (name, data) in [("metadata.json", metadata), ("yolov8n.tflite", b"weights".as_slice())] {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
  }
  builder.finish().unwrap();
}

fn write_f32(path: &Path, values: &[f32]) {
  let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
  std::fs::write(path, bytes).unwrap();
}

#[test]
fn dense_cell_maps_back_through_identity_letterbox() {
  let descriptor = ModelDescriptor::builder()
    .name("pets")
    .version(YoloVersion::V8)
    .labels(["cat", "dog"])
    .image_size(640)
    .build()
    .unwrap();
  let decoder = Decoder::for_model(&descriptor).unwrap();

  let output = dense_output(0, [320.0, 320.0, 64.0, 64.0], [0.9, 0.1]);
  let items = decoder.decode(&output, 0.5).unwrap();
  let detections = LetterBox::identity(640).restore(items);

  assert_eq!(detections.len(), 1);
  let cat = &detections[0];
  assert_eq!(cat.label, "cat");
  assert_relative_eq!(cat.confidence, 0.9);
  assert_relative_eq!(cat.left, 288.0);
  assert_relative_eq!(cat.top, 288.0);
  assert_relative_eq!(cat.right, 352.0);
  assert_relative_eq!(cat.bottom, 352.0);
}

#[test]
fn service_detects_after_import() {
  let dir = tempfile::tempdir().unwrap();
  let archive = dir.path().join("pets.tar");
  write_archive(
    &archive,
    br#"{"name":"pets","version":"yolov8n","labels":["cat","dog"],"imageSize":640}"#,
  );
  let recording = dir.path().join("output.bin");
  write_f32(
    &recording,
    &dense_output(42, [320.0, 320.0, 64.0, 64.0], [0.9, 0.1]),
  );

  let registry = ModelRegistry::open(dir.path().join("store")).unwrap();
  let service = DetectionService::new(registry, ReplayBackend::new().with_recording(&recording));
  service.import_model(&archive).unwrap();

  // 1280x640 缩放 0.5，上下各填充 160
  let request = DetectRequest::new(RgbImage::new(1280, 640), "pets", 0.5);
  let response = service.run_detection(&request);

  assert_eq!(response.len(), 1);
  let cat = &response.detections[0];
  assert_eq!(cat.label, "cat");
  assert_relative_eq!(cat.left, 576.0);
  assert_relative_eq!(cat.top, 256.0);
  assert_relative_eq!(cat.right, 704.0);
  assert_relative_eq!(cat.bottom, 384.0);

  // 阈值高于得分时结果为空，但仍然有效
  let strict = DetectRequest::new(RgbImage::new(1280, 640), "pets", 0.95);
  assert!(service.run_detection(&strict).is_empty());
}

#[test]
fn concurrent_requests_share_one_runtime() {
  let dir = tempfile::tempdir().unwrap();
  let archive = dir.path().join("pets.tar");
  write_archive(
    &archive,
    br#"{"name":"pets","version":"yolov8","labels":["cat","dog"]}"#,
  );
  let recording = dir.path().join("output.bin");
  write_f32(
    &recording,
    &dense_output(0, [320.0, 320.0, 64.0, 64.0], [0.2, 0.8]),
  );

  let registry = ModelRegistry::open(dir.path().join("store")).unwrap();
  let service = Arc::new(DetectionService::new(
    registry,
    ReplayBackend::new().with_recording(&recording),
  ));
  service.import_model(&archive).unwrap();

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let service = service.clone();
      std::thread::spawn(move || {
        let request = DetectRequest::new(RgbImage::new(640, 640), "pets", 0.5);
        service.run_detection(&request)
      })
    })
    .collect();

  for handle in handles {
    let response = handle.join().unwrap();
    assert_eq!(response.len(), 1);
    assert_eq!(response.detections[0].label, "dog");
  }
  assert_eq!(service.cache().len(), 1);
}
