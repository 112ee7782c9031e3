// 该文件是 Xunmu （寻目） 项目的一部分。
// src/output/json_file.rs - 检测结果写入 JSON 文件
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, service::DetectResponse};

#[derive(Error, Debug)]
pub enum JsonFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// `json://<path>[?pretty]`
pub struct JsonFileOutput {
  path: String,
  pretty: bool,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonFileError::SchemeMismatch(uri.scheme().to_string()));
    }

    let pretty = uri.query_pairs().any(|(key, value)| {
      key == "pretty" && !matches!(value.as_ref(), "false" | "0")
    });

    Ok(Self {
      path: uri.path().to_string(),
      pretty,
    })
  }
}

impl Render<RgbImage, DetectResponse> for JsonFileOutput {
  type Error = JsonFileError;

  fn render_result(&self, _frame: &RgbImage, result: &DetectResponse) -> Result<(), Self::Error> {
    let json = if self.pretty {
      serde_json::to_string_pretty(result)?
    } else {
      serde_json::to_string(result)?
    };

    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, json)?;
    info!("写入 {} 个检测结果到: {}", result.len(), self.path);

    Ok(())
  }
}
