// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/record_file.rs - 检测结果记录
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, label::Labels, model::TargetBox, output::Render, query_value};

#[derive(Error, Debug)]
pub enum RecordFileError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Record<'a> {
  width: u32,
  height: u32,
  detections: Vec<RecordItem<'a>>,
}

#[derive(Serialize)]
struct RecordItem<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  label: Option<&'a str>,
  #[serde(flatten)]
  target: &'a TargetBox,
}

/// 以 JSON 记录检测结果，`?labels=id` 时只写类别索引
pub struct RecordFileOutput {
  path: PathBuf,
  labels: Labels,
  label_with_name: bool,
}

impl FromUrlWithScheme for RecordFileOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordFileOutput {
  type Error = RecordFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordFileError::SchemeMismatch);
    }

    let label_with_name = query_value(uri, "labels").is_none_or(|v| v != "id");
    Ok(RecordFileOutput {
      path: PathBuf::from(uri.path()),
      labels: Labels::default(),
      label_with_name,
    })
  }
}

impl RecordFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    RecordFileOutput {
      path: path.into(),
      labels: Labels::default(),
      label_with_name: true,
    }
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<RgbImage, Vec<TargetBox>> for RecordFileOutput {
  type Error = RecordFileError;

  fn render_result(&self, frame: &RgbImage, result: &Vec<TargetBox>) -> Result<(), Self::Error> {
    let record = Record {
      width: frame.width(),
      height: frame.height(),
      detections: result
        .iter()
        .map(|target| RecordItem {
          label: self
            .label_with_name
            .then(|| self.labels.name(target.category)),
          target,
        })
        .collect(),
    };

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, serde_json::to_vec_pretty(&record)?)?;
    info!("记录 {} 个目标到文件: {}", result.len(), self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;

  fn boxes() -> Vec<TargetBox> {
    vec![TargetBox {
      x1: 1.5,
      y1: 2.0,
      x2: 30.0,
      y2: 40.0,
      category: 16,
      score: 0.75,
    }]
  }

  #[test]
  fn writes_named_detections() {
    let dir = tempfile::tempdir().unwrap();
    let output = RecordFileOutput::new(dir.path().join("out.json"));
    output.render_result(&RgbImage::new(64, 48), &boxes()).unwrap();

    let value: Value = serde_json::from_slice(&std::fs::read(output.path()).unwrap()).unwrap();
    assert_eq!(value["width"], 64);
    assert_eq!(value["height"], 48);
    let item = &value["detections"][0];
    assert_eq!(item["label"], "dog");
    assert_eq!(item["category"], 16);
    assert_eq!(item["x1"], 1.5);
    assert_eq!(item["score"], 0.75);
  }

  #[test]
  fn id_only_records_skip_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ids.json");
    let url = Url::parse(&format!("record://{}?labels=id", path.display())).unwrap();
    let output = RecordFileOutput::from_url(&url).unwrap();
    output.render_result(&RgbImage::new(4, 4), &boxes()).unwrap();

    let value: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(value["detections"][0].get("label").is_none());
    assert_eq!(value["detections"][0]["category"], 16);
  }
}
