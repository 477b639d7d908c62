// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/config.rs - 模型配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use super::anchor::{Anchor, AnchorTable, ScaleParams};
use crate::frame::ChannelOrder;

const YOLO_FASTEST_INPUT_NAME: &str = "input.1";
const YOLO_FASTEST_INPUT_W: usize = 352;
const YOLO_FASTEST_INPUT_H: usize = 352;
const YOLO_FASTEST_CLASS_NUM: usize = 80;
const YOLO_FASTEST_NMS_THRESH: f32 = 0.25;
const YOLO_FASTEST_OBJECT_THRESH: f32 = 0.3;
const YOLO_FASTEST_NUM_THREADS: usize = 4;
// 22x22
const YOLO_FASTEST_FINE_OUTPUT: &str = "794";
// 11x11
const YOLO_FASTEST_COARSE_OUTPUT: &str = "796";
const YOLO_FASTEST_ANCHORS: [[Anchor; 3]; 2] = [
  [
    Anchor::new(12.64, 19.39),
    Anchor::new(37.88, 51.48),
    Anchor::new(55.71, 138.31),
  ],
  [
    Anchor::new(126.91, 78.23),
    Anchor::new(131.57, 214.55),
    Anchor::new(279.92, 258.87),
  ],
];

const FASTEST_DET_OUTPUT: &str = "758";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

fn invalid(msg: String) -> Result<(), ConfigError> {
  error!("{}", msg);
  Err(ConfigError::Invalid(msg))
}

/// 两种检测器共有的检查：输入尺寸、类别数与阈值
fn validate_common(
  input_size: (usize, usize),
  num_category: usize,
  thresh: f32,
  nms_thresh: f32,
) -> Result<(), ConfigError> {
  let (input_width, input_height) = input_size;
  if input_width == 0 || input_height == 0 {
    return invalid(format!(
      "输入尺寸必须大于 0, 实际为 {}x{}",
      input_width, input_height
    ));
  }
  if num_category == 0 {
    return invalid("类别数量必须大于 0".to_string());
  }
  if !thresh.is_finite() || !nms_thresh.is_finite() {
    return invalid(format!(
      "阈值必须是有限数值: thresh = {}, nms_thresh = {}",
      thresh, nms_thresh
    ));
  }
  if thresh < 0.0 {
    return invalid(format!("置信度阈值不能为负: {}", thresh));
  }
  Ok(())
}

/// 模型配置，默认值对应预训练的 YOLO-Fastest v2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  pub input_name: String,
  pub input_width: usize,
  pub input_height: usize,
  pub num_category: usize,
  pub nms_thresh: f32,
  /// `detect` 未指定阈值时使用
  pub thresh: f32,
  /// 透传给推理引擎的线程数
  pub num_threads: usize,
  pub channel_order: ChannelOrder,
  pub scales: [ScaleParams; 2],
}

impl Default for ModelConfig {
  fn default() -> Self {
    let [fine, coarse] = YOLO_FASTEST_ANCHORS;
    Self {
      input_name: YOLO_FASTEST_INPUT_NAME.to_string(),
      input_width: YOLO_FASTEST_INPUT_W,
      input_height: YOLO_FASTEST_INPUT_H,
      num_category: YOLO_FASTEST_CLASS_NUM,
      nms_thresh: YOLO_FASTEST_NMS_THRESH,
      thresh: YOLO_FASTEST_OBJECT_THRESH,
      num_threads: YOLO_FASTEST_NUM_THREADS,
      channel_order: ChannelOrder::Bgr,
      scales: [
        ScaleParams {
          output_name: YOLO_FASTEST_FINE_OUTPUT.to_string(),
          anchors: fine.to_vec(),
        },
        ScaleParams {
          output_name: YOLO_FASTEST_COARSE_OUTPUT.to_string(),
          anchors: coarse.to_vec(),
        },
      ],
    }
  }
}

impl ModelConfig {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: ModelConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    debug!("读取模型配置: {}", path.as_ref().display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_common(
      (self.input_width, self.input_height),
      self.num_category,
      self.thresh,
      self.nms_thresh,
    )?;

    let [fine, coarse] = &self.scales;
    if fine.anchors.is_empty() || fine.anchors.len() != coarse.anchors.len() {
      return invalid(format!(
        "各尺度锚框数量必须相同且非零, 实际为 {} 与 {}",
        fine.anchors.len(),
        coarse.anchors.len()
      ));
    }
    if fine.output_name == coarse.output_name {
      return invalid(format!("输出名称重复: {}", fine.output_name));
    }
    Ok(())
  }

  /// 校验配置并生成锚框表
  pub fn anchor_table(&self) -> Result<AnchorTable, ConfigError> {
    self.validate()?;
    Ok(AnchorTable::new_unchecked(
      self.input_width,
      self.input_height,
      self.num_category,
      self.scales.clone(),
    ))
  }
}

/// FastestDet 配置，默认值对应预训练模型
///
/// 与 [`ModelConfig`] 相比没有锚框，只有一个网格输出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastestDetConfig {
  pub input_name: String,
  pub input_width: usize,
  pub input_height: usize,
  pub num_category: usize,
  pub nms_thresh: f32,
  pub thresh: f32,
  pub num_threads: usize,
  pub channel_order: ChannelOrder,
  pub output_name: String,
}

impl Default for FastestDetConfig {
  fn default() -> Self {
    Self {
      input_name: YOLO_FASTEST_INPUT_NAME.to_string(),
      input_width: YOLO_FASTEST_INPUT_W,
      input_height: YOLO_FASTEST_INPUT_H,
      num_category: YOLO_FASTEST_CLASS_NUM,
      nms_thresh: YOLO_FASTEST_NMS_THRESH,
      thresh: YOLO_FASTEST_OBJECT_THRESH,
      num_threads: YOLO_FASTEST_NUM_THREADS,
      channel_order: ChannelOrder::Rgb,
      output_name: FASTEST_DET_OUTPUT.to_string(),
    }
  }
}

impl FastestDetConfig {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: FastestDetConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    debug!("读取模型配置: {}", path.as_ref().display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_common(
      (self.input_width, self.input_height),
      self.num_category,
      self.thresh,
      self.nms_thresh,
    )?;
    if self.output_name.is_empty() {
      return invalid("输出名称不能为空".to_string());
    }
    Ok(())
  }
}
