// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/anchor.rs - 锚框表
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

use serde::{Deserialize, Serialize};

use super::decode::ShapeError;

/// 输出尺度标识，顺序与模型输出一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputScale {
  /// 第一个输出，分辨率较高（YOLO-Fastest v2 中为 22x22）
  Fine,
  /// 第二个输出，分辨率较低（YOLO-Fastest v2 中为 11x11）
  Coarse,
}

impl OutputScale {
  pub const ALL: [OutputScale; 2] = [OutputScale::Fine, OutputScale::Coarse];

  pub fn index(self) -> usize {
    match self {
      OutputScale::Fine => 0,
      OutputScale::Coarse => 1,
    }
  }
}

/// 锚框宽高先验
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
  pub width: f32,
  pub height: f32,
}

impl Anchor {
  pub const fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

/// 单个输出尺度的配置：输出节点名称与该尺度的锚框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
  pub output_name: String,
  pub anchors: Vec<Anchor>,
}

/// 锚框表，构造后不可变
///
/// 由 [`super::ModelConfig::anchor_table`] 校验后生成，保证两个尺度的锚框数量一致且非零。
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable {
  input_width: usize,
  input_height: usize,
  num_category: usize,
  num_anchor: usize,
  scales: [ScaleParams; 2],
}

impl AnchorTable {
  pub(crate) fn new_unchecked(
    input_width: usize,
    input_height: usize,
    num_category: usize,
    scales: [ScaleParams; 2],
  ) -> Self {
    let num_anchor = scales[0].anchors.len();
    Self {
      input_width,
      input_height,
      num_category,
      num_anchor,
      scales,
    }
  }

  pub fn input_width(&self) -> usize {
    self.input_width
  }

  pub fn input_height(&self) -> usize {
    self.input_height
  }

  pub fn num_category(&self) -> usize {
    self.num_category
  }

  /// 每个尺度的锚框数量
  pub fn num_anchor(&self) -> usize {
    self.num_anchor
  }

  pub fn output_name(&self, scale: OutputScale) -> &str {
    &self.scales[scale.index()].output_name
  }

  pub fn anchor(&self, scale: OutputScale, slot: usize) -> Anchor {
    self.scales[scale.index()].anchors[slot]
  }

  /// 每个网格单元的通道数：所有锚框的回归值、目标分数，以及共享的类别分数
  pub fn cell_channels(&self) -> usize {
    self.num_anchor * 5 + self.num_category
  }

  /// 根据特征图尺寸计算步长，宽高比例必须是相同的整数
  pub fn stride(&self, feature_height: usize, feature_width: usize) -> Result<usize, ShapeError> {
    let mismatch = || ShapeError::Stride {
      input: (self.input_width, self.input_height),
      feature: (feature_width, feature_height),
    };
    if feature_height == 0 || feature_width == 0 {
      return Err(mismatch());
    }
    if self.input_height % feature_height != 0 || self.input_width % feature_width != 0 {
      return Err(mismatch());
    }
    let stride = self.input_height / feature_height;
    if self.input_width / feature_width != stride {
      return Err(mismatch());
    }
    Ok(stride)
  }
}
