// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 特征图解码
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
use tracing::{debug, trace};

use super::{
  TargetBox,
  anchor::{AnchorTable, OutputScale},
  category::classify,
};

#[derive(Error, Debug, PartialEq)]
pub enum ShapeError {
  /// `expected` 为 `None` 表示元素个数溢出
  #[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected:?} 个元素, 实际 {actual} 个")]
  DataLength {
    shape: [usize; 3],
    expected: Option<usize>,
    actual: usize,
  },
  #[error("输出 {scale:?} 通道数不匹配: 期望 {expected}, 实际 {actual}")]
  Channels {
    scale: OutputScale,
    expected: usize,
    actual: usize,
  },
  #[error("步长无效: 输入尺寸 {input:?} 与特征图尺寸 {feature:?} 不是相同的整数倍")]
  Stride {
    input: (usize, usize),
    feature: (usize, usize),
  },
  #[error("缺少输出 {0:?}")]
  MissingOutput(OutputScale),
  #[error("网格输出通道数不匹配: 期望 {expected}, 实际 {actual}")]
  GridChannels { expected: usize, actual: usize },
}

/// 形状的元素个数，溢出时为 `None`
pub fn element_count(shape: [usize; 3]) -> Option<usize> {
  shape
    .iter()
    .try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// 推理引擎输出的原始张量，布局为 `[height][width][channels]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  height: usize,
  width: usize,
  channels: usize,
  data: Vec<f32>,
}

impl RawTensor {
  pub fn new(
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
  ) -> Result<Self, ShapeError> {
    let shape = [height, width, channels];
    match element_count(shape) {
      Some(expected) if expected == data.len() => Ok(Self {
        height,
        width,
        channels,
        data,
      }),
      expected => Err(ShapeError::DataLength {
        shape,
        expected,
        actual: data.len(),
      }),
    }
  }

  /// 由平面布局 `[channels][height][width]` 的数据构造，内部转为按单元格排列
  pub fn from_chw(
    channels: usize,
    height: usize,
    width: usize,
    data: &[f32],
  ) -> Result<Self, ShapeError> {
    let shape = [channels, height, width];
    let plane = match element_count(shape) {
      Some(expected) if expected == data.len() => height * width,
      expected => {
        return Err(ShapeError::DataLength {
          shape,
          expected,
          actual: data.len(),
        });
      }
    };

    let mut cells = vec![0f32; data.len()];
    for (c, plane_values) in data.chunks_exact(plane.max(1)).enumerate() {
      for (i, &value) in plane_values.iter().enumerate() {
        cells[i * channels + c] = value;
      }
    }
    Self::new(height, width, channels, cells)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn shape(&self) -> [usize; 3] {
    [self.height, self.width, self.channels]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 单个网格单元的全部通道
  pub fn cell(&self, h: usize, w: usize) -> &[f32] {
    let start = (h * self.width + w) * self.channels;
    &self.data[start..start + self.channels]
  }
}

/// 带尺度标识的输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledOutput {
  pub scale: OutputScale,
  pub tensor: RawTensor,
}

/// 将两个尺度的原始输出解码为原图坐标下的候选框
///
/// 只有 `score > thresh` 的锚框会被保留。输出顺序为：尺度、行、列、锚框。
/// 输出必须按 [`OutputScale::ALL`] 的顺序各出现一次。
pub fn decode(
  outputs: &[ScaledOutput],
  table: &AnchorTable,
  scale_w: f32,
  scale_h: f32,
  thresh: f32,
) -> Result<Vec<TargetBox>, ShapeError> {
  let num_anchor = table.num_anchor();
  let num_category = table.num_category();
  let mut boxes = Vec::new();

  for scale in OutputScale::ALL {
    let tensor = outputs
      .iter()
      .find(|o| o.scale == scale)
      .map(|o| &o.tensor)
      .ok_or(ShapeError::MissingOutput(scale))?;

    if tensor.channels() != table.cell_channels() {
      return Err(ShapeError::Channels {
        scale,
        expected: table.cell_channels(),
        actual: tensor.channels(),
      });
    }
    let stride = table.stride(tensor.height(), tensor.width())? as f32;
    debug!(
      "输出 {:?}: {}x{}x{}, 步长 {}",
      scale,
      tensor.height(),
      tensor.width(),
      tensor.channels(),
      stride
    );

    for h in 0..tensor.height() {
      for w in 0..tensor.width() {
        let values = tensor.cell(h, w);
        for b in 0..num_anchor {
          let (category, score) = classify(values, b, num_anchor, num_category);
          if score <= thresh {
            continue;
          }

          let anchor = table.anchor(scale, b);
          let bcx = ((values[b * 4] * 2.0 - 0.5) + w as f32) * stride;
          let bcy = ((values[b * 4 + 1] * 2.0 - 0.5) + h as f32) * stride;
          let bw = (values[b * 4 + 2] * 2.0).powi(2) * anchor.width;
          let bh = (values[b * 4 + 3] * 2.0).powi(2) * anchor.height;

          let target = TargetBox {
            x1: (bcx - 0.5 * bw) * scale_w,
            y1: (bcy - 0.5 * bh) * scale_h,
            x2: (bcx + 0.5 * bw) * scale_w,
            y2: (bcy + 0.5 * bh) * scale_h,
            category,
            score,
          };
          trace!("候选框: {:?}", target);
          boxes.push(target);
        }
      }
    }
  }

  debug!("解码得到 {} 个候选框", boxes.len());
  Ok(boxes)
}
