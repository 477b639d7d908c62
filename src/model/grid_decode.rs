// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/grid_decode.rs - 单输出网格解码
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


//! 单输出、无锚框的网格解码（FastestDet）
//!
//! 每个网格单元的通道为 `[obj, tx, ty, tw, th, 类别0, ..., 类别K]`。

use tracing::{debug, trace};

use super::{TargetBox, decode::{RawTensor, ShapeError}};

/// 网格单元中类别分数之前的通道数
pub const GRID_BOX_CHANNELS: usize = 5;

const CLASS_SCORE_WEIGHT: f32 = 0.4;
const OBJ_SCORE_WEIGHT: f32 = 0.6;

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 最佳类别及置信度 `max_cls^0.4 × obj^0.6`
///
/// 类别比较从 0 分开始且使用严格大于，因此全部类别分数不为正时返回类别 0、分数 0。
pub fn grid_score(cell: &[f32], num_category: usize) -> (usize, f32) {
  let obj_score = cell[0];
  let (category, max_score) = cell[GRID_BOX_CHANNELS..GRID_BOX_CHANNELS + num_category]
    .iter()
    .enumerate()
    .fold((0, 0.0f32), |(best, best_score), (c, &score)| {
      if score > best_score {
        (c, score)
      } else {
        (best, best_score)
      }
    });
  (
    category,
    max_score.powf(CLASS_SCORE_WEIGHT) * obj_score.powf(OBJ_SCORE_WEIGHT),
  )
}

/// 将网格输出解码为原图坐标下的候选框
///
/// 中心偏移经 `tanh`，宽高经 `sigmoid` 后为相对整图的比例。只保留 `score > thresh`
/// 的单元，输出按行、列顺序排列。
pub fn decode_grid(
  tensor: &RawTensor,
  num_category: usize,
  img_w: f32,
  img_h: f32,
  thresh: f32,
) -> Result<Vec<TargetBox>, ShapeError> {
  let expected = GRID_BOX_CHANNELS + num_category;
  if tensor.channels() != expected {
    return Err(ShapeError::GridChannels {
      expected,
      actual: tensor.channels(),
    });
  }

  let (out_h, out_w) = (tensor.height(), tensor.width());
  debug!("网格输出: {}x{}x{}", out_h, out_w, tensor.channels());

  let mut boxes = Vec::new();
  for h in 0..out_h {
    for w in 0..out_w {
      let values = tensor.cell(h, w);
      let (category, score) = grid_score(values, num_category);
      if score <= thresh {
        continue;
      }

      let cx = (w as f32 + values[1].tanh()) / out_w as f32;
      let cy = (h as f32 + values[2].tanh()) / out_h as f32;
      let bw = sigmoid(values[3]);
      let bh = sigmoid(values[4]);

      let target = TargetBox {
        x1: (cx - bw * 0.5) * img_w,
        y1: (cy - bh * 0.5) * img_h,
        x2: (cx + bw * 0.5) * img_w,
        y2: (cy + bh * 0.5) * img_h,
        category,
        score,
      };
      trace!("候选框: {:?}", target);
      boxes.push(target);
    }
  }

  debug!("解码得到 {} 个候选框", boxes.len());
  Ok(boxes)
}
