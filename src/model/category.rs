// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/category.rs - 类别打分
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

/// 计算某个锚框的最佳类别及其置信度
///
/// 单元格数据布局为：
/// `[anchor0 回归(4), ..., anchorN 回归(4), anchor0 目标分数, ..., anchorN 目标分数, 类别0, ..., 类别K]`
///
/// 置信度为 `目标分数 × 类别分数`。比较使用严格大于，分数相同时保留索引较小的类别；
/// NaN 永远不会胜出。调用方需保证 `cell.len() >= 5 * num_anchor + num_category`。
///
/// 折叠从负无穷开始，因此全部乘积为负时仍返回其中最大的类别。
/// 检测流程拒绝负的置信度阈值，这类分数不会通过 `score > thresh`。
pub fn classify(
  cell: &[f32],
  anchor_slot: usize,
  num_anchor: usize,
  num_category: usize,
) -> (usize, f32) {
  let obj_score = cell[4 * num_anchor + anchor_slot];
  let class_scores = &cell[5 * num_anchor..5 * num_anchor + num_category];

  class_scores
    .iter()
    .enumerate()
    .fold((0, f32::NEG_INFINITY), |(best, best_score), (c, &raw)| {
      let score = raw * obj_score;
      if score > best_score {
        (c, score)
      } else {
        (best, best_score)
      }
    })
}
