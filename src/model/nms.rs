// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use super::TargetBox;

/// 两个框的相交面积，不相交时为 0
pub fn intersection_area(a: &TargetBox, b: &TargetBox) -> f32 {
  if a.x1 > b.x2 || a.x2 < b.x1 || a.y1 > b.y2 || a.y2 < b.y1 {
    return 0.0;
  }

  let inter_width = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
  let inter_height = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
  inter_width * inter_height
}

/// 交并比；并集面积不为正（退化框）或为 NaN 时返回 0
pub fn iou(a: &TargetBox, b: &TargetBox) -> f32 {
  let inter = intersection_area(a, b);
  let union = a.area() + b.area() - inter;
  if union > 0.0 { inter / union } else { 0.0 }
}

/// 排序键：`-0.0` 与 `0.0` 视为同一分数
fn score_key(score: f32) -> f32 {
  if score == 0.0 { 0.0 } else { score }
}

/// 按类别的贪心 NMS
///
/// 候选框按分数降序稳定排序；若与已接受的同类别框 IoU 大于 `iou_thresh` 则丢弃。
/// 返回值按接受顺序排列，即分数降序。
///
/// 相等分数（包括 `-0.0` 与 `0.0`）保持输入顺序。NaN 按 `f32::total_cmp` 排列：
/// 正 NaN 排在最前，负 NaN 排在最后。`decode` 不会产生 NaN 分数。
pub fn nms(mut boxes: Vec<TargetBox>, iou_thresh: f32) -> Vec<TargetBox> {
  boxes.sort_by(|a, b| score_key(b.score).total_cmp(&score_key(a.score)));

  let mut picked: Vec<TargetBox> = Vec::with_capacity(boxes.len());
  for candidate in boxes {
    let suppressed = picked
      .iter()
      .any(|kept| kept.category == candidate.category && iou(&candidate, kept) > iou_thresh);
    if !suppressed {
      picked.push(candidate);
    }
  }

  debug!("NMS 后保留 {} 个目标", picked.len());
  picked
}

#[cfg(test)]
mod tests {
  use super::*;

  fn target(x1: f32, y1: f32, x2: f32, y2: f32, category: usize, score: f32) -> TargetBox {
    TargetBox {
      x1,
      y1,
      x2,
      y2,
      category,
      score,
    }
  }

  #[test]
  fn iou_of_known_overlap() {
    let a = target(0.0, 0.0, 10.0, 10.0, 0, 1.0);
    let b = target(5.0, 5.0, 15.0, 15.0, 0, 1.0);
    assert_eq!(intersection_area(&a, &b), 25.0);
    assert!((iou(&a, &b) - 25.0 / 175.0).abs() < 1e-6);
    assert!((a.iou(&b) - 0.142857).abs() < 1e-5);
  }

  #[test]
  fn disjoint_and_touching_boxes_do_not_overlap() {
    let a = target(0.0, 0.0, 10.0, 10.0, 0, 1.0);
    let far = target(20.0, 20.0, 30.0, 30.0, 0, 1.0);
    let touching = target(10.0, 0.0, 20.0, 10.0, 0, 1.0);
    assert_eq!(intersection_area(&a, &far), 0.0);
    assert_eq!(iou(&a, &touching), 0.0);
  }

  #[test]
  fn degenerate_boxes_have_zero_iou() {
    let point = target(3.0, 3.0, 3.0, 3.0, 0, 1.0);
    assert_eq!(iou(&point, &point), 0.0);

    let inverted = target(10.0, 10.0, 0.0, 0.0, 0, 1.0);
    let normal = target(0.0, 0.0, 10.0, 10.0, 0, 1.0);
    assert_eq!(iou(&inverted, &normal), 0.0);

    let nan = target(f32::NAN, 0.0, 10.0, 10.0, 0, 1.0);
    assert_eq!(iou(&nan, &normal), 0.0);
  }

  #[test]
  fn suppresses_same_category_overlap() {
    let boxes = vec![
      target(1.0, 1.0, 11.0, 11.0, 2, 0.6),
      target(0.0, 0.0, 10.0, 10.0, 2, 0.9),
    ];
    let kept = nms(boxes, 0.25);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn keeps_overlap_across_categories() {
    let boxes = vec![
      target(0.0, 0.0, 10.0, 10.0, 0, 0.9),
      target(0.0, 0.0, 10.0, 10.0, 1, 0.8),
    ];
    assert_eq!(nms(boxes, 0.25).len(), 2);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    let a = target(0.0, 0.0, 10.0, 10.0, 0, 0.9);
    let b = target(5.0, 5.0, 15.0, 15.0, 0, 0.8);
    let thresh = iou(&a, &b);
    assert_eq!(nms(vec![a, b], thresh).len(), 2);
  }

  #[test]
  fn output_is_score_descending_and_stable() {
    let boxes = vec![
      target(0.0, 0.0, 1.0, 1.0, 0, 0.5),
      target(10.0, 0.0, 11.0, 1.0, 0, 0.7),
      target(20.0, 0.0, 21.0, 1.0, 0, 0.5),
      target(30.0, 0.0, 31.0, 1.0, 0, 0.9),
      target(40.0, 0.0, 41.0, 1.0, 0, 0.5),
    ];
    let kept = nms(boxes, 0.25);
    let xs: Vec<f32> = kept.iter().map(|b| b.x1).collect();
    assert_eq!(xs, vec![30.0, 10.0, 0.0, 20.0, 40.0]);
  }

  #[test]
  fn signed_zero_scores_tie() {
    let boxes = vec![
      target(0.0, 0.0, 1.0, 1.0, 0, -0.0),
      target(10.0, 10.0, 11.0, 11.0, 0, 0.0),
      target(20.0, 20.0, 21.0, 21.0, 0, -0.0),
    ];
    let xs: Vec<f32> = nms(boxes, 0.25).iter().map(|b| b.x1).collect();
    assert_eq!(xs, vec![0.0, 10.0, 20.0]);
  }

  #[test]
  fn nan_scores_follow_total_order() {
    let boxes = vec![
      target(0.0, 0.0, 1.0, 1.0, 0, 0.5),
      target(10.0, 10.0, 11.0, 11.0, 0, f32::NAN),
      target(20.0, 20.0, 21.0, 21.0, 0, -f32::NAN),
    ];
    let xs: Vec<f32> = nms(boxes, 0.25).iter().map(|b| b.x1).collect();
    assert_eq!(xs, vec![10.0, 0.0, 20.0]);
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(nms(Vec::new(), 0.25).is_empty());
  }
}
