// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::{label::Labels, model::TargetBox};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const NUM_COLORS: usize = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  labels: Labels,
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      labels: Labels::default(),
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      thickness: BOX_THICKNESS,
    }
  }
}

/// 按类别取色，色相均匀分布
pub fn category_color(category: usize) -> Rgb<u8> {
  let hue = (category % NUM_COLORS) as f32 / NUM_COLORS as f32 * 360.0;
  hsv_to_rgb(hue, 0.8, 0.9)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  /// 加载 TTF/OTF 字体，用于绘制类别标签；未设置字体时只绘制边框
  pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  pub fn draw_detections(&self, image: &mut RgbImage, boxes: &[TargetBox]) {
    for target in boxes {
      self.draw_target(image, target);
    }
  }

  fn draw_target(&self, image: &mut RgbImage, target: &TargetBox) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let (x1, y1, x2, y2) = target.pixel_rect();
    let x_min = x1.clamp(0, w - 1);
    let y_min = y1.clamp(0, h - 1);
    let x_max = x2.clamp(0, w - 1);
    let y_max = y2.clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = category_color(target.category);
    for t in 0..self.thickness {
      let rect_w = x_max - x_min + 1 - 2 * t;
      let rect_h = y_max - y_min + 1 - 2 * t;
      if rect_w <= 0 || rect_h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(rect_w as u32, rect_h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", self.labels.name(target.category), target.score);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x);
    if label_width > 0 {
      let rect =
        Rect::at(label_x, label_y).of_size(label_width as u32, self.label_text_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}
