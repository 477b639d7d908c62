// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 模型输入张量
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

use image::{RgbImage, imageops::FilterType};
use serde::{Deserialize, Serialize};

const RGB_CHANNELS: usize = 3;
const NORM_VALUE: f32 = 1.0 / 255.0;

/// 模型训练时使用的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  Rgb,
  #[default]
  Bgr,
}

impl ChannelOrder {
  /// 输出通道 `c` 对应的 RGB 像素分量
  fn source_channel(self, c: usize) -> usize {
    match self {
      ChannelOrder::Rgb => c,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
    }
  }
}

/// 归一化后的模型输入，布局为 `[c][h][w]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl InputTensor {
  /// 拉伸缩放到模型输入尺寸，调整通道顺序，并按 1/255 归一化（均值为 0）
  pub fn from_image(
    image: &RgbImage,
    width: usize,
    height: usize,
    order: ChannelOrder,
  ) -> Self {
    let resized = if image.dimensions() == (width as u32, height as u32) {
      image.clone()
    } else {
      image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle)
    };

    let plane_size = width * height;
    let mut data = vec![0f32; plane_size * RGB_CHANNELS];
    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane_size + idx] = pixel[order.source_channel(c)] as f32 * NORM_VALUE;
      }
    }

    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_chw(&self) -> &[f32] {
    &self.data
  }

  pub fn channel(&self, c: usize) -> &[f32] {
    let plane_size = self.width * self.height;
    &self.data[c * plane_size..(c + 1) * plane_size]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn bgr_order_swaps_planes_and_normalizes() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let tensor = InputTensor::from_image(&image, 2, 2, ChannelOrder::Bgr);
    assert_eq!(tensor.as_chw().len(), 12);
    assert!(tensor.channel(0).iter().all(|&v| (v - 0.2).abs() < 1e-6));
    assert!(tensor.channel(1).iter().all(|&v| v == 0.0));
    assert!(tensor.channel(2).iter().all(|&v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn rgb_order_keeps_planes() {
    let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 51]));
    let tensor = InputTensor::from_image(&image, 1, 1, ChannelOrder::Rgb);
    assert!((tensor.channel(0)[0] - 1.0).abs() < 1e-6);
    assert!((tensor.channel(2)[0] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn resizes_to_model_input() {
    let image = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
    let tensor = InputTensor::from_image(&image, 352, 352, ChannelOrder::Bgr);
    assert_eq!((tensor.channels(), tensor.width(), tensor.height()), (3, 352, 352));
    assert_eq!(tensor.as_chw().len(), 3 * 352 * 352);
    // 纯色图像缩放后仍是纯色
    assert!(tensor.channel(0).iter().all(|&v| (v - 30.0 / 255.0).abs() < 1e-6));
  }

  #[test]
  fn pixel_layout_is_planar_row_major() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(1, 0, Rgb([255, 255, 255]));
    let tensor = InputTensor::from_image(&image, 2, 1, ChannelOrder::Rgb);
    let plane = tensor.channel(1);
    assert_eq!(plane[0], 0.0);
    assert!((plane[1] - 1.0).abs() < 1e-6);
  }
}
