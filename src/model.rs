// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, engine::InferenceEngine};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测目标框，坐标位于原始图像像素空间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  /// 类别索引
  pub category: usize,
  /// 置信度（目标分数 × 类别分数）
  pub score: f32,
}

impl TargetBox {
  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn intersection_area(&self, other: &TargetBox) -> f32 {
    nms::intersection_area(self, other)
  }

  pub fn iou(&self, other: &TargetBox) -> f32 {
    nms::iou(self, other)
  }

  /// 截断为整数像素坐标 (x1, y1, x2, y2)，用于绘制
  pub fn pixel_rect(&self) -> (i32, i32, i32, i32) {
    (
      self.x1 as i32,
      self.y1 as i32,
      self.x2 as i32,
      self.y2 as i32,
    )
  }
}

pub mod anchor;
pub mod category;
pub mod config;
pub mod decode;
mod fastest_det;
pub mod grid_decode;
pub mod nms;
mod yolo_fastest;

pub use self::anchor::{Anchor, AnchorTable, OutputScale, ScaleParams};
pub use self::config::{ConfigError, FastestDetConfig, ModelConfig};
pub use self::decode::{RawTensor, ScaledOutput, ShapeError};
pub use self::fastest_det::{FastestDet, FastestDetBuilder, FastestDetError};
pub use self::yolo_fastest::{YoloFastest, YoloFastestBuilder, YoloFastestError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("YOLO-Fastest 错误: {0}")]
  YoloFastestError(#[from] YoloFastestError),
  #[error("FastestDet 错误: {0}")]
  FastestDetError(#[from] FastestDetError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择检测器的构建器
#[derive(Debug, Clone)]
pub enum ModelBuilder {
  YoloFastest(YoloFastestBuilder),
  FastestDet(FastestDetBuilder),
}

impl FromUrl for ModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      YoloFastestBuilder::SCHEME => Ok(ModelBuilder::YoloFastest(YoloFastestBuilder::from_url(
        url,
      )?)),
      FastestDetBuilder::SCHEME => Ok(ModelBuilder::FastestDet(FastestDetBuilder::from_url(
        url,
      )?)),
      scheme => Err(ModelError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl ModelBuilder {
  pub fn thresh(self, thresh: f32) -> Self {
    match self {
      ModelBuilder::YoloFastest(builder) => ModelBuilder::YoloFastest(builder.thresh(thresh)),
      ModelBuilder::FastestDet(builder) => ModelBuilder::FastestDet(builder.thresh(thresh)),
    }
  }

  pub fn build<E: InferenceEngine>(self) -> Result<ModelWrapper<E>, ModelError> {
    Ok(match self {
      ModelBuilder::YoloFastest(builder) => ModelWrapper::YoloFastest(builder.build()?),
      ModelBuilder::FastestDet(builder) => ModelWrapper::FastestDet(builder.build()?),
    })
  }
}

pub enum ModelWrapper<E> {
  YoloFastest(YoloFastest<E>),
  FastestDet(FastestDet<E>),
}

impl<E: InferenceEngine> ModelWrapper<E> {
  pub fn num_category(&self) -> usize {
    match self {
      ModelWrapper::YoloFastest(model) => model.config().num_category,
      ModelWrapper::FastestDet(model) => model.config().num_category,
    }
  }
}

impl<E: InferenceEngine> Model for ModelWrapper<E> {
  type Input = RgbImage;
  type Output = Vec<TargetBox>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::YoloFastest(model) => model.infer(input).map_err(ModelError::from),
      ModelWrapper::FastestDet(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
