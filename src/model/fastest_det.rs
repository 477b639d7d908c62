// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/fastest_det.rs - FastestDet 检测流程
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


use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineOptions, ExtractOptions, InferenceEngine, TensorLayout},
  frame::InputTensor,
  model::{
    Model, TargetBox,
    config::{ConfigError, FastestDetConfig},
    decode::ShapeError,
    grid_decode::decode_grid,
    nms::nms,
  },
  parse_query, query_value,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum FastestDetError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[source] BoxedError),
  #[error("模型配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("输出形状与模型配置不符: {0}")]
  ShapeError(#[from] ShapeError),
  #[error("提取输出 {output} 失败: {source}")]
  ExtractError {
    output: String,
    #[source]
    source: BoxedError,
  },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("阈值无效: {0}")]
  InvalidThreshold(f32),
  #[error("输入图像为空")]
  EmptyImage,
}

/// 单输出、无锚框的 FastestDet 检测器
pub struct FastestDet<E> {
  engine: E,
  config: FastestDetConfig,
}

impl<E: InferenceEngine> FastestDet<E> {
  pub fn new(engine: E, config: FastestDetConfig) -> Result<Self, FastestDetError> {
    config.validate()?;
    Ok(Self { engine, config })
  }

  pub fn config(&self) -> &FastestDetConfig {
    &self.config
  }

  pub fn preprocess(&self, image: &RgbImage) -> InputTensor {
    InputTensor::from_image(
      image,
      self.config.input_width,
      self.config.input_height,
      self.config.channel_order,
    )
  }

  /// 对已预处理的输入执行推理与后处理，`image_size` 为原图 (宽, 高)
  pub fn inference(
    &self,
    input: &InputTensor,
    image_size: (u32, u32),
    thresh: f32,
  ) -> Result<Vec<TargetBox>, FastestDetError> {
    if !thresh.is_finite() || thresh < 0.0 {
      return Err(FastestDetError::InvalidThreshold(thresh));
    }

    let name = &self.config.output_name;
    let options = ExtractOptions {
      num_threads: self.config.num_threads,
      layout: TensorLayout::Chw,
    };
    let tensor = self
      .engine
      .extract(&self.config.input_name, input, name, &options)
      .map_err(|e| {
        error!("提取输出 {} 失败: {}", name, e);
        FastestDetError::ExtractError {
          output: name.clone(),
          source: Box::new(e),
        }
      })?;
    debug!("输出 {}: {:?}", name, tensor.shape());

    let (img_w, img_h) = image_size;
    let candidates = decode_grid(
      &tensor,
      self.config.num_category,
      img_w as f32,
      img_h as f32,
      thresh,
    )?;
    let boxes = nms(candidates, self.config.nms_thresh);
    debug!("检测到 {} 个目标", boxes.len());
    Ok(boxes)
  }

  pub fn detect(&self, image: &RgbImage, thresh: f32) -> Result<Vec<TargetBox>, FastestDetError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(FastestDetError::EmptyImage);
    }
    let input = self.preprocess(image);
    self.inference(&input, image.dimensions(), thresh)
  }
}

impl<E: InferenceEngine> Model for FastestDet<E> {
  type Input = RgbImage;
  type Output = Vec<TargetBox>;
  type Error = FastestDetError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input, self.config.thresh)
  }
}

#[derive(Debug, Clone)]
pub struct FastestDetBuilder {
  param_path: PathBuf,
  weights_path: PathBuf,
  config_path: Option<PathBuf>,
  num_threads: Option<usize>,
  nms_thresh: Option<f32>,
  thresh: Option<f32>,
}

impl FromUrlWithScheme for FastestDetBuilder {
  const SCHEME: &'static str = "fastest-det";
}

impl FromUrl for FastestDetBuilder {
  type Error = FastestDetError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FastestDetError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let param_path = PathBuf::from(url.path());
    let weights_path = query_value(url, "bin")
      .map(PathBuf::from)
      .unwrap_or_else(|| param_path.with_extension("bin"));

    Ok(FastestDetBuilder {
      param_path,
      weights_path,
      config_path: query_value(url, "config").map(PathBuf::from),
      num_threads: parse_query(url, "threads").map_err(FastestDetError::ModelPathError)?,
      nms_thresh: parse_query(url, "nms").map_err(FastestDetError::ModelPathError)?,
      thresh: parse_query(url, "thresh").map_err(FastestDetError::ModelPathError)?,
    })
  }
}

impl FastestDetBuilder {
  pub fn new(param_path: impl Into<PathBuf>, weights_path: impl Into<PathBuf>) -> Self {
    Self {
      param_path: param_path.into(),
      weights_path: weights_path.into(),
      config_path: None,
      num_threads: None,
      nms_thresh: None,
      thresh: None,
    }
  }

  pub fn thresh(mut self, thresh: f32) -> Self {
    self.thresh = Some(thresh);
    self
  }

  pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.config_path = Some(path.into());
    self
  }

  pub fn resolve_config(&self) -> Result<FastestDetConfig, ConfigError> {
    let mut config = match &self.config_path {
      Some(path) => FastestDetConfig::from_toml_file(path)?,
      None => FastestDetConfig::default(),
    };
    if let Some(num_threads) = self.num_threads {
      config.num_threads = num_threads;
    }
    if let Some(nms_thresh) = self.nms_thresh {
      config.nms_thresh = nms_thresh;
    }
    if let Some(thresh) = self.thresh {
      config.thresh = thresh;
    }
    config.validate()?;
    Ok(config)
  }

  pub fn build<E: InferenceEngine>(self) -> Result<FastestDet<E>, FastestDetError> {
    let config = self.resolve_config()?;
    info!(
      "FastestDet 输入: {} {}x{}, 输出 {}, 类别数 {}",
      config.input_name,
      config.input_width,
      config.input_height,
      config.output_name,
      config.num_category
    );

    info!("加载模型文件: {}", self.param_path.display());
    debug!("权重文件: {}", self.weights_path.display());
    let options = EngineOptions {
      num_threads: config.num_threads,
    };
    let engine = E::load_model(&self.param_path, &self.weights_path, &options).map_err(|e| {
      error!("模型加载失败: {}", e);
      FastestDetError::ModelLoadError(Box::new(e))
    })?;
    info!("模型加载完成");

    FastestDet::new(engine, config)
  }
}
