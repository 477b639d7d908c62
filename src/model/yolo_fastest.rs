// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo_fastest.rs - YOLO-Fastest 检测流程
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
    anchor::{AnchorTable, OutputScale},
    config::{ConfigError, ModelConfig},
    decode::{ScaledOutput, ShapeError, decode},
    nms::nms,
  },
  parse_query, query_value,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum YoloFastestError {
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

pub struct YoloFastest<E> {
  engine: E,
  config: ModelConfig,
  table: AnchorTable,
}

impl<E: InferenceEngine> YoloFastest<E> {
  pub fn new(engine: E, config: ModelConfig) -> Result<Self, YoloFastestError> {
    let table = config.anchor_table()?;
    Ok(Self {
      engine,
      config,
      table,
    })
  }

  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  pub fn anchor_table(&self) -> &AnchorTable {
    &self.table
  }

  /// 缩放并归一化为模型输入
  pub fn preprocess(&self, image: &RgbImage) -> InputTensor {
    InputTensor::from_image(
      image,
      self.table.input_width(),
      self.table.input_height(),
      self.config.channel_order,
    )
  }

  /// 对已预处理的输入执行推理与后处理，`image_size` 为原图 (宽, 高)
  pub fn inference(
    &self,
    input: &InputTensor,
    image_size: (u32, u32),
    thresh: f32,
  ) -> Result<Vec<TargetBox>, YoloFastestError> {
    // 负阈值会让全负分数的锚框通过筛选
    if !thresh.is_finite() || thresh < 0.0 {
      return Err(YoloFastestError::InvalidThreshold(thresh));
    }

    let (img_w, img_h) = image_size;
    let scale_w = img_w as f32 / self.table.input_width() as f32;
    let scale_h = img_h as f32 / self.table.input_height() as f32;

    let options = ExtractOptions {
      num_threads: self.config.num_threads,
      layout: TensorLayout::Hwc,
    };
    let mut outputs = Vec::with_capacity(OutputScale::ALL.len());
    for scale in OutputScale::ALL {
      let name = self.table.output_name(scale);
      let tensor = self
        .engine
        .extract(&self.config.input_name, input, name, &options)
        .map_err(|e| {
          error!("提取输出 {} 失败: {}", name, e);
          YoloFastestError::ExtractError {
            output: name.to_string(),
            source: Box::new(e),
          }
        })?;
      debug!("输出 {} ({:?}): {:?}", name, scale, tensor.shape());
      outputs.push(ScaledOutput { scale, tensor });
    }

    let candidates = decode(&outputs, &self.table, scale_w, scale_h, thresh)?;
    let boxes = nms(candidates, self.config.nms_thresh);
    debug!("检测到 {} 个目标", boxes.len());
    Ok(boxes)
  }

  /// 检测一张图像，返回按分数降序排列的目标框
  pub fn detect(&self, image: &RgbImage, thresh: f32) -> Result<Vec<TargetBox>, YoloFastestError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(YoloFastestError::EmptyImage);
    }
    let input = self.preprocess(image);
    self.inference(&input, image.dimensions(), thresh)
  }
}

impl<E: InferenceEngine> Model for YoloFastest<E> {
  type Input = RgbImage;
  type Output = Vec<TargetBox>;
  type Error = YoloFastestError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input, self.config.thresh)
  }
}

#[derive(Debug, Clone)]
pub struct YoloFastestBuilder {
  param_path: PathBuf,
  weights_path: PathBuf,
  config_path: Option<PathBuf>,
  num_threads: Option<usize>,
  nms_thresh: Option<f32>,
  thresh: Option<f32>,
}

impl FromUrlWithScheme for YoloFastestBuilder {
  const SCHEME: &'static str = "yolo-fastest";
}

impl FromUrl for YoloFastestBuilder {
  type Error = YoloFastestError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloFastestError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let param_path = PathBuf::from(url.path());
    let weights_path = query_value(url, "bin")
      .map(PathBuf::from)
      .unwrap_or_else(|| param_path.with_extension("bin"));

    Ok(YoloFastestBuilder {
      param_path,
      weights_path,
      config_path: query_value(url, "config").map(PathBuf::from),
      num_threads: parse_query(url, "threads").map_err(YoloFastestError::ModelPathError)?,
      nms_thresh: parse_query(url, "nms").map_err(YoloFastestError::ModelPathError)?,
      thresh: parse_query(url, "thresh").map_err(YoloFastestError::ModelPathError)?,
    })
  }
}

impl YoloFastestBuilder {
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

  pub fn num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = Some(num_threads);
    self
  }

  pub fn nms_thresh(mut self, nms_thresh: f32) -> Self {
    self.nms_thresh = Some(nms_thresh);
    self
  }

  pub fn thresh(mut self, thresh: f32) -> Self {
    self.thresh = Some(thresh);
    self
  }

  pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.config_path = Some(path.into());
    self
  }

  /// 读取配置文件（若有）并应用 URL 参数覆盖
  pub fn resolve_config(&self) -> Result<ModelConfig, ConfigError> {
    let mut config = match &self.config_path {
      Some(path) => ModelConfig::from_toml_file(path)?,
      None => ModelConfig::default(),
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

  pub fn build<E: InferenceEngine>(self) -> Result<YoloFastest<E>, YoloFastestError> {
    let config = self.resolve_config()?;
    info!(
      "模型输入: {} {}x{}, 类别数 {}, 线程数 {}",
      config.input_name,
      config.input_width,
      config.input_height,
      config.num_category,
      config.num_threads
    );

    info!("加载模型文件: {}", self.param_path.display());
    debug!("权重文件: {}", self.weights_path.display());
    let options = EngineOptions {
      num_threads: config.num_threads,
    };
    let engine = E::load_model(&self.param_path, &self.weights_path, &options).map_err(|e| {
      error!("模型加载失败: {}", e);
      YoloFastestError::ModelLoadError(Box::new(e))
    })?;
    info!("模型加载完成");

    YoloFastest::new(engine, config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_from_url_reads_query() {
    let url = Url::parse("yolo-fastest:///models/v2.param?threads=2&nms=0.4&thresh=0.5").unwrap();
    let builder = YoloFastestBuilder::from_url(&url).unwrap();
    assert_eq!(builder.param_path, PathBuf::from("/models/v2.param"));
    assert_eq!(builder.weights_path, PathBuf::from("/models/v2.bin"));

    let config = builder.resolve_config().unwrap();
    assert_eq!(config.num_threads, 2);
    assert_eq!(config.nms_thresh, 0.4);
    assert_eq!(config.thresh, 0.5);
  }

  #[test]
  fn builder_from_url_explicit_bin() {
    let url = Url::parse("yolo-fastest:///m/a.param?bin=/w/b.bin").unwrap();
    let builder = YoloFastestBuilder::from_url(&url).unwrap();
    assert_eq!(builder.weights_path, PathBuf::from("/w/b.bin"));
  }

  #[test]
  fn builder_rejects_bad_scheme_and_query() {
    let url = Url::parse("rknn:///m/a.param").unwrap();
    assert!(matches!(
      YoloFastestBuilder::from_url(&url),
      Err(YoloFastestError::ModelPathError(_))
    ));

    let url = Url::parse("yolo-fastest:///m/a.param?threads=many").unwrap();
    assert!(matches!(
      YoloFastestBuilder::from_url(&url),
      Err(YoloFastestError::ModelPathError(_))
    ));
  }

  #[test]
  fn resolve_config_validates_overrides() {
    let builder = YoloFastestBuilder::new("a.param", "a.bin").nms_thresh(f32::INFINITY);
    assert!(matches!(
      builder.resolve_config(),
      Err(ConfigError::Invalid(_))
    ));

    let builder = YoloFastestBuilder::new("a.param", "a.bin").thresh(-0.5);
    assert!(matches!(
      builder.resolve_config(),
      Err(ConfigError::Invalid(_))
    ));
  }
}
