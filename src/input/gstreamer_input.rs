// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
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


//! # GStreamer 视频输入
//!
//! URL 格式：
//!
//! - 视频文件: `gst://file/path/to/video.mp4?rotate=90`
//! - 摄像头: `gst://camera/dev/video0?width=640&height=480&fps=15&format=YUY2&io-mode=2`
//!
//! 可选参数 `ratio=4/3` 在转换格式前按宽高比裁剪。所有管道最终转换为 RGB 并交给
//! `appsink`，每一帧以 [`RgbImage`] 输出。
//!
//! 使用前需要安装 GStreamer 开发库，并启用 `gstreamer_input` 特性。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, query_value};

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Unknown source kind: {0:?}, expected 'file' or 'camera'")]
  UnknownSource(Option<String>),
  #[error("Invalid query parameter {key}: {value}")]
  InvalidQuery { key: String, value: String },
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  AspectRatio {
    ratio: (u32, u32),
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

fn parse_param<T: std::str::FromStr>(url: &Url, key: &str) -> Result<Option<T>, GStreamerInputError> {
  match query_value(url, key) {
    None => Ok(None),
    Some(value) => value
      .parse()
      .map(Some)
      .map_err(|_| GStreamerInputError::InvalidQuery {
        key: key.to_string(),
        value,
      }),
  }
}

fn parse_ratio(url: &Url) -> Result<Option<(u32, u32)>, GStreamerInputError> {
  let Some(value) = query_value(url, "ratio") else {
    return Ok(None);
  };
  let parsed = value
    .split_once('/')
    .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
    .filter(|&(w, h)| w > 0 && h > 0);
  match parsed {
    Some(ratio) => Ok(Some(ratio)),
    None => Err(GStreamerInputError::InvalidQuery {
      key: "ratio".to_string(),
      value,
    }),
  }
}

fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
  let (method, direction) = match rotate? {
    "90" => (1, 1),
    "180" => (2, 2),
    "270" => (3, 3),
    _ => (0, 0),
  };
  Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
}

/// GStreamer 输入管道构建器
#[derive(Debug, Clone, PartialEq)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let mut items = Vec::new();
    match url.host_str() {
      Some("camera") => items.push(GStreamerInputBuilderItem::CameraSource {
        camera: url.path().to_string(),
        io_mode: parse_param(url, "io-mode")?,
        format: query_value(url, "format").unwrap_or_else(|| "RGB".to_string()),
        width: parse_param(url, "width")?.unwrap_or(DEFAULT_CAMERA_WIDTH),
        height: parse_param(url, "height")?.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        fps: parse_param(url, "fps")?.unwrap_or(DEFAULT_CAMERA_FPS),
      }),
      Some("file") => items.push(GStreamerInputBuilderItem::FileSource(
        url.path().to_string(),
      )),
      other => return Err(GStreamerInputError::UnknownSource(other.map(String::from))),
    }

    if let Some(ratio) = parse_ratio(url)? {
      items.push(GStreamerInputBuilderItem::AspectRatio { ratio });
    }
    if let Some(flip) = video_flip(query_value(url, "rotate").as_deref()) {
      items.push(flip);
    }
    items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(GStreamerInputPipelineBuilder { items })
  }
}

impl GStreamerInputPipelineBuilder {
  /// 完整的管道描述，末端为名为 `sink` 的 appsink
  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 输入管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

/// GStreamer 视频输入，逐帧输出 RGB 图像；管道结束或出错时迭代结束
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    GStreamerInputPipelineBuilder::from_url(url)?.build()
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self
      .appsink
      .pull_sample()
      .map_err(|e| info!("输入结束: {}", e))
      .ok()?;
    convert_sample(&sample)
      .map_err(|e| error!("Failed to fetch sample: {}", e))
      .ok()
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };
  let stride = video_info
    .stride()
    .first()
    .and_then(|&s| usize::try_from(s).ok())
    .ok_or(GStreamerInputError::VideoInfoError)?;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  pack_rows(
    map.as_slice(),
    video_info.width(),
    video_info.height(),
    stride,
    bgr,
  )
}

/// 去掉行尾填充并按需交换 B/R 通道
fn pack_rows(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  bgr: bool,
) -> Result<RgbImage, GStreamerInputError> {
  let row_bytes = width as usize * RGB_CHANNELS;
  let expected = match height as usize {
    0 => 0,
    h => (h - 1) * stride + row_bytes,
  };
  if stride < row_bytes || data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height as usize);
  for row in 0..height as usize {
    let line = &data[row * stride..row * stride + row_bytes];
    if bgr {
      for px in line.chunks_exact(RGB_CHANNELS) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected,
    actual: data.len(),
  })
}
