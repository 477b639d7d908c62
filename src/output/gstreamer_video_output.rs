// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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


//! # GStreamer 视频文件输出
//!
//! URL 格式：`gstvideo:///path/output.mp4?fps=30&font=/path/font.ttf`
//!
//! 编码管道按扩展名选择：mp4、mkv、avi 使用 H.264，webm 使用 VP8，其他扩展名按 mp4 处理。
//! 视频尺寸取第一帧的尺寸，之后每帧必须与之相同。

use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  label::Labels,
  model::TargetBox,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  parse_query, query_value,
};

const DEFAULT_FPS: u32 = 30;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid query parameter: {0}")]
  InvalidQuery(String),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Frame size changed from {expected:?} to {actual:?}")]
  FrameSizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("Video output state lock poisoned")]
  Poisoned,
  #[error("字体错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 按扩展名选择编码管道，管道以名为 `src` 的 appsrc 开始
pub fn encoder_pipeline(path: &str) -> String {
  let extension = std::path::Path::new(path)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase);
  let encoder = match extension.as_deref() {
    Some("mkv") => "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux",
    Some("avi") => "video/x-raw,format=I420 ! x264enc ! avimux",
    Some("webm") => "vp8enc ! webmmux",
    _ => {
      "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux"
    }
  };
  format!(
    "appsrc name=src ! videoconvert ! {} ! filesink location={}",
    encoder, path
  )
}

/// 第 `index` 帧的时间戳与时长（纳秒）
fn frame_timing(index: u64, fps: u32) -> (u64, u64) {
  let fps = u64::from(fps.max(1));
  (index * NANOS_PER_SECOND / fps, NANOS_PER_SECOND / fps)
}

#[derive(Debug, Default)]
struct VideoState {
  frame_count: u64,
  size: Option<(u32, u32)>,
}

/// 将绘制检测框后的帧编码为视频文件
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: u32,
  draw: Draw,
  state: Mutex<VideoState>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let fps = parse_query(url, "fps")
      .map_err(GStreamerVideoOutputError::InvalidQuery)?
      .filter(|&fps: &u32| fps > 0)
      .unwrap_or(DEFAULT_FPS);
    let draw = match query_value(url, "font") {
      Some(font) => Draw::default().with_font_file(font)?,
      None => Draw::default(),
    };

    gst::init()?;

    let file_path = url.path();
    let description = encoder_pipeline(file_path);
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("视频输出初始化完成: {} fps -> {}", fps, file_path);

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      fps,
      draw,
      state: Mutex::new(VideoState::default()),
    })
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();

    // 等待 EOS 写入文件尾
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }

    if let Ok(state) = self.state.lock() {
      info!("视频输出关闭，共写入 {} 帧", state.frame_count);
    }
  }
}

impl GStreamerVideoOutput {
  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.draw = self.draw.with_labels(labels);
    self
  }

  fn push_frame(&self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let mut state = self
      .state
      .lock()
      .map_err(|_| GStreamerVideoOutputError::Poisoned)?;

    let size = image.dimensions();
    match state.size {
      Some(expected) if expected != size => {
        return Err(GStreamerVideoOutputError::FrameSizeChanged {
          expected,
          actual: size,
        });
      }
      Some(_) => {}
      None => {
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", size.0 as i32)
          .field("height", size.1 as i32)
          .field("framerate", gst::Fraction::new(self.fps as i32, 1))
          .build();
        self.appsrc.set_caps(Some(&caps));
        info!("视频尺寸: {}x{}", size.0, size.1);
        state.size = Some(size);
      }
    }

    let (pts, duration) = frame_timing(state.frame_count, self.fps);
    let mut buffer = gst::Buffer::from_mut_slice(image.as_raw().clone());
    {
      let buffer_ref = buffer.get_mut().ok_or_else(|| {
        GStreamerVideoOutputError::PipelineError("Buffer is not writable".to_string())
      })?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    state.frame_count += 1;
    Ok(())
  }
}

impl Render<RgbImage, Vec<TargetBox>> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &RgbImage, result: &Vec<TargetBox>) -> Result<(), Self::Error> {
    let mut image = frame.clone();
    self.draw.draw_detections(&mut image, result);
    self.push_frame(&image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encoder_follows_extension() {
    assert_eq!(
      encoder_pipeline("/tmp/out.webm"),
      "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location=/tmp/out.webm"
    );
    assert!(encoder_pipeline("/tmp/out.MKV").contains("matroskamux"));
    assert!(encoder_pipeline("/tmp/out.avi").contains("avimux"));
    assert!(encoder_pipeline("/tmp/out.mp4").contains("mp4mux"));
    assert!(encoder_pipeline("/tmp/out").contains("mp4mux"));
  }

  #[test]
  fn frames_are_timestamped_by_rate() {
    assert_eq!(frame_timing(0, 30), (0, 33_333_333));
    assert_eq!(frame_timing(30, 30), (1_000_000_000, 33_333_333));
    assert_eq!(frame_timing(3, 0), (3_000_000_000, 1_000_000_000));
  }

  #[test]
  fn rejects_other_schemes_and_bad_fps() {
    assert!(matches!(
      GStreamerVideoOutput::from_url(&Url::parse("image:///tmp/out.mp4").unwrap()),
      Err(GStreamerVideoOutputError::SchemeMismatch)
    ));
    assert!(matches!(
      GStreamerVideoOutput::from_url(&Url::parse("gstvideo:///tmp/out.mp4?fps=fast").unwrap()),
      Err(GStreamerVideoOutputError::InvalidQuery(_))
    ));
  }
}
