// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use url::Url;

/// 推理引擎
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
  /// 回放事先记录的输出张量
  Replay,
  /// ONNX Runtime，需要启用 `onnx_engine` 特性
  Onnx,
}

/// Shanan YOLO-Fastest 检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  /// 支持格式:
  /// - YOLO-Fastest: yolo-fastest:///path/model.param?bin=/path/model.bin&config=/path/model.toml
  /// - FastestDet: fastest-det:///path/model.param?bin=/path/model.bin
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 推理引擎
  #[arg(long, value_enum, default_value_t = EngineKind::Replay)]
  pub engine: EngineKind,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/input.jpg
  /// - 视频文件: gst://file/path/video.mp4?rotate=90
  /// - 摄像头: gst://camera/dev/video0?width=640&height=480&fps=15
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/output.png?font=/path/font.ttf
  /// - 记录: record:///path/output.json?labels=id
  /// - 视频: gstvideo:///path/output.mp4?fps=30
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值
  #[arg(long, default_value_t = 0.3, value_name = "THRESHOLD")]
  pub thresh: f32,

  /// 类别名称文件（TOML，`classes = [...]`），默认使用 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 日志级别，设置 RUST_LOG 时以其为准
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: String,

  /// 重复推理次数，大于 1 时校验结果一致并统计平均耗时
  #[arg(long, default_value_t = 1, value_name = "COUNT")]
  pub repeat: usize,

  /// 视频流最多处理的帧数，默认处理到输入结束或收到中断信号
  #[arg(long, value_name = "COUNT")]
  pub frames: Option<usize>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_defaults() {
    let args = Args::try_parse_from([
      "shanan-fastest",
      "--model",
      "yolo-fastest:///m/model.param",
      "--input",
      "image:///in.jpg",
      "--output",
      "record:///out.json",
    ])
    .unwrap();
    assert_eq!(args.thresh, 0.3);
    assert_eq!(args.repeat, 1);
    assert_eq!(args.log_level, "info");
    assert!(args.labels.is_none());
    assert_eq!(args.model.scheme(), "yolo-fastest");
    assert_eq!(args.engine, EngineKind::Replay);
    assert_eq!(args.frames, None);
  }

  #[test]
  fn parses_engine_and_frames() {
    let args = Args::try_parse_from([
      "shanan-fastest",
      "--model",
      "fastest-det:///m/det.onnx",
      "--engine",
      "onnx",
      "--input",
      "gst://file/in.mp4",
      "--output",
      "gstvideo:///out.mp4",
      "--frames",
      "25",
    ])
    .unwrap();
    assert_eq!(args.engine, EngineKind::Onnx);
    assert_eq!(args.frames, Some(25));
  }

  #[test]
  fn rejects_invalid_url() {
    assert!(
      Args::try_parse_from([
        "shanan-fastest",
        "--model",
        "not a url",
        "--input",
        "image:///in.jpg",
        "--output",
        "record:///out.json",
      ])
      .is_err()
    );
  }
}
