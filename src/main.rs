// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shanan_fastest::{
  FromUrl,
  engine::{InferenceEngine, ReplayEngine},
  input::InputWrapper,
  label::Labels,
  model::{ModelBuilder, ModelWrapper},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
};

use crate::args::{Args, EngineKind};

fn run<E: InferenceEngine>(args: &Args, labels: Labels) -> Result<()> {
  let model: ModelWrapper<E> = ModelBuilder::from_url(&args.model)?
    .thresh(args.thresh)
    .build()?;
  if labels.len() != model.num_category() {
    warn!(
      "类别名称数 {} 与模型类别数 {} 不一致",
      labels.len(),
      model.num_category()
    );
  }

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_labels(labels);

  if input.is_stream() {
    ContinuousTask::default()
      .with_frame_number(args.frames)
      .with_interrupt_handler(true)
      .run_task(input, model, output)
  } else if args.repeat > 1 {
    RepeatShotTask::new(args.repeat).run_task(input, model, output)
  } else {
    OneShotTask.run_task(input, model, output)
  }
}

fn main() -> Result<()> {
  let args = Args::parse();

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&args.log_level))
    .context("日志级别无效")?;
  tracing_subscriber::fmt().with_env_filter(filter).init();

  info!("模型路径: {}", args.model);
  info!("推理引擎: {:?}", args.engine);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("置信度阈值: {}", args.thresh);

  let labels = match &args.labels {
    Some(path) => Labels::from_toml_file(path)
      .with_context(|| format!("读取类别文件失败: {}", path.display()))?,
    None => Labels::default(),
  };

  match args.engine {
    EngineKind::Replay => run::<ReplayEngine>(&args, labels)?,
    #[cfg(feature = "onnx_engine")]
    EngineKind::Onnx => run::<shanan_fastest::engine::OnnxEngine>(&args, labels)?,
    #[cfg(not(feature = "onnx_engine"))]
    EngineKind::Onnx => anyhow::bail!("未启用 onnx_engine 特性，无法使用 ONNX 引擎"),
  }

  info!("任务完成");
  Ok(())
}
