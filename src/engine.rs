// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use crate::{frame::InputTensor, model::RawTensor};

/// 模型输出在内存中的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// `[height][width][channels]`，每个网格单元的通道连续存放
  #[default]
  Hwc,
  /// `[channels][height][width]`，每个通道为一个平面
  Chw,
}

/// 加载模型时的引擎参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
  /// 引擎内部的工作线程数
  pub num_threads: usize,
}

/// 单次提取的引擎参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
  pub num_threads: usize,
  /// 该输出在模型中的排列方式
  pub layout: TensorLayout,
}

/// 推理引擎
///
/// 模型由结构描述文件（param）与权重文件（bin）组成。每次 `extract` 以一个输入张量
/// 执行前向推理，并取出指定名称的输出。无论模型中的排列方式如何，返回的张量均为
/// `[height][width][channels]`。
pub trait InferenceEngine: Sized {
  type Error: std::error::Error + Send + Sync + 'static;

  fn load_model(
    param_path: &Path,
    weights_path: &Path,
    options: &EngineOptions,
  ) -> Result<Self, Self::Error>;

  fn extract(
    &self,
    input_name: &str,
    input: &InputTensor,
    output_name: &str,
    options: &ExtractOptions,
  ) -> Result<RawTensor, Self::Error>;
}

#[cfg(feature = "onnx_engine")]
mod onnx;
#[cfg(feature = "onnx_engine")]
pub use self::onnx::{OnnxEngine, OnnxEngineError};

mod replay;
pub use self::replay::{ReplayEngine, ReplayEngineError};
