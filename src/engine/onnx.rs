// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/onnx.rs - ONNX Runtime 推理引擎
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


//! 基于 ONNX Runtime 的推理引擎
//!
//! param 路径为 `.onnx` 模型文件；ONNX 模型不区分结构与权重，bin 路径只记录在日志中。

use std::path::Path;
use std::sync::Mutex;

use ndarray::{ArrayView, IxDyn};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info, trace};

use super::{EngineOptions, ExtractOptions, InferenceEngine, TensorLayout};
use crate::{
  frame::InputTensor,
  model::{RawTensor, ShapeError},
};

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("输入形状错误: {0}")]
  InputShape(#[from] ndarray::ShapeError),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ShapeError),
  #[error("输出 {name} 形状不受支持: {shape:?}")]
  UnexpectedShape { name: String, shape: Vec<usize> },
  #[error("未知输出: {0}")]
  UnknownOutput(String),
  #[error("会话锁已损坏")]
  Poisoned,
  #[error("输入张量为空")]
  EmptyInput,
}

pub struct OnnxEngine {
  session: Mutex<Session>,
}

/// 去掉大小为 1 的批维度，得到三维输出形状
fn output_dims(name: &str, shape: &[usize]) -> Result<[usize; 3], OnnxEngineError> {
  match shape {
    [1, a, b, c] | [a, b, c] => Ok([*a, *b, *c]),
    _ => Err(OnnxEngineError::UnexpectedShape {
      name: name.to_string(),
      shape: shape.to_vec(),
    }),
  }
}

/// 按模型中的排列方式转为 `[height][width][channels]`
fn to_raw_tensor(dims: [usize; 3], layout: TensorLayout, data: &[f32]) -> Result<RawTensor, ShapeError> {
  match layout {
    TensorLayout::Hwc => RawTensor::new(dims[0], dims[1], dims[2], data.to_vec()),
    TensorLayout::Chw => RawTensor::from_chw(dims[0], dims[1], dims[2], data),
  }
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxEngineError;

  fn load_model(
    param_path: &Path,
    weights_path: &Path,
    options: &EngineOptions,
  ) -> Result<Self, Self::Error> {
    let _ = ort::init().commit();

    info!(
      "加载 ONNX 模型: {} (线程数 {})",
      param_path.display(),
      options.num_threads
    );
    debug!("ONNX 模型不使用独立权重文件: {}", weights_path.display());
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(options.num_threads.max(1))?
      .commit_from_file(param_path)?;

    Ok(Self {
      session: Mutex::new(session),
    })
  }

  fn extract(
    &self,
    input_name: &str,
    input: &InputTensor,
    output_name: &str,
    options: &ExtractOptions,
  ) -> Result<RawTensor, Self::Error> {
    if input.is_empty() {
      return Err(OnnxEngineError::EmptyInput);
    }

    let shape = [1, input.channels(), input.height(), input.width()];
    let view = ArrayView::from_shape(IxDyn(&shape), input.as_chw())?;

    let mut session = self.session.lock().map_err(|_| OnnxEngineError::Poisoned)?;
    let outputs = session.run(ort::inputs![
      input_name.to_string() => TensorRef::from_array_view(view)?
    ])?;
    let output = outputs
      .get(output_name)
      .ok_or_else(|| OnnxEngineError::UnknownOutput(output_name.to_string()))?
      .try_extract_array::<f32>()?;

    let dims = output_dims(output_name, output.shape())?;
    trace!("输出 {}: {:?} ({:?})", output_name, dims, options.layout);
    let data: Vec<f32> = output.iter().copied().collect();
    Ok(to_raw_tensor(dims, options.layout, &data)?)
  }
}
