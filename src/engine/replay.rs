// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/replay.rs - 回放推理引擎
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

//! 回放事先记录的输出张量
//!
//! param 文件为 JSON：
//!
//! ```json
//! { "input": "input.1", "outputs": [{ "name": "794", "shape": [22, 22, 95], "offset": 0 }] }
//! ```
//!
//! bin 文件为小端 `f32` 序列，每个输出从 `offset`（以 `f32` 计）开始读取 `h * w * c` 个值。
//! 记录的张量已是 `[h][w][c]` 排列，提取时忽略 [`ExtractOptions::layout`]。

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use super::{EngineOptions, ExtractOptions, InferenceEngine};
use crate::{
  frame::InputTensor,
  model::{RawTensor, ShapeError, decode::element_count},
};

const F32_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("param 文件解析错误: {0}")]
  ParamError(#[from] serde_json::Error),
  #[error("bin 文件长度 {0} 不是 f32 的整数倍")]
  UnalignedBlob(usize),
  /// `end` 为 `None` 表示范围计算溢出
  #[error("输出 {name} 需要从 {start} 开始的 {end:?} 范围数据, bin 文件仅有 {len} 个值")]
  BlobTooShort {
    name: String,
    start: usize,
    end: Option<usize>,
    len: usize,
  },
  #[error("张量形状错误: {0}")]
  Shape(#[from] ShapeError),
  #[error("输入名称不匹配: 期望 {expected}, 实际 {actual}")]
  InputMismatch { expected: String, actual: String },
  #[error("输入张量为空")]
  EmptyInput,
  #[error("未知输出: {0}")]
  UnknownOutput(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplayParam {
  input: String,
  outputs: Vec<ReplayOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplayOutput {
  name: String,
  shape: [usize; 3],
  offset: usize,
}

#[derive(Debug, Clone)]
pub struct ReplayEngine {
  input_name: String,
  outputs: HashMap<String, RawTensor>,
}

impl ReplayEngine {
  pub fn from_outputs<S, I>(input_name: S, outputs: I) -> Self
  where
    S: Into<String>,
    I: IntoIterator<Item = (String, RawTensor)>,
  {
    Self {
      input_name: input_name.into(),
      outputs: outputs.into_iter().collect(),
    }
  }

  pub fn input_name(&self) -> &str {
    &self.input_name
  }

  /// 将记录的输出写成 param/bin 文件，可再由 [`InferenceEngine::load_model`] 读回
  pub fn save(&self, param_path: &Path, weights_path: &Path) -> Result<(), ReplayEngineError> {
    let mut names: Vec<&String> = self.outputs.keys().collect();
    names.sort();

    let mut blob = Vec::new();
    let mut outputs = Vec::with_capacity(names.len());
    for name in names {
      let tensor = &self.outputs[name];
      outputs.push(ReplayOutput {
        name: name.clone(),
        shape: tensor.shape(),
        offset: blob.len() / F32_SIZE,
      });
      for value in tensor.as_slice() {
        blob.extend_from_slice(&value.to_le_bytes());
      }
    }

    let param = ReplayParam {
      input: self.input_name.clone(),
      outputs,
    };
    std::fs::write(param_path, serde_json::to_vec_pretty(&param)?)?;
    std::fs::write(weights_path, blob)?;
    info!(
      "保存回放模型: {} / {}",
      param_path.display(),
      weights_path.display()
    );
    Ok(())
  }
}

impl InferenceEngine for ReplayEngine {
  type Error = ReplayEngineError;

  fn load_model(
    param_path: &Path,
    weights_path: &Path,
    options: &EngineOptions,
  ) -> Result<Self, Self::Error> {
    info!(
      "加载回放模型: {} (线程数 {})",
      param_path.display(),
      options.num_threads
    );
    let param: ReplayParam = serde_json::from_slice(&std::fs::read(param_path)?)?;

    let bytes = std::fs::read(weights_path)?;
    if bytes.len() % F32_SIZE != 0 {
      return Err(ReplayEngineError::UnalignedBlob(bytes.len()));
    }
    let values: Vec<f32> = bytes
      .chunks_exact(F32_SIZE)
      .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect();
    debug!(
      "bin 文件大小: {:.2} KB",
      bytes.len() as f64 / 1024.0
    );

    let mut outputs = HashMap::with_capacity(param.outputs.len());
    for output in param.outputs {
      let [h, w, c] = output.shape;
      let start = output.offset;
      let end = element_count(output.shape).and_then(|count| start.checked_add(count));
      let Some(range) = end.filter(|&end| end <= values.len()).map(|end| start..end) else {
        return Err(ReplayEngineError::BlobTooShort {
          name: output.name,
          start,
          end,
          len: values.len(),
        });
      };
      let tensor = RawTensor::new(h, w, c, values[range].to_vec())?;
      debug!("输出 {}: {:?}", output.name, tensor.shape());
      outputs.insert(output.name, tensor);
    }

    Ok(Self {
      input_name: param.input,
      outputs,
    })
  }

  fn extract(
    &self,
    input_name: &str,
    input: &InputTensor,
    output_name: &str,
    options: &ExtractOptions,
  ) -> Result<RawTensor, Self::Error> {
    if input_name != self.input_name {
      return Err(ReplayEngineError::InputMismatch {
        expected: self.input_name.clone(),
        actual: input_name.to_string(),
      });
    }
    if input.is_empty() {
      return Err(ReplayEngineError::EmptyInput);
    }
    trace!(
      "回放输出 {} (输入 {}x{}, 线程数 {})",
      output_name,
      input.width(),
      input.height(),
      options.num_threads
    );
    self
      .outputs
      .get(output_name)
      .cloned()
      .ok_or_else(|| ReplayEngineError::UnknownOutput(output_name.to_string()))
  }
}
