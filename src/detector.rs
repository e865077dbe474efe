// 该文件是 Beifeng （北风） 项目的一部分。
// src/detector.rs - 单帧检测与分类
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  decode::{BoxDecoder, DecodeError, DecodeGeometry, Detection, RawDetections},
  model::{InferenceEngine, ModelHandle},
  output::{RenderSurface, SurfaceError},
  preprocess::{PreprocessError, preprocess},
  tensor::TensorError,
};

/// 检测模型至少需要的输出数量：boxes, scores, classes
pub const DETECTION_OUTPUTS: usize = 3;

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入无效: {0}")]
  InvalidInput(#[source] PreprocessError),
  #[error("模型输出数量不足: 期望至少 {expected} 个, 实际 {actual} 个")]
  ModelContract { expected: usize, actual: usize },
  #[error("推理失败: {0}")]
  InferenceFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("输出错误: {0}")]
  Render(#[from] SurfaceError),
}

impl From<PreprocessError> for InferenceError {
  fn from(err: PreprocessError) -> Self {
    match err {
      PreprocessError::EmptyFrame { .. } => InferenceError::InvalidInput(err),
      other => InferenceError::InferenceFailure(Box::new(other)),
    }
  }
}

impl From<TensorError> for InferenceError {
  fn from(err: TensorError) -> Self {
    InferenceError::InferenceFailure(Box::new(err))
  }
}

impl From<DecodeError> for InferenceError {
  fn from(err: DecodeError) -> Self {
    InferenceError::InferenceFailure(Box::new(err))
  }
}

fn engine_failure<E>(err: E) -> InferenceError
where
  E: std::error::Error + Send + Sync + 'static,
{
  InferenceError::InferenceFailure(Box::new(err))
}

/// 对一帧图像做一次完整的检测：预处理、执行模型、解码（可选绘制）
///
/// 本次周期内的所有张量在返回前释放，包括出错的路径。
pub fn detect_image<E: InferenceEngine>(
  frame: &RgbImage,
  model: &ModelHandle<E>,
  decoder: &BoxDecoder,
  surface: Option<&mut dyn RenderSurface>,
) -> Result<Vec<Detection>, InferenceError> {
  let shape = model.input_shape();
  let scope = model.scope();

  let now = Instant::now();
  let input = preprocess(&scope, frame, shape.width, shape.height)?;
  let preprocess_time = now.elapsed();

  let now = Instant::now();
  let outputs = model
    .engine()
    .execute(&input.tensor)
    .map_err(engine_failure)?
    .into_iter()
    .map(|raw| scope.adopt(raw))
    .collect::<Result<Vec<_>, _>>()?;
  let execute_time = now.elapsed();

  if outputs.len() < DETECTION_OUTPUTS {
    return Err(InferenceError::ModelContract {
      expected: DETECTION_OUTPUTS,
      actual: outputs.len(),
    });
  }

  let now = Instant::now();
  let raw = RawDetections {
    boxes: outputs[0].data(),
    scores: outputs[1].data(),
    classes: outputs[2].data(),
  };
  let geometry = DecodeGeometry {
    ratios: input.ratios,
    source_size: input.source_size,
    model_size: (shape.width, shape.height),
  };
  let detections = decoder.decode(&raw, &geometry, surface)?;
  let decode_time = now.elapsed();

  for output in outputs {
    output.release();
  }
  input.tensor.release();

  debug!(
    "检测完成: 预处理 {:.2?}, 推理 {:.2?}, 解码 {:.2?}, 共 {} 个目标",
    preprocess_time,
    execute_time,
    decode_time,
    detections.len()
  );
  Ok(detections)
}

/// 分类结果，每个类别一个概率
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub probabilities: Vec<f32>,
}

impl Classification {
  /// 概率最大的类别及其概率，忽略 NaN
  pub fn top(&self) -> Option<(usize, f32)> {
    self
      .probabilities
      .iter()
      .copied()
      .enumerate()
      .filter(|(_, p)| !p.is_nan())
      .max_by(|a, b| a.1.total_cmp(&b.1))
  }
}

/// 对裁剪后的图像做一次分类
///
/// 分类只是检测之后的补充步骤，任何失败都只记录日志并返回 `None`。
pub fn classify_image<E: InferenceEngine>(
  frame: &RgbImage,
  model: &ModelHandle<E>,
) -> Option<Classification> {
  match try_classify(frame, model) {
    Ok(classification) => Some(classification),
    Err(e) => {
      error!("图像分类失败: {}", e);
      None
    }
  }
}

fn try_classify<E: InferenceEngine>(
  frame: &RgbImage,
  model: &ModelHandle<E>,
) -> Result<Classification, InferenceError> {
  let shape = model.input_shape();
  let scope = model.scope();

  let input = preprocess(&scope, frame, shape.width, shape.height)?;
  let raw = model
    .engine()
    .predict(&input.tensor)
    .map_err(engine_failure)?;
  let output = scope.adopt(raw)?;
  let probabilities = output.to_vec();

  output.release();
  input.tensor.release();
  Ok(Classification { probabilities })
}
