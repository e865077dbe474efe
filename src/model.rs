// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型句柄与推理引擎接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, info};

use crate::tensor::{RawTensor, Tensor, TensorBackend, TensorScope};

mod labels;
pub use self::labels::{COCO_CLASSES, Labels, LabelsError};

#[cfg(feature = "backend-tract")]
mod tract;
#[cfg(feature = "backend-tract")]
pub use self::tract::{TensorLayout, TractEngine, TractError, TractModelLoader};

/// 推理引擎
///
/// 执行一个已加载的计算图并返回原始输出张量。检测模型使用多输出的 [`execute`](Self::execute)，
/// 分类模型使用单输出的 [`predict`](Self::predict)。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型声明的输入维度，未知维度为 `None`
  fn input_dims(&self) -> [Option<usize>; 4];

  fn execute(&self, input: &Tensor<'_>) -> Result<Vec<RawTensor>, Self::Error>;

  fn predict(&self, input: &Tensor<'_>) -> Result<RawTensor, Self::Error>;
}

/// 模型加载器，负责把模型文件变成可执行的推理引擎
pub trait ModelLoader {
  type Engine: InferenceEngine;
  type Error: std::error::Error + Send + Sync + 'static;

  /// 加载模型，通过 `progress` 报告 [0, 1] 区间内的进度
  fn load(self, progress: &mut dyn FnMut(f32)) -> Result<Self::Engine, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  Load(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输入形状无效: {0:?}")]
  InvalidShape([Option<usize>; 4]),
  #[error("模型预热失败: {0}")]
  WarmUp(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 模型用途，决定预热时调用哪种执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  Detector,
  Classifier,
}

/// 模型输入形状 (batch, height, width, channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub batch: usize,
  pub height: u32,
  pub width: u32,
  pub channels: usize,
}

impl InputShape {
  /// 由声明维度构造，未知维度按 1 处理
  pub fn from_dims(dims: [Option<usize>; 4]) -> Result<Self, ModelError> {
    let [batch, height, width, channels] = dims.map(|dim| dim.unwrap_or(1));
    if height == 0 || width == 0 || channels != 3 || batch == 0 {
      return Err(ModelError::InvalidShape(dims));
    }
    Ok(Self {
      batch,
      height: height as u32,
      width: width as u32,
      channels,
    })
  }

  pub fn dims(&self) -> [usize; 4] {
    [
      self.batch,
      self.height as usize,
      self.width as usize,
      self.channels,
    ]
  }
}

/// 保证进度单调且位于 [0, 1]
struct Progress<'a> {
  last: f32,
  sink: &'a mut dyn FnMut(f32),
}

impl Progress<'_> {
  fn report(&mut self, fraction: f32) {
    let fraction = if fraction.is_nan() {
      self.last
    } else {
      fraction.clamp(0.0, 1.0).max(self.last)
    };
    self.last = fraction;
    (self.sink)(fraction);
  }
}

/// 已加载并预热的模型
///
/// 生命周期：[`load`](Self::load) 加载并预热后进入就绪状态，之后以只读方式在各次推理间共享，
/// 最后由 [`dispose`](Self::dispose) 释放。
pub struct ModelHandle<E> {
  engine: E,
  kind: ModelKind,
  input_shape: InputShape,
  tensors: TensorBackend,
}

impl<E: InferenceEngine> ModelHandle<E> {
  /// 加载模型并预热
  pub fn load<L>(
    loader: L,
    kind: ModelKind,
    mut on_progress: impl FnMut(f32),
  ) -> Result<Self, ModelError>
  where
    L: ModelLoader<Engine = E>,
  {
    let mut progress = Progress {
      last: 0.0,
      sink: &mut on_progress,
    };
    progress.report(0.0);
    info!("正在加载{}模型...", kind_name(kind));
    let engine = loader
      .load(&mut |fraction| progress.report(fraction))
      .map_err(|e| ModelError::Load(Box::new(e)))?;
    let handle = Self::from_engine(engine, kind)?;
    progress.report(1.0);
    Ok(handle)
  }

  /// 由已构建的推理引擎创建句柄并预热
  pub fn from_engine(engine: E, kind: ModelKind) -> Result<Self, ModelError> {
    let input_shape = InputShape::from_dims(engine.input_dims())?;
    debug!("模型输入形状: {:?}", input_shape);

    let handle = Self {
      engine,
      kind,
      input_shape,
      tensors: TensorBackend::new(),
    };
    handle.warm_up()?;
    info!("{}模型就绪", kind_name(kind));
    Ok(handle)
  }

  fn warm_up(&self) -> Result<(), ModelError> {
    let now = std::time::Instant::now();
    let scope = self.scope();
    let dummy = scope.filled(&self.input_shape.dims(), 1.0);
    match self.kind {
      ModelKind::Detector => {
        let outputs = self
          .engine
          .execute(&dummy)
          .map_err(|e| ModelError::WarmUp(Box::new(e)))?;
        drop(outputs);
      }
      ModelKind::Classifier => {
        let output = self
          .engine
          .predict(&dummy)
          .map_err(|e| ModelError::WarmUp(Box::new(e)))?;
        drop(output);
      }
    }
    dummy.release();
    debug!("模型预热完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn kind(&self) -> ModelKind {
    self.kind
  }

  pub fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  /// 张量分配记账
  pub fn tensors(&self) -> &TensorBackend {
    &self.tensors
  }

  /// 打开一个推理周期的张量作用域
  pub fn scope(&self) -> TensorScope<'_> {
    self.tensors.scope()
  }

  /// 释放模型
  pub fn dispose(self) {
    info!("释放{}模型", kind_name(self.kind));
    drop(self)
  }
}

fn kind_name(kind: ModelKind) -> &'static str {
  match kind {
    ModelKind::Detector => "检测",
    ModelKind::Classifier => "分类",
  }
}
