// 该文件是 Beifeng （北风） 项目的一部分。
// src/tensor.rs - 张量与作用域内存管理
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

//! # 张量作用域
//!
//! 每个推理周期打开一个 [`TensorScope`]，周期内创建的所有 [`Tensor`] 都借用该作用域，
//! 因此不可能活得比作用域更久。张量在离开作用域（或显式 [`Tensor::release`]）时释放，
//! 作用域关闭时会回收遗漏的分配，保证 [`TensorBackend::live_tensors`] 回到基线。
//!
//! ```
//! use beifeng::tensor::TensorBackend;
//!
//! let backend = TensorBackend::new();
//! {
//!   let scope = backend.scope();
//!   let input = scope.filled(&[1, 4, 4, 3], 1.0);
//!   assert_eq!(backend.live_tensors(), 1);
//!   input.release();
//! }
//! assert_eq!(backend.live_tensors(), 0);
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{trace, warn};

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

fn element_count(shape: &[usize]) -> usize {
  shape.iter().product()
}

/// 推理引擎输出的原始张量，尚未纳入任何作用域
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl RawTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

/// 张量分配记账
///
/// 记录当前存活的张量数量，每个模型句柄持有一个。
#[derive(Debug, Default)]
pub struct TensorBackend {
  live: AtomicUsize,
  scopes: AtomicU64,
}

impl TensorBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前存活的张量数量
  pub fn live_tensors(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  /// 打开一个新的张量作用域
  pub fn scope(&self) -> TensorScope<'_> {
    let id = self.scopes.fetch_add(1, Ordering::Relaxed) + 1;
    trace!("打开张量作用域 {}", id);
    TensorScope {
      backend: self,
      id,
      live: Cell::new(0),
      allocated: Cell::new(0),
    }
  }
}

/// 一个推理周期的张量作用域
pub struct TensorScope<'b> {
  backend: &'b TensorBackend,
  id: u64,
  live: Cell<usize>,
  allocated: Cell<usize>,
}

impl<'b> TensorScope<'b> {
  /// 以给定形状和数据创建张量
  pub fn alloc(&self, shape: &[usize], data: Vec<f32>) -> Result<Tensor<'_>, TensorError> {
    let expected = element_count(shape);
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }
    Ok(self.track(shape.to_vec(), data))
  }

  /// 创建一个所有元素都为 `value` 的张量
  pub fn filled(&self, shape: &[usize], value: f32) -> Tensor<'_> {
    let data = vec![value; element_count(shape)];
    self.track(shape.to_vec(), data)
  }

  /// 将引擎输出纳入本作用域管理
  pub fn adopt(&self, raw: RawTensor) -> Result<Tensor<'_>, TensorError> {
    let RawTensor { shape, data } = raw;
    self.alloc(&shape, data)
  }

  /// 本作用域中尚未释放的张量数量
  pub fn live(&self) -> usize {
    self.live.get()
  }

  /// 本作用域累计分配的张量数量
  pub fn allocated(&self) -> usize {
    self.allocated.get()
  }

  fn track(&self, shape: Vec<usize>, data: Vec<f32>) -> Tensor<'_> {
    self.live.set(self.live.get() + 1);
    self.allocated.set(self.allocated.get() + 1);
    self.backend.live.fetch_add(1, Ordering::SeqCst);
    Tensor {
      shape,
      data,
      scope_live: &self.live,
      backend_live: &self.backend.live,
    }
  }
}

impl Drop for TensorScope<'_> {
  fn drop(&mut self) {
    let leaked = self.live.get();
    if leaked > 0 {
      warn!(
        "张量作用域 {} 关闭时仍有 {} 个张量未释放，强制回收",
        self.id, leaked
      );
      self.backend.live.fetch_sub(leaked, Ordering::SeqCst);
      self.live.set(0);
    }
    trace!(
      "关闭张量作用域 {}，共分配 {} 个张量",
      self.id,
      self.allocated.get()
    );
  }
}

/// 作用域内的张量，释放恰好发生一次
#[derive(Debug)]
pub struct Tensor<'s> {
  shape: Vec<usize>,
  data: Vec<f32>,
  scope_live: &'s Cell<usize>,
  backend_live: &'s AtomicUsize,
}

impl Tensor<'_> {
  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 同步取出数据副本，张量本身仍归作用域管理
  pub fn to_vec(&self) -> Vec<f32> {
    self.data.clone()
  }

  /// 显式释放
  pub fn release(self) {
    drop(self)
  }
}

impl Drop for Tensor<'_> {
  fn drop(&mut self) {
    self.scope_live.set(self.scope_live.get().saturating_sub(1));
    self.backend_live.fetch_sub(1, Ordering::SeqCst);
  }
}
