// 该文件是 Beifeng （北风） 项目的一部分。
// src/testing.rs - 单元测试用的脚本化引擎与记录表面
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

use std::cell::Cell;
use std::rc::Rc;

use image::Rgb;
use thiserror::Error;

use crate::{
  model::{InferenceEngine, ModelLoader},
  output::{RenderSurface, SurfaceRect},
  tensor::{RawTensor, Tensor},
};

#[derive(Error, Debug)]
#[error("脚本化引擎故障")]
pub struct ScriptedError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
  pub execute: usize,
  pub predict: usize,
}

/// 按预设结果应答的推理引擎
pub struct ScriptedEngine {
  size: usize,
  outputs: Vec<RawTensor>,
  probabilities: Vec<f32>,
  /// 第几次调用起开始失败
  fail_from: Option<usize>,
  calls: Rc<Cell<CallCounts>>,
}

impl ScriptedEngine {
  fn new(size: usize) -> Self {
    Self {
      size,
      outputs: Vec::new(),
      probabilities: Vec::new(),
      fail_from: None,
      calls: Rc::new(Cell::new(CallCounts::default())),
    }
  }

  pub fn detector(size: usize, outputs: Vec<RawTensor>) -> Self {
    Self {
      outputs,
      ..Self::new(size)
    }
  }

  /// 以 [boxes, scores, classes] 三个输出应答的检测模型
  pub fn detections(size: usize, boxes: &[f32], scores: &[f32], classes: &[f32]) -> Self {
    let count = scores.len();
    Self::detector(
      size,
      vec![
        RawTensor::new(vec![1, count, 4], boxes.to_vec()),
        RawTensor::new(vec![1, count], scores.to_vec()),
        RawTensor::new(vec![1, count], classes.to_vec()),
      ],
    )
  }

  pub fn classifier(size: usize, probabilities: Vec<f32>) -> Self {
    Self {
      probabilities,
      ..Self::new(size)
    }
  }

  pub fn failing(size: usize) -> Self {
    Self::new(size).fail_after(0)
  }

  /// 前 `calls` 次调用正常，之后全部失败
  pub fn fail_after(mut self, calls: usize) -> Self {
    self.fail_from = Some(calls);
    self
  }

  pub fn calls(&self) -> Rc<Cell<CallCounts>> {
    Rc::clone(&self.calls)
  }

  fn record(&self, update: impl FnOnce(&mut CallCounts)) -> Result<(), ScriptedError> {
    let mut counts = self.calls.get();
    let before = counts.execute + counts.predict;
    update(&mut counts);
    self.calls.set(counts);
    match self.fail_from {
      Some(limit) if before >= limit => Err(ScriptedError),
      _ => Ok(()),
    }
  }
}

impl InferenceEngine for ScriptedEngine {
  type Error = ScriptedError;

  fn input_dims(&self) -> [Option<usize>; 4] {
    [None, Some(self.size), Some(self.size), Some(3)]
  }

  fn execute(&self, _input: &Tensor<'_>) -> Result<Vec<RawTensor>, Self::Error> {
    self.record(|counts| counts.execute += 1)?;
    Ok(self.outputs.clone())
  }

  fn predict(&self, _input: &Tensor<'_>) -> Result<RawTensor, Self::Error> {
    self.record(|counts| counts.predict += 1)?;
    Ok(RawTensor::new(
      vec![1, self.probabilities.len()],
      self.probabilities.clone(),
    ))
  }
}

/// 依次报告给定进度后交出引擎
pub struct ScriptedLoader {
  engine: ScriptedEngine,
  progress: Vec<f32>,
}

impl ScriptedLoader {
  pub fn new(engine: ScriptedEngine, progress: Vec<f32>) -> Self {
    Self { engine, progress }
  }
}

impl ModelLoader for ScriptedLoader {
  type Engine = ScriptedEngine;
  type Error = ScriptedError;

  fn load(self, progress: &mut dyn FnMut(f32)) -> Result<Self::Engine, Self::Error> {
    for fraction in self.progress {
      progress(fraction);
    }
    Ok(self.engine)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
  Clear,
  Stroke(SurfaceRect),
  Fill(SurfaceRect),
  Text(String),
  Present,
}

/// 记录所有绘制调用的表面
pub struct RecordingSurface {
  width: u32,
  height: u32,
  pub ops: Vec<SurfaceOp>,
}

impl RecordingSurface {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      ops: Vec::new(),
    }
  }

  pub fn count(&self, op: &SurfaceOp) -> usize {
    self.ops.iter().filter(|recorded| *recorded == op).count()
  }
}

impl RenderSurface for RecordingSurface {
  fn size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn clear(&mut self) {
    self.ops.push(SurfaceOp::Clear);
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, _color: Rgb<u8>, _line_width: u32) {
    self.ops.push(SurfaceOp::Stroke(rect));
  }

  fn fill_rect(&mut self, rect: SurfaceRect, _color: Rgb<u8>) {
    self.ops.push(SurfaceOp::Fill(rect));
  }

  fn text_size(&self, text: &str) -> (u32, u32) {
    (text.len() as u32 * 8, 14)
  }

  fn draw_text(&mut self, _x: i32, _y: i32, text: &str, _color: Rgb<u8>) {
    self.ops.push(SurfaceOp::Text(text.to_string()));
  }

  fn present(&mut self, _frame: &image::RgbImage) -> Result<(), crate::output::SurfaceError> {
    self.ops.push(SurfaceOp::Present);
    Ok(())
  }
}
