// 该文件是 Beifeng （北风） 项目的一部分。
// src/preprocess.rs - 图像预处理（补边、缩放、归一化）
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

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::trace;

use crate::tensor::{Tensor, TensorError, TensorScope};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("模型输入尺寸无效: {width}x{height}")]
  EmptyTarget { width: u32, height: u32 },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 补边后的正方形边长与原图宽高之比，总是不小于 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratios {
  pub x: f32,
  pub y: f32,
}

impl Ratios {
  /// 由原图尺寸计算补边比例
  pub fn for_frame(width: u32, height: u32) -> Result<Self, PreprocessError> {
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }
    let max_size = width.max(height) as f32;
    Ok(Self {
      x: max_size / width as f32,
      y: max_size / height as f32,
    })
  }
}

/// 预处理结果：形状为 (1, H, W, 3) 的输入张量以及坐标还原所需的信息
#[derive(Debug)]
pub struct Preprocessed<'s> {
  pub tensor: Tensor<'s>,
  pub ratios: Ratios,
  /// 原图 (宽, 高)
  pub source_size: (u32, u32),
}

/// 将右侧和下方补零，使图像成为边长为 max(w, h) 的正方形，左上角对齐
pub fn letterbox(frame: &RgbImage) -> RgbImage {
  let (width, height) = frame.dimensions();
  let max_size = width.max(height);
  if width == height {
    return frame.clone();
  }
  let mut padded = RgbImage::new(max_size, max_size);
  imageops::replace(&mut padded, frame, 0, 0);
  padded
}

/// 预处理一帧图像
///
/// 1. 右下补零成正方形；
/// 2. 双线性缩放到 `target_width` x `target_height`；
/// 3. 除以 255 归一化到 [0, 1]；
/// 4. 增加批次维度，输出 NHWC 布局。
pub fn preprocess<'s>(
  scope: &'s TensorScope<'_>,
  frame: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<Preprocessed<'s>, PreprocessError> {
  let (width, height) = frame.dimensions();
  let ratios = Ratios::for_frame(width, height)?;
  if target_width == 0 || target_height == 0 {
    return Err(PreprocessError::EmptyTarget {
      width: target_width,
      height: target_height,
    });
  }

  let padded = letterbox(frame);
  let resized = imageops::resize(
    &padded,
    target_width,
    target_height,
    imageops::FilterType::Triangle,
  );

  let data: Vec<f32> = resized
    .into_raw()
    .into_iter()
    .map(|value| value as f32 / 255.0)
    .collect();

  let shape = [
    1,
    target_height as usize,
    target_width as usize,
    RGB_CHANNELS,
  ];
  let tensor = scope.alloc(&shape, data)?;

  trace!(
    "预处理: {}x{} -> {:?}, 比例 ({:.3}, {:.3})",
    width, height, shape, ratios.x, ratios.y
  );

  Ok(Preprocessed {
    tensor,
    ratios,
    source_size: (width, height),
  })
}
