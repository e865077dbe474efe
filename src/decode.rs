// 该文件是 Beifeng （北风） 项目的一部分。
// src/decode.rs - 检测框解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 检测框解码
//!
//! 将模型输出的三个平行数组（框、分数、类别）转换为原图像素坐标下的 [`Detection`]。
//!
//! 坐标变换分两步：先除以模型输入尺寸得到补边正方形内的归一化坐标
//! （[`BoxScale::Normalized`] 时跳过），再乘以原图尺寸与补边比例，即补边正方形的边长。
//! 分数严格大于阈值的候选才会保留，默认不做 NMS。

use thiserror::Error;
use tracing::debug;

use crate::model::Labels;
use crate::output::RenderSurface;
use crate::output::draw::{Palette, render_detections};
use crate::preprocess::Ratios;

/// 默认置信度阈值
pub const DEFAULT_THRESHOLD: f32 = 0.2;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("输出数组未对齐: 框 {boxes} 个值, 分数 {scores} 个, 类别 {classes} 个")]
  Misaligned {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
}

/// 原始框的坐标排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxLayout {
  /// [x1, y1, x2, y2]
  #[default]
  Xyxy,
  /// [y1, x1, y2, x2]
  Yxyx,
  /// [cx, cy, w, h]
  Cxcywh,
}

/// 原始框坐标的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxScale {
  /// 相对补边正方形归一化到 [0, 1]
  #[default]
  Normalized,
  /// 模型输入像素
  ModelPixels,
}

/// 原图像素坐标下的检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub x1: f32,
  pub y1: f32,
  pub width: f32,
  pub height: f32,
  pub class_id: u32,
  pub score: f32,
}

impl Detection {
  pub fn x2(&self) -> f32 {
    self.x1 + self.width
  }

  pub fn y2(&self) -> f32 {
    self.y1 + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  /// 计算两个检测框的 IoU
  pub fn iou(&self, other: &Detection) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2().min(other.x2());
    let y2 = self.y2().min(other.y2());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 模型的原始检测输出，下标 i 在三个数组中描述同一个候选
#[derive(Debug, Clone, Copy)]
pub struct RawDetections<'a> {
  /// 每个候选 4 个值
  pub boxes: &'a [f32],
  pub scores: &'a [f32],
  pub classes: &'a [f32],
}

impl RawDetections<'_> {
  /// 检查三个数组是否对齐，返回候选数量
  pub fn candidates(&self) -> Result<usize, DecodeError> {
    let count = self.scores.len();
    if self.boxes.len() != count * 4 || self.classes.len() != count {
      return Err(DecodeError::Misaligned {
        boxes: self.boxes.len(),
        scores: self.scores.len(),
        classes: self.classes.len(),
      });
    }
    Ok(count)
  }
}

/// 坐标还原所需的几何信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeGeometry {
  pub ratios: Ratios,
  /// 原图 (宽, 高)
  pub source_size: (u32, u32),
  /// 模型输入 (宽, 高)
  pub model_size: (u32, u32),
}

impl DecodeGeometry {
  /// 补边正方形在原图像素下的边长 (x, y)，两者相等
  fn padded_extent(&self) -> (f32, f32) {
    (
      self.source_size.0 as f32 * self.ratios.x,
      self.source_size.1 as f32 * self.ratios.y,
    )
  }

  fn input_scale(&self, scale: BoxScale) -> (f32, f32) {
    match scale {
      BoxScale::Normalized => (1.0, 1.0),
      BoxScale::ModelPixels => (self.model_size.0 as f32, self.model_size.1 as f32),
    }
  }

  /// 将一个原始框转换为原图像素下的 [x1, y1, x2, y2]，不做裁剪
  pub fn to_source(&self, raw: &[f32], layout: BoxLayout, scale: BoxScale) -> [f32; 4] {
    let [x1, y1, x2, y2] = match layout {
      BoxLayout::Xyxy => [raw[0], raw[1], raw[2], raw[3]],
      BoxLayout::Yxyx => [raw[1], raw[0], raw[3], raw[2]],
      BoxLayout::Cxcywh => [
        raw[0] - raw[2] / 2.0,
        raw[1] - raw[3] / 2.0,
        raw[0] + raw[2] / 2.0,
        raw[1] + raw[3] / 2.0,
      ],
    };
    let (in_w, in_h) = self.input_scale(scale);
    let (ext_w, ext_h) = self.padded_extent();
    [
      x1 / in_w * ext_w,
      y1 / in_h * ext_h,
      x2 / in_w * ext_w,
      y2 / in_h * ext_h,
    ]
  }

  /// [`to_source`](Self::to_source) 的逆变换
  pub fn to_raw(&self, detection: &Detection, layout: BoxLayout, scale: BoxScale) -> [f32; 4] {
    let (in_w, in_h) = self.input_scale(scale);
    let (ext_w, ext_h) = self.padded_extent();
    let x1 = detection.x1 / ext_w * in_w;
    let y1 = detection.y1 / ext_h * in_h;
    let x2 = detection.x2() / ext_w * in_w;
    let y2 = detection.y2() / ext_h * in_h;
    match layout {
      BoxLayout::Xyxy => [x1, y1, x2, y2],
      BoxLayout::Yxyx => [y1, x1, y2, x2],
      BoxLayout::Cxcywh => [(x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1],
    }
  }
}

/// 检测框解码器与渲染配置
#[derive(Debug, Clone)]
pub struct BoxDecoder {
  threshold: f32,
  layout: BoxLayout,
  scale: BoxScale,
  nms_iou: Option<f32>,
  labels: Labels,
  palette: Palette,
}

impl Default for BoxDecoder {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      layout: BoxLayout::default(),
      scale: BoxScale::default(),
      nms_iou: None,
      labels: Labels::coco(),
      palette: Palette::default(),
    }
  }
}

impl BoxDecoder {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_layout(mut self, layout: BoxLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_scale(mut self, scale: BoxScale) -> Self {
    self.scale = scale;
    self
  }

  /// 启用按类别的贪心 NMS
  pub fn with_nms(mut self, iou_threshold: f32) -> Self {
    self.nms_iou = Some(iou_threshold);
    self
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn layout(&self) -> BoxLayout {
    self.layout
  }

  pub fn scale(&self) -> BoxScale {
    self.scale
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 解码原始输出；若提供绘制表面，则清空后绘制全部结果
  pub fn decode(
    &self,
    raw: &RawDetections<'_>,
    geometry: &DecodeGeometry,
    surface: Option<&mut dyn RenderSurface>,
  ) -> Result<Vec<Detection>, DecodeError> {
    let count = raw.candidates()?;
    let (width, height) = (geometry.source_size.0 as f32, geometry.source_size.1 as f32);

    let mut detections = Vec::new();
    for i in 0..count {
      let score = raw.scores[i];
      // NaN 同样被丢弃
      if !(score > self.threshold) {
        continue;
      }
      let class = raw.classes[i];
      if !(class >= 0.0) {
        continue;
      }

      let [x1, y1, x2, y2] =
        geometry.to_source(&raw.boxes[i * 4..i * 4 + 4], self.layout, self.scale);
      let x1 = x1.clamp(0.0, width);
      let y1 = y1.clamp(0.0, height);
      let x2 = x2.clamp(0.0, width);
      let y2 = y2.clamp(0.0, height);
      if x2 <= x1 || y2 <= y1 {
        continue;
      }

      detections.push(Detection {
        x1,
        y1,
        width: x2 - x1,
        height: y2 - y1,
        class_id: class.round() as u32,
        score,
      });
    }

    if let Some(iou) = self.nms_iou {
      detections = nms(detections, iou);
    }

    debug!("{} 个候选中保留 {} 个检测结果", count, detections.len());

    if let Some(surface) = surface {
      render_detections(
        surface,
        &detections,
        geometry.source_size,
        &self.labels,
        &self.palette,
      );
    }

    Ok(detections)
  }
}

/// 非极大值抑制，仅在同类别之间进行
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == candidate.class_id && kept.iou(&candidate) >= iou_threshold);
    if !suppressed {
      result.push(candidate);
    }
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{RecordingSurface, SurfaceOp};

  fn geometry(source: (u32, u32), model: (u32, u32)) -> DecodeGeometry {
    DecodeGeometry {
      ratios: Ratios::for_frame(source.0, source.1).unwrap(),
      source_size: source,
      model_size: model,
    }
  }

  #[test]
  fn score_equal_to_threshold_is_excluded() {
    let decoder = BoxDecoder::default().with_threshold(0.5);
    let raw = RawDetections {
      boxes: &[0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.5],
      scores: &[0.5, 0.50001, 0.49],
      classes: &[0.0, 1.0, 2.0],
    };
    let detections = decoder
      .decode(&raw, &geometry((10, 10), (64, 64)), None)
      .unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_id, 1);
  }

  #[test]
  fn model_pixel_box_maps_to_wide_frame() {
    // 100x50 -> 补边到 100x100，xRatio = 1, yRatio = 2
    let decoder = BoxDecoder::default().with_scale(BoxScale::ModelPixels);
    let geometry = geometry((100, 50), (640, 640));
    assert_eq!(geometry.ratios, Ratios { x: 1.0, y: 2.0 });

    let raw = RawDetections {
      boxes: &[0.0, 0.0, 64.0, 64.0],
      scores: &[0.9],
      classes: &[3.0],
    };
    let detections = decoder.decode(&raw, &geometry, None).unwrap();
    let det = detections[0];
    assert!((det.x1 - 0.0).abs() < 1e-4);
    assert!((det.y1 - 0.0).abs() < 1e-4);
    assert!((det.width - 10.0).abs() < 1e-4);
    assert!((det.height - 10.0).abs() < 1e-4);
    assert_eq!(det.class_id, 3);
  }

  #[test]
  fn boxes_are_clamped_to_frame() {
    let decoder = BoxDecoder::default().with_scale(BoxScale::ModelPixels);
    let raw = RawDetections {
      boxes: &[-32.0, 0.0, 640.0, 640.0],
      scores: &[0.9],
      classes: &[0.0],
    };
    let det = decoder
      .decode(&raw, &geometry((100, 50), (640, 640)), None)
      .unwrap()[0];
    assert_eq!(det.x1, 0.0);
    assert_eq!(det.y1, 0.0);
    assert!(det.x2() <= 100.0);
    assert!(det.y2() <= 50.0);
  }

  #[test]
  fn box_entirely_in_padding_is_dropped() {
    let decoder = BoxDecoder::default();
    let raw = RawDetections {
      boxes: &[0.1, 0.7, 0.3, 0.9],
      scores: &[0.9],
      classes: &[0.0],
    };
    let detections = decoder
      .decode(&raw, &geometry((100, 50), (640, 640)), None)
      .unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn decoding_is_idempotent() {
    let decoder = BoxDecoder::default();
    let raw = RawDetections {
      boxes: &[0.1, 0.1, 0.4, 0.3, 0.5, 0.2, 0.9, 0.45],
      scores: &[0.8, 0.3],
      classes: &[0.0, 2.0],
    };
    let geometry = geometry((200, 100), (320, 320));
    let first = decoder.decode(&raw, &geometry, None).unwrap();
    let second = decoder.decode(&raw, &geometry, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
  }

  #[test]
  fn round_trip_through_model_space() {
    let geometry = geometry((120, 80), (640, 640));
    for (layout, scale, raw_box) in [
      (BoxLayout::Xyxy, BoxScale::Normalized, [0.1, 0.2, 0.5, 0.6]),
      (BoxLayout::Yxyx, BoxScale::Normalized, [0.2, 0.1, 0.6, 0.5]),
      (BoxLayout::Cxcywh, BoxScale::ModelPixels, [320.0, 200.0, 100.0, 80.0]),
    ] {
      let decoder = BoxDecoder::default().with_layout(layout).with_scale(scale);
      let raw = RawDetections {
        boxes: &raw_box,
        scores: &[0.9],
        classes: &[1.0],
      };
      let det = decoder.decode(&raw, &geometry, None).unwrap()[0];
      let back = geometry.to_raw(&det, layout, scale);
      for (a, b) in back.iter().zip(raw_box.iter()) {
        assert!((a - b).abs() < 1e-3, "{:?} != {:?}", back, raw_box);
      }
    }
  }

  #[test]
  fn misaligned_arrays_are_rejected() {
    let decoder = BoxDecoder::default();
    let raw = RawDetections {
      boxes: &[0.0, 0.0, 1.0],
      scores: &[0.9],
      classes: &[0.0],
    };
    assert_eq!(
      decoder.decode(&raw, &geometry((10, 10), (64, 64)), None),
      Err(DecodeError::Misaligned {
        boxes: 3,
        scores: 1,
        classes: 1
      })
    );
  }

  #[test]
  fn overlapping_boxes_pass_through_without_nms() {
    let raw = RawDetections {
      boxes: &[0.1, 0.1, 0.5, 0.5, 0.11, 0.11, 0.5, 0.5, 0.1, 0.1, 0.5, 0.5],
      scores: &[0.7, 0.9, 0.8],
      classes: &[0.0, 0.0, 1.0],
    };
    let geometry = geometry((100, 100), (64, 64));

    let plain = BoxDecoder::default().decode(&raw, &geometry, None).unwrap();
    assert_eq!(plain.len(), 3);

    let suppressed = BoxDecoder::default()
      .with_nms(0.5)
      .decode(&raw, &geometry, None)
      .unwrap();
    assert_eq!(suppressed.len(), 2);
    assert_eq!(suppressed[0].score, 0.9);
    assert_eq!(suppressed[1].class_id, 1);
  }

  #[test]
  fn surface_is_cleared_and_drawn() {
    let mut surface = RecordingSurface::new(100, 100);
    let raw = RawDetections {
      boxes: &[0.1, 0.1, 0.5, 0.5],
      scores: &[0.876],
      classes: &[0.0],
    };
    let detections = BoxDecoder::default()
      .decode(&raw, &geometry((100, 100), (64, 64)), Some(&mut surface))
      .unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(surface.ops.first(), Some(&SurfaceOp::Clear));
    assert!(
      surface
        .ops
        .iter()
        .any(|op| matches!(op, SurfaceOp::Text(text) if text == "person - 87.6%"))
    );
  }
}
