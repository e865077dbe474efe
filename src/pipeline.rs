// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline.rs - 检测加可选分类的图像流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{RgbImage, imageops};
use tracing::{debug, info};

use crate::{
  crop::{CropBox, crop_image},
  decode::{BoxDecoder, Detection},
  detector::{InferenceError, classify_image, detect_image},
  model::{InferenceEngine, Labels, ModelHandle},
  output::RenderSurface,
};

/// 检测前把图像缩放到能放进的范围 (宽, 高)
pub const DEFAULT_FIT_WITHIN: (u32, u32) = (720, 500);

/// 分类结论
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
  pub class_id: usize,
  pub label: String,
  pub probability: f32,
  pub probabilities: Vec<f32>,
}

/// 一次流水线运行的结果
#[derive(Debug, Clone)]
pub struct PipelineReport {
  /// 工作图像（缩放后）像素坐标下的检测结果
  pub detections: Vec<Detection>,
  pub verdict: Option<Verdict>,
  /// 输入图像尺寸
  pub source_size: (u32, u32),
  /// 实际用于检测的图像
  pub frame: RgbImage,
}

/// 检测流水线，可选地对第一个检测结果做裁剪分类
///
/// ```no_run
/// # use beifeng::{decode::BoxDecoder, model::{InferenceEngine, ModelHandle}, pipeline::Pipeline};
/// # fn run<E: InferenceEngine>(detector: &ModelHandle<E>, image: &image::RgbImage) {
/// let pipeline = Pipeline::new(detector, BoxDecoder::default()).fit_within(Some((720, 500)));
/// let report = pipeline.run(image, None);
/// # }
/// ```
pub struct Pipeline<'m, D, C> {
  detector: &'m ModelHandle<D>,
  classifier: Option<(&'m ModelHandle<C>, Labels)>,
  decoder: BoxDecoder,
  fit_within: Option<(u32, u32)>,
}

impl<'m, D: InferenceEngine> Pipeline<'m, D, D> {
  pub fn new(detector: &'m ModelHandle<D>, decoder: BoxDecoder) -> Self {
    Self {
      detector,
      classifier: None,
      decoder,
      fit_within: Some(DEFAULT_FIT_WITHIN),
    }
  }
}

impl<'m, D: InferenceEngine, C: InferenceEngine> Pipeline<'m, D, C> {
  /// 启用分类阶段
  pub fn with_classifier<C2: InferenceEngine>(
    self,
    classifier: &'m ModelHandle<C2>,
    labels: Labels,
  ) -> Pipeline<'m, D, C2> {
    Pipeline {
      detector: self.detector,
      classifier: Some((classifier, labels)),
      decoder: self.decoder,
      fit_within: self.fit_within,
    }
  }

  /// 设置检测前的缩放范围，`None` 表示保持原尺寸
  pub fn fit_within(mut self, bounds: Option<(u32, u32)>) -> Self {
    self.fit_within = bounds;
    self
  }

  pub fn decoder(&self) -> &BoxDecoder {
    &self.decoder
  }

  /// 运行一次：缩放、检测（可选绘制并输出）、裁剪分类
  pub fn run(
    &self,
    image: &RgbImage,
    mut surface: Option<&mut dyn RenderSurface>,
  ) -> Result<PipelineReport, InferenceError> {
    let source_size = image.dimensions();
    let frame = match self.fit_within {
      Some(bounds) => fit_within(image, bounds),
      None => image.clone(),
    };
    debug!(
      "流水线输入 {}x{}, 工作尺寸 {}x{}",
      source_size.0,
      source_size.1,
      frame.width(),
      frame.height()
    );

    if let Some(surface) = surface.as_mut() {
      surface.resize(frame.width(), frame.height());
    }
    let detections = detect_image(
      &frame,
      self.detector,
      &self.decoder,
      surface.as_mut().map(|s| &mut **s as &mut dyn RenderSurface),
    )?;
    info!("检测到 {} 个目标", detections.len());

    let verdict = match (&self.classifier, detections.first()) {
      (Some((classifier, labels)), Some(first)) => {
        let (max_w, max_h) = self.fit_within.unwrap_or(DEFAULT_FIT_WITHIN);
        let crop = CropBox::from_detection(first).capped(max_w, max_h);
        let cropped = crop_image(&frame, &crop);
        classify_image(&cropped, classifier).and_then(|classification| {
          let (class_id, probability) = classification.top()?;
          Some(Verdict {
            class_id,
            label: labels.name(class_id as u32).to_string(),
            probability,
            probabilities: classification.probabilities,
          })
        })
      }
      _ => None,
    };
    if let Some(verdict) = &verdict {
      info!(
        "分类结果: {} ({:.1}%)",
        verdict.label,
        verdict.probability * 100.0
      );
    }

    if let Some(surface) = surface {
      surface.present(&frame)?;
    }

    Ok(PipelineReport {
      detections,
      verdict,
      source_size,
      frame,
    })
  }
}

/// 保持宽高比缩放到恰好放进 `bounds`，较小的图像会被放大
pub fn fit_within(image: &RgbImage, bounds: (u32, u32)) -> RgbImage {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 || bounds.0 == 0 || bounds.1 == 0 {
    return image.clone();
  }
  let ratio = (width as f32 / bounds.0 as f32).max(height as f32 / bounds.1 as f32);
  let new_width = ((width as f32 / ratio) as u32).max(1);
  let new_height = ((height as f32 / ratio) as u32).max(1);
  if (new_width, new_height) == (width, height) {
    return image.clone();
  }
  imageops::resize(
    image,
    new_width,
    new_height,
    imageops::FilterType::Triangle,
  )
}
