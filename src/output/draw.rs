// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::Rgb;

use crate::{
  decode::Detection,
  model::Labels,
  output::{RenderSurface, SurfaceRect},
};

const PALETTE_SIZE: usize = 80;
const MIN_LINE_WIDTH: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]); // 白色文本

/// 按类别分配的边框颜色
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
  fn default() -> Self {
    // 生成 80 种不同的颜色（对应 COCO 数据集的 80 个类别）
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }
}

impl Palette {
  pub fn color(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 标签文本，如 `person - 87.5%`
pub fn label_text(labels: &Labels, detection: &Detection) -> String {
  format!(
    "{} - {:.1}%",
    labels.name(detection.class_id),
    detection.score * 100.0
  )
}

/// 清空表面并绘制检测框与标签
///
/// 检测框位于原图像素坐标，按表面与原图的尺寸比例缩放。
pub fn render_detections(
  surface: &mut dyn RenderSurface,
  detections: &[Detection],
  source_size: (u32, u32),
  labels: &Labels,
  palette: &Palette,
) {
  surface.clear();

  let (surface_w, surface_h) = surface.size();
  if source_size.0 == 0 || source_size.1 == 0 || surface_w == 0 || surface_h == 0 {
    return;
  }
  let sx = surface_w as f32 / source_size.0 as f32;
  let sy = surface_h as f32 / source_size.1 as f32;
  let line_width = (surface_w.min(surface_h) / 200).max(MIN_LINE_WIDTH);

  for detection in detections {
    let color = palette.color(detection.class_id);

    let x = (detection.x1 * sx).floor() as i32;
    let y = (detection.y1 * sy).floor() as i32;
    let width = (detection.width * sx).ceil() as u32;
    let height = (detection.height * sy).ceil() as u32;
    if width == 0 || height == 0 {
      continue;
    }
    surface.stroke_rect(
      SurfaceRect {
        x,
        y,
        width,
        height,
      },
      color,
      line_width,
    );

    // 标签放在边框上方，超出顶部时贴齐顶部
    let label = label_text(labels, detection);
    let (text_w, text_h) = surface.text_size(&label);
    let label_x = (x - 1).max(0);
    let label_y = (y - (text_h + line_width) as i32).max(0);
    surface.fill_rect(
      SurfaceRect {
        x: label_x,
        y: label_y,
        width: text_w + line_width,
        height: text_h + line_width,
      },
      color,
    );
    surface.draw_text(label_x, label_y, &label, LABEL_TEXT_COLOR);
  }
}
