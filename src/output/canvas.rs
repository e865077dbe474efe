// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/canvas.rs - 叠加层画布
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::sync::OnceLock;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use crate::output::{RenderSurface, SurfaceRect};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 无字体时每字符平均宽度（粗略估计）
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// DejaVu Sans，许可见 assets/font-LICENSE.txt
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

/// 内嵌的默认字体，只解析一次
pub fn default_font() -> Option<FontArc> {
  static FONT: OnceLock<Option<FontArc>> = OnceLock::new();
  FONT
    .get_or_init(|| match FontArc::try_from_slice(EMBEDDED_FONT) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("无法加载内嵌字体，标签将不含文字: {}", e);
        None
      }
    })
    .clone()
}

#[derive(Error, Debug)]
pub enum FontError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  Invalid(#[from] ab_glyph::InvalidFont),
}

/// 透明背景的 RGBA 叠加层，可合成到原始帧上
///
/// 默认使用内嵌字体绘制标签文字，可通过 [`set_font`](Self::set_font) 替换。
pub struct Canvas {
  overlay: RgbaImage,
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Canvas {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      overlay: RgbaImage::from_pixel(width, height, TRANSPARENT),
      font: default_font(),
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn set_font(&mut self, font: FontArc) {
    self.font = Some(font);
  }

  /// 读取 TTF/OTF 字体文件
  pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc, FontError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    debug!("加载字体: {}", path.as_ref().display());
    Ok(font)
  }

  /// 调整尺寸，内容被清空
  pub fn resize(&mut self, width: u32, height: u32) {
    if self.overlay.dimensions() != (width, height) {
      self.overlay = RgbaImage::from_pixel(width, height, TRANSPARENT);
    }
  }

  pub fn overlay(&self) -> &RgbaImage {
    &self.overlay
  }

  /// 将叠加层按 alpha 合成到帧上；尺寸不同时叠加层会被拉伸到帧的尺寸
  pub fn composite(&self, frame: &RgbImage) -> RgbImage {
    let (width, height) = frame.dimensions();
    if self.overlay.width() == 0 || self.overlay.height() == 0 {
      return frame.clone();
    }
    let stretched;
    let overlay = if self.overlay.dimensions() == (width, height) {
      &self.overlay
    } else {
      stretched = imageops::resize(&self.overlay, width, height, imageops::FilterType::Nearest);
      &stretched
    };

    let mut output = frame.clone();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
      let Rgba([r, g, b, a]) = *overlay.get_pixel(x, y);
      if a == 0 {
        continue;
      }
      let alpha = a as f32 / 255.0;
      for (channel, top) in pixel.0.iter_mut().zip([r, g, b]) {
        *channel = (top as f32 * alpha + *channel as f32 * (1.0 - alpha)).round() as u8;
      }
    }
    output
  }

  /// 将表面矩形裁剪到画布范围内
  fn clip(&self, rect: SurfaceRect) -> Option<Rect> {
    let (width, height) = self.overlay.dimensions();
    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = (rect.x + rect.width as i32).min(width as i32);
    let y1 = (rect.y + rect.height as i32).min(height as i32);
    if x1 <= x0 || y1 <= y0 {
      return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
  }
}

fn opaque(color: Rgb<u8>) -> Rgba<u8> {
  let Rgb([r, g, b]) = color;
  Rgba([r, g, b, 255])
}

impl RenderSurface for Canvas {
  fn size(&self) -> (u32, u32) {
    self.overlay.dimensions()
  }

  fn clear(&mut self) {
    for pixel in self.overlay.pixels_mut() {
      *pixel = TRANSPARENT;
    }
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32) {
    // 向内逐像素收缩以加粗边框
    for inset in 0..line_width {
      let width = rect.width.saturating_sub(2 * inset);
      let height = rect.height.saturating_sub(2 * inset);
      if width == 0 || height == 0 {
        break;
      }
      let inner = SurfaceRect {
        x: rect.x + inset as i32,
        y: rect.y + inset as i32,
        width,
        height,
      };
      if let Some(clipped) = self.clip(inner) {
        draw_hollow_rect_mut(&mut self.overlay, clipped, opaque(color));
      }
    }
  }

  fn fill_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>) {
    if let Some(clipped) = self.clip(rect) {
      draw_filled_rect_mut(&mut self.overlay, clipped, opaque(color));
    }
  }

  fn text_size(&self, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(self.font_scale, font, text),
      None => (
        (text.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32,
        self.font_scale.y as u32,
      ),
    }
  }

  fn resize(&mut self, width: u32, height: u32) {
    Canvas::resize(self, width, height)
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    if let Some(font) = &self.font {
      draw_text_mut(
        &mut self.overlay,
        opaque(color),
        x,
        y,
        self.font_scale,
        font,
        text,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_canvas_is_transparent() {
    let canvas = Canvas::new(4, 3);
    assert_eq!(canvas.size(), (4, 3));
    assert!(canvas.overlay().pixels().all(|p| p[3] == 0));
  }

  #[test]
  fn stroke_draws_thick_border_and_clear_erases_it() {
    let mut canvas = Canvas::new(20, 20);
    let rect = SurfaceRect {
      x: 2,
      y: 2,
      width: 10,
      height: 10,
    };
    canvas.stroke_rect(rect, Rgb([255, 0, 0]), 2);
    assert_eq!(canvas.overlay().get_pixel(2, 2), &Rgba([255, 0, 0, 255]));
    assert_eq!(canvas.overlay().get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
    assert_eq!(canvas.overlay().get_pixel(6, 6)[3], 0);

    canvas.clear();
    assert!(canvas.overlay().pixels().all(|p| p[3] == 0));
  }

  #[test]
  fn drawing_outside_is_clipped() {
    let mut canvas = Canvas::new(10, 10);
    canvas.fill_rect(
      SurfaceRect {
        x: -5,
        y: 8,
        width: 8,
        height: 8,
      },
      Rgb([0, 255, 0]),
    );
    assert_eq!(canvas.overlay().get_pixel(0, 9), &Rgba([0, 255, 0, 255]));
    assert_eq!(canvas.overlay().get_pixel(3, 7)[3], 0);

    canvas.fill_rect(
      SurfaceRect {
        x: 20,
        y: 20,
        width: 4,
        height: 4,
      },
      Rgb([0, 255, 0]),
    );
  }

  #[test]
  fn composite_keeps_background_where_transparent() {
    let mut canvas = Canvas::new(4, 4);
    canvas.fill_rect(
      SurfaceRect {
        x: 0,
        y: 0,
        width: 2,
        height: 2,
      },
      Rgb([10, 20, 30]),
    );
    let frame = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
    let merged = canvas.composite(&frame);
    assert_eq!(merged.get_pixel(0, 0), &Rgb([10, 20, 30]));
    assert_eq!(merged.get_pixel(3, 3), &Rgb([200, 200, 200]));
  }

  #[test]
  fn text_size_is_estimated_without_font() {
    let mut canvas = Canvas::new(4, 4);
    canvas.font = None;
    let (w, h) = canvas.text_size("abcd");
    assert_eq!(w, 36);
    assert_eq!(h, 16);
  }

  #[test]
  fn labels_are_drawn_with_embedded_font() {
    assert!(default_font().is_some());
    let mut canvas = Canvas::new(120, 24);
    let (w, h) = canvas.text_size("person - 91.0%");
    assert!(w > 0 && w < 120);
    assert!(h > 0 && h <= 24);

    canvas.fill_rect(
      SurfaceRect {
        x: 0,
        y: 0,
        width: 120,
        height: 24,
      },
      Rgb([200, 0, 0]),
    );
    canvas.draw_text(2, 2, "person - 91.0%", Rgb([255, 255, 255]));
    let white = canvas
      .overlay()
      .pixels()
      .filter(|p| p[0] > 230 && p[1] > 230 && p[2] > 230)
      .count();
    assert!(white > 10);
  }
}
