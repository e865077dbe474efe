// 该文件是 Beifeng （北风） 项目的一部分。
// src/output.rs - 绘制表面与输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use thiserror::Error;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use url::Url;

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;

/// 表面坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRect {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

/// 可绘制的 2D 表面
///
/// 检测结果以叠加层的形式画在表面上；[`present`](Self::present) 在每个周期结束时调用，
/// 由实现决定是否将叠加层与原始帧合成后输出。
pub trait RenderSurface {
  /// 表面尺寸 (宽, 高)
  fn size(&self) -> (u32, u32);

  fn clear(&mut self);

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32);

  fn fill_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>);

  /// 文本绘制后所占的 (宽, 高)
  fn text_size(&self, text: &str) -> (u32, u32);

  /// 以 (x, y) 为左上角绘制文本
  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>);

  /// 按帧尺寸调整表面，固定尺寸的表面忽略
  fn resize(&mut self, _width: u32, _height: u32) {}

  fn present(&mut self, _frame: &RgbImage) -> Result<(), SurfaceError> {
    Ok(())
  }
}

impl<T: RenderSurface + ?Sized> RenderSurface for &mut T {
  fn size(&self) -> (u32, u32) {
    (**self).size()
  }

  fn clear(&mut self) {
    (**self).clear()
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32) {
    (**self).stroke_rect(rect, color, line_width)
  }

  fn fill_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>) {
    (**self).fill_rect(rect, color)
  }

  fn text_size(&self, text: &str) -> (u32, u32) {
    (**self).text_size(text)
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    (**self).draw_text(x, y, text, color)
  }

  fn resize(&mut self, width: u32, height: u32) {
    (**self).resize(width, height)
  }

  fn present(&mut self, frame: &RgbImage) -> Result<(), SurfaceError> {
    (**self).present(frame)
  }
}

pub mod draw;

mod canvas;
pub use self::canvas::{Canvas, FontError, default_font};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::SaveImageFileOutput;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecordOutput;

#[derive(Error, Debug)]
pub enum SurfaceError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
/// 按 URL 方案选择的输出
pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
impl FromUrl for OutputWrapper {
  type Error = SurfaceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      if url.scheme() == SaveImageFileOutput::SCHEME {
        let output = SaveImageFileOutput::from_url(url)?;
        return Ok(OutputWrapper::SaveImageFile(output));
      }
    }
    #[cfg(feature = "directory_record")]
    {
      if url.scheme() == DirectoryRecordOutput::SCHEME {
        let output = DirectoryRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::DirectoryRecord(output));
      }
    }
    Err(SurfaceError::SchemeMismatch(url.scheme().to_string()))
  }
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
impl OutputWrapper {
  fn surface(&self) -> &dyn RenderSurface {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output,
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output,
    }
  }

  fn surface_mut(&mut self) -> &mut dyn RenderSurface {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output,
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output,
    }
  }

  /// 设置标签字体
  pub fn set_font(&mut self, font: ab_glyph::FontArc) {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output.canvas_mut().set_font(font),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output.canvas_mut().set_font(font),
    }
  }
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
impl RenderSurface for OutputWrapper {
  fn size(&self) -> (u32, u32) {
    self.surface().size()
  }

  fn clear(&mut self) {
    self.surface_mut().clear()
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32) {
    self.surface_mut().stroke_rect(rect, color, line_width)
  }

  fn fill_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>) {
    self.surface_mut().fill_rect(rect, color)
  }

  fn text_size(&self, text: &str) -> (u32, u32) {
    self.surface().text_size(text)
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    self.surface_mut().draw_text(x, y, text, color)
  }

  fn resize(&mut self, width: u32, height: u32) {
    self.surface_mut().resize(width, height)
  }

  fn present(&mut self, frame: &RgbImage) -> Result<(), SurfaceError> {
    self.surface_mut().present(frame)
  }
}
