// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use image::{Rgb, RgbImage};
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Canvas, RenderSurface, SurfaceError, SurfaceRect},
};

/// 将每个周期合成后的帧按日期目录逐帧保存
///
/// 默认只保存画过检测框的帧，`?always` 时保存每一帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  canvas: Canvas,
  frame_counter: u32,
  drawn: bool,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = SurfaceError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SurfaceError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let directory = urlencoding::decode(uri.path())
      .map_err(|e| SurfaceError::SchemeMismatch(format!("路径编码无效: {}", e)))?;
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(directory.as_ref()).always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      canvas: Canvas::new(0, 0),
      frame_counter: 0,
      drawn: false,
      always: false,
    }
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn canvas_mut(&mut self) -> &mut Canvas {
    &mut self.canvas
  }

  /// 已保存的帧数
  pub fn recorded(&self) -> u32 {
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, SurfaceError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    self.frame_counter += 1;
    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }
}

impl RenderSurface for DirectoryRecordOutput {
  fn size(&self) -> (u32, u32) {
    self.canvas.size()
  }

  fn clear(&mut self) {
    self.drawn = false;
    self.canvas.clear()
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32) {
    self.drawn = true;
    self.canvas.stroke_rect(rect, color, line_width)
  }

  fn fill_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>) {
    self.canvas.fill_rect(rect, color)
  }

  fn text_size(&self, text: &str) -> (u32, u32) {
    self.canvas.text_size(text)
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    self.canvas.draw_text(x, y, text, color)
  }

  fn resize(&mut self, width: u32, height: u32) {
    self.canvas.resize(width, height)
  }

  fn present(&mut self, frame: &RgbImage) -> Result<(), SurfaceError> {
    if !self.always && !self.drawn {
      return Ok(());
    }
    let path = self.frame_path()?;
    self.canvas.composite(frame).save(&path)?;
    debug!("记录帧: {}", path.display());
    Ok(())
  }
}
