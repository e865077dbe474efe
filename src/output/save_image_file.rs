// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Canvas, RenderSurface, SurfaceError, SurfaceRect},
};

/// 将叠加层合成到帧上并保存为单个图像文件
pub struct SaveImageFileOutput {
  path: PathBuf,
  canvas: Canvas,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SurfaceError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SurfaceError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let path = urlencoding::decode(uri.path())
      .map_err(|e| SurfaceError::SchemeMismatch(format!("路径编码无效: {}", e)))?;
    Ok(Self::new(path.as_ref()))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      canvas: Canvas::new(0, 0),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn canvas_mut(&mut self) -> &mut Canvas {
    &mut self.canvas
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SurfaceError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl RenderSurface for SaveImageFileOutput {
  fn size(&self) -> (u32, u32) {
    self.canvas.size()
  }

  fn clear(&mut self) {
    self.canvas.clear()
  }

  fn stroke_rect(&mut self, rect: SurfaceRect, color: Rgb<u8>, line_width: u32) {
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
    let image = self.canvas.composite(frame);
    self.save_image(&image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SurfaceError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn present_writes_composited_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let mut output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path.as_path());
    output.canvas_mut().resize(8, 8);
    output.fill_rect(
      SurfaceRect {
        x: 0,
        y: 0,
        width: 2,
        height: 2,
      },
      Rgb([255, 0, 0]),
    );
    output
      .present(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])))
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert_eq!(saved.get_pixel(7, 7), &Rgb([0, 0, 255]));
  }
}
