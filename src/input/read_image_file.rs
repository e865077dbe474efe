// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, StillImage, VisualSource, decode_path},
};

/// 单张图像文件，加载后作为静态图像使用
pub struct ImageFileInput {
  path: PathBuf,
  still: StillImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    Self::open(decode_path(url)?)
  }
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
    let path = path.as_ref().to_path_buf();
    let image: RgbImage = ImageReader::open(&path)?.decode()?.into();
    info!(
      "读取图像文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self {
      path,
      still: StillImage::new(image),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn image(&self) -> &RgbImage {
    self.still.image()
  }

  pub fn into_image(self) -> RgbImage {
    self.still.into_image()
  }
}

impl VisualSource for ImageFileInput {
  fn intrinsic_width(&self) -> u32 {
    self.still.intrinsic_width()
  }

  fn intrinsic_height(&self) -> u32 {
    self.still.intrinsic_height()
  }

  fn has_live_stream(&self) -> bool {
    false
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    self.still.read_frame()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn loads_image_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame 1.png");
    RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    assert_eq!(input.path(), path.as_path());
    assert_eq!(input.intrinsic_width(), 6);
    assert_eq!(input.intrinsic_height(), 4);
    let frame = input.read_frame().unwrap().unwrap();
    assert_eq!(frame.get_pixel(0, 0), &Rgb([1, 2, 3]));
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::Io(_))
    ));
  }
}
