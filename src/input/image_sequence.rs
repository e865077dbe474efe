// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, VisualSource, decode_path},
};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 将目录中的图像按文件名顺序当作一段文件视频播放
///
/// 播放结束后固有尺寸变为 0，且从不报告实时流。
pub struct ImageSequenceInput {
  frames: Vec<PathBuf>,
  next: usize,
  size: (u32, u32),
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(decode_path(url)?)
  }
}

impl ImageSequenceInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, InputError> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(directory.as_ref())? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if path.is_file() && is_image {
        frames.push(path);
      }
    }
    frames.sort();
    info!(
      "图像序列 {} 共 {} 帧",
      directory.as_ref().display(),
      frames.len()
    );
    Self::from_paths(frames)
  }

  /// 按给定顺序播放
  pub fn from_paths(frames: Vec<PathBuf>) -> Result<Self, InputError> {
    let size = match frames.first() {
      Some(first) => image::image_dimensions(first)?,
      None => (0, 0),
    };
    Ok(Self {
      frames,
      next: 0,
      size,
    })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  /// 是否已播放完毕
  pub fn ended(&self) -> bool {
    self.next >= self.frames.len()
  }
}

impl VisualSource for ImageSequenceInput {
  fn intrinsic_width(&self) -> u32 {
    if self.ended() { 0 } else { self.size.0 }
  }

  fn intrinsic_height(&self) -> u32 {
    if self.ended() { 0 } else { self.size.1 }
  }

  fn has_live_stream(&self) -> bool {
    false
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    let Some(path) = self.frames.get(self.next) else {
      return Ok(None);
    };
    let image = image::open(path)?.to_rgb8();
    debug!("读取第 {} 帧: {}", self.next + 1, path.display());
    self.next += 1;
    self.size = image.dimensions();
    // 下一帧读不出尺寸时沿用当前尺寸，错误留到真正读取时再报告
    if let Some(upcoming) = self.frames.get(self.next) {
      match image::image_dimensions(upcoming) {
        Ok(size) => self.size = size,
        Err(e) => warn!("无法读取 {} 的尺寸: {}", upcoming.display(), e),
      }
    }
    Ok(Some(image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn plays_frames_in_name_order_then_ends() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 3, Rgb([2, 0, 0]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(4, 3, Rgb([1, 0, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let mut input = ImageSequenceInput::open(dir.path()).unwrap();
    assert_eq!(input.len(), 2);
    assert_eq!(input.intrinsic_width(), 4);

    let first = input.read_frame().unwrap().unwrap();
    assert_eq!(first.get_pixel(0, 0), &Rgb([1, 0, 0]));
    let second = input.read_frame().unwrap().unwrap();
    assert_eq!(second.get_pixel(0, 0), &Rgb([2, 0, 0]));

    assert!(input.ended());
    assert_eq!(input.intrinsic_width(), 0);
    assert!(!input.has_live_stream());
    assert!(input.read_frame().unwrap().is_none());
  }

  #[test]
  fn unreadable_next_frame_keeps_current_frame() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 3, Rgb([1, 0, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("b.png"), "not a png").unwrap();

    let mut input = ImageSequenceInput::open(dir.path()).unwrap();
    let first = input.read_frame().unwrap().unwrap();
    assert_eq!(first.get_pixel(0, 0), &Rgb([1, 0, 0]));
    assert!(!input.ended());
    assert_eq!(input.intrinsic_width(), 4);
    assert!(input.read_frame().is_err());
  }

  #[test]
  fn empty_directory_is_already_ended() {
    let dir = tempfile::tempdir().unwrap();
    let input = ImageSequenceInput::open(dir.path()).unwrap();
    assert!(input.is_empty());
    assert_eq!(input.intrinsic_width(), 0);
  }
}
