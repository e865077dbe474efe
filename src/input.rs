// 该文件是 Beifeng （北风） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;
use thiserror::Error;

#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
use crate::{FromUrl, FromUrlWithScheme};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "read_image_file")]
mod image_sequence;
#[cfg(feature = "read_image_file")]
pub use self::image_sequence::ImageSequenceInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 可逐帧读取的视觉源
///
/// 与视频元素一致：文件视频播放结束后固有宽度变为 0，摄像头等实时流在停止前一直报告
/// [`has_live_stream`](Self::has_live_stream)。
pub trait VisualSource {
  fn intrinsic_width(&self) -> u32;

  fn intrinsic_height(&self) -> u32;

  /// 是否连接着实时流
  fn has_live_stream(&self) -> bool;

  /// 读取当前帧；暂时没有新帧时返回 `Ok(None)`
  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError>;
}

impl<T: VisualSource + ?Sized> VisualSource for &mut T {
  fn intrinsic_width(&self) -> u32 {
    (**self).intrinsic_width()
  }

  fn intrinsic_height(&self) -> u32 {
    (**self).intrinsic_height()
  }

  fn has_live_stream(&self) -> bool {
    (**self).has_live_stream()
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    (**self).read_frame()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  Image(#[from] image::ImageError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 内存中的静态图像，可以重复读取
#[derive(Debug, Clone)]
pub struct StillImage {
  image: RgbImage,
}

impl StillImage {
  pub fn new(image: RgbImage) -> Self {
    Self { image }
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

impl From<RgbImage> for StillImage {
  fn from(image: RgbImage) -> Self {
    Self::new(image)
  }
}

impl VisualSource for StillImage {
  fn intrinsic_width(&self) -> u32 {
    self.image.width()
  }

  fn intrinsic_height(&self) -> u32 {
    self.image.height()
  }

  fn has_live_stream(&self) -> bool {
    false
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(Some(self.image.clone()))
  }
}

#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
/// 按 URL 方案选择的输入
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
impl InputWrapper {
  fn source(&self) -> &dyn VisualSource {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
    }
  }

  fn source_mut(&mut self) -> &mut dyn VisualSource {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
    }
  }
}

#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
impl VisualSource for InputWrapper {
  fn intrinsic_width(&self) -> u32 {
    self.source().intrinsic_width()
  }

  fn intrinsic_height(&self) -> u32 {
    self.source().intrinsic_height()
  }

  fn has_live_stream(&self) -> bool {
    self.source().has_live_stream()
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    self.source_mut().read_frame()
  }
}

/// 从 URL 路径得到本地文件路径
#[cfg(any(feature = "read_image_file", feature = "gstreamer_input"))]
fn decode_path(url: &url::Url) -> Result<std::path::PathBuf, InputError> {
  let path = urlencoding::decode(url.path())
    .map_err(|e| InputError::SchemeMismatch(format!("路径编码无效: {}", e)))?;
  Ok(std::path::PathBuf::from(path.as_ref()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn still_image_is_readable_repeatedly() {
    let mut still = StillImage::new(RgbImage::new(7, 5));
    assert_eq!(still.intrinsic_width(), 7);
    assert_eq!(still.intrinsic_height(), 5);
    assert!(!still.has_live_stream());
    assert!(still.read_frame().unwrap().is_some());
    assert!(still.read_frame().unwrap().is_some());
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
