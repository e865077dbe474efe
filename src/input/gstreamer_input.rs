// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入
//!
//! 支持两类视频源，均输出 RGB 帧：
//! - `gst://file/path/to/video.mp4[?rotate=90]` 视频文件，播放结束后固有宽度变为 0
//! - `gst://camera/dev/video0[?width=640&height=480&fps=15&format=YUY2&io-mode=2&rotate=0]`
//!   摄像头，停止前一直报告实时流
//!
//! 使用前需要安装 GStreamer 开发库（`libgstreamer1.0-dev`、`libgstreamer-plugins-base1.0-dev`）
//! 并启用 `gstreamer_input` 特性。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, VisualSource, decode_path},
};

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const PULL_TIMEOUT_MS: u64 = 500;
const PREROLL_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法将元素转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = match io_mode {
          Some(mode) => format!(" io-mode={}", mode),
          None => String::new(),
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl Default for GStreamerInputPipelineBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self {
      items: Vec::new(),
      live: false,
    }
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  pub fn camera(mut self, device: &str, width: u32, height: u32, fps: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: device.to_string(),
      io_mode: None,
      format: "RGB".to_string(),
      width,
      height,
      fps,
    });
    self.live = true;
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  fn camera_from_query(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    let format = query
      .get("format")
      .cloned()
      .unwrap_or_else(|| "RGB".to_string());

    let mut builder = Self::new();
    builder.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: parse("io-mode"),
      format,
      width: parse("width").unwrap_or(DEFAULT_CAMERA_WIDTH),
      height: parse("height").unwrap_or(DEFAULT_CAMERA_HEIGHT),
      fps: parse("fps").unwrap_or(DEFAULT_CAMERA_FPS),
    });
    builder.live = true;
    builder
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => (0, 0),
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  /// 管道描述，以名为 `sink` 的 appsink 结尾
  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop={} name=sink",
      basic_pipeline, self.live
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    // 预读第一帧以获得视频尺寸
    let size = appsink
      .try_pull_preroll(gst::ClockTime::from_mseconds(PREROLL_TIMEOUT_MS))
      .and_then(|sample| sample.caps().map(|caps| caps.to_owned()))
      .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok())
      .map(|info| (info.width(), info.height()))
      .unwrap_or((0, 0));
    info!("视频尺寸: {}x{}", size.0, size.1);

    Ok(GStreamerInput {
      pipeline,
      appsink,
      live: self.live,
      size,
      ended: false,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = decode_path(url)
      .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?
      .to_string_lossy()
      .into_owned();

    let mut builder = match url.host_str() {
      Some("camera") => Self::camera_from_query(&path, &query),
      Some("file") => Self::new().file(&path),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(String::as_str)) {
      builder.items.push(video_flip);
    }
    Ok(builder.target_format("RGB"))
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  live: bool,
  size: (u32, u32),
  ended: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl VisualSource for GStreamerInput {
  fn intrinsic_width(&self) -> u32 {
    if self.ended { 0 } else { self.size.0 }
  }

  fn intrinsic_height(&self) -> u32 {
    if self.ended { 0 } else { self.size.1 }
  }

  fn has_live_stream(&self) -> bool {
    self.live && !self.ended
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    if self.ended {
      return Ok(None);
    }
    let Some(sample) = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
    else {
      if self.appsink.is_eos() {
        info!("视频流结束");
        self.ended = true;
      }
      return Ok(None);
    };

    let image = convert_sample(&sample)?;
    self.size = image.dimensions();
    Ok(Some(image))
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row_bytes = width * 3;
  let expected_size = stride * height.saturating_sub(1) + row_bytes;
  if height > 0 && data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let line = &data[row * stride..row * stride + row_bytes];
    if swap {
      for bgr in line.chunks_exact(3) {
        pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("帧数据长度不符".to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_url_builds_live_pipeline() {
    let url = Url::parse("gst://camera/dev/video0?width=320&height=240&rotate=180").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert!(builder.live);
    let description = builder.description();
    assert!(description.starts_with("v4l2src device=/dev/video0 ! video/x-raw,format=RGB,width=320,height=240,framerate=15/1"));
    assert!(description.contains("videoflip method=2"));
    assert!(description.ends_with("videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink"));
  }

  #[test]
  fn file_url_keeps_every_frame() {
    let url = Url::parse("gst://file/videos/my%20clip.mp4").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert!(!builder.live);
    let description = builder.description();
    assert!(description.starts_with("filesrc location=\"/videos/my clip.mp4\" ! decodebin"));
    assert!(description.contains("drop=false"));
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
