// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/detect_video.rs - 视频流逐帧检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use url::Url;

use beifeng::{
  FromUrl,
  decode::{BoxDecoder, DEFAULT_THRESHOLD},
  input::{InputWrapper, VisualSource},
  model::{Labels, ModelHandle, ModelKind, TractModelLoader},
  output::{Canvas, OutputWrapper},
  task::{CancelToken, FramePacer, VideoLoop},
};

/// Beifeng 视频检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，如 onnx:///models/yolov5n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，如 frames:///path/to/dir 或 gst://file/path/to/video.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 folder:///path/to/dir?always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 可选的 NMS IOU 阈值
  #[arg(long, value_name = "IOU")]
  pub nms: Option<f32>,
  /// 检测类别标签（JSON 字符串数组），默认 COCO
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 刷新率，0 表示不限速
  #[arg(long, default_value = "60", value_name = "FPS")]
  pub fps: f32,
  /// 处理的最大帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let cancel = CancelToken::new();
  cancel.install_ctrlc_handler()?;

  let model = ModelHandle::load(
    TractModelLoader::from_url(&args.model)?,
    ModelKind::Detector,
    |fraction| debug!("模型加载进度: {:.0}%", fraction * 100.0),
  )?;

  let labels = match &args.labels {
    Some(path) => Labels::from_json_file(path)
      .with_context(|| format!("读取标签文件 {} 失败", path.display()))?,
    None => Labels::coco(),
  };
  let mut decoder = BoxDecoder::default()
    .with_threshold(args.threshold)
    .with_labels(labels);
  if let Some(iou) = args.nms {
    decoder = decoder.with_nms(iou);
  }

  let input = InputWrapper::from_url(&args.input)
    .with_context(|| format!("打开输入 {} 失败", args.input))?;
  info!(
    "输入源已打开: {}x{}",
    input.intrinsic_width(),
    input.intrinsic_height()
  );
  let mut output = OutputWrapper::from_url(&args.output)?;
  if let Some(font) = &args.font {
    output.set_font(
      Canvas::load_font(font).with_context(|| format!("读取字体 {} 失败", font.display()))?,
    );
  }

  let summary = VideoLoop::new(input, &model, decoder, output)
    .with_scheduler(FramePacer::with_rate(args.fps))
    .with_cancel(cancel)
    .with_frame_limit(args.frame_number)
    .run()?;

  info!(
    "处理完成: 共 {} 帧, 停止原因: {:?}",
    summary.frames, summary.reason
  );
  model.dispose();
  Ok(())
}
