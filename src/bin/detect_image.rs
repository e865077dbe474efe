// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/detect_image.rs - 单张图像检测与分类
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use url::Url;

use beifeng::{
  FromUrl,
  decode::{BoxDecoder, BoxLayout, BoxScale, DEFAULT_THRESHOLD},
  input::{InputWrapper, VisualSource},
  model::{Labels, ModelHandle, ModelKind, TractModelLoader},
  output::{Canvas, OutputWrapper, RenderSurface},
  pipeline::{DEFAULT_FIT_WITHIN, Pipeline},
};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LayoutArg {
  Xyxy,
  Yxyx,
  Cxcywh,
}

impl From<LayoutArg> for BoxLayout {
  fn from(layout: LayoutArg) -> Self {
    match layout {
      LayoutArg::Xyxy => BoxLayout::Xyxy,
      LayoutArg::Yxyx => BoxLayout::Yxyx,
      LayoutArg::Cxcywh => BoxLayout::Cxcywh,
    }
  }
}

/// Beifeng 单张图像检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，如 onnx:///models/yolov5n.onnx?width=640&height=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 可选的分类模型，对第一个检测结果的裁剪区域分类
  #[arg(long, value_name = "MODEL")]
  pub classifier: Option<Url>,
  /// 输入来源，如 image:///path/to/image.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 image:///path/to/output.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值，分数严格大于该值才保留
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 可选的 NMS IOU 阈值
  #[arg(long, value_name = "IOU")]
  pub nms: Option<f32>,
  /// 原始框的坐标排列
  #[arg(long, value_enum, default_value = "xyxy")]
  pub box_layout: LayoutArg,
  /// 原始框坐标为模型输入像素而非归一化值
  #[arg(long)]
  pub model_pixels: bool,
  /// 检测类别标签（JSON 字符串数组），默认 COCO
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 分类类别标签（JSON 字符串数组）
  #[arg(long, value_name = "FILE")]
  pub classifier_labels: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 检测前不缩放输入图像
  #[arg(long)]
  pub no_fit: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let detector = ModelHandle::load(
    TractModelLoader::from_url(&args.model)?,
    ModelKind::Detector,
    |fraction| debug!("检测模型加载进度: {:.0}%", fraction * 100.0),
  )?;
  let classifier = match &args.classifier {
    Some(url) => Some(ModelHandle::load(
      TractModelLoader::from_url(url)?,
      ModelKind::Classifier,
      |fraction| debug!("分类模型加载进度: {:.0}%", fraction * 100.0),
    )?),
    None => None,
  };

  let labels = match &args.labels {
    Some(path) => Labels::from_json_file(path)
      .with_context(|| format!("读取标签文件 {} 失败", path.display()))?,
    None => Labels::coco(),
  };
  let mut decoder = BoxDecoder::default()
    .with_threshold(args.threshold)
    .with_layout(args.box_layout.into())
    .with_labels(labels);
  if args.model_pixels {
    decoder = decoder.with_scale(BoxScale::ModelPixels);
  }
  if let Some(iou) = args.nms {
    decoder = decoder.with_nms(iou);
  }

  let mut input = InputWrapper::from_url(&args.input)
    .with_context(|| format!("打开输入 {} 失败", args.input))?;
  let Some(image) = input.read_frame()? else {
    bail!("输入没有可读取的图像");
  };

  let mut output = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;
  if let (Some(output), Some(font)) = (output.as_mut(), &args.font) {
    output.set_font(
      Canvas::load_font(font).with_context(|| format!("读取字体 {} 失败", font.display()))?,
    );
  }

  let fit = if args.no_fit {
    None
  } else {
    Some(DEFAULT_FIT_WITHIN)
  };
  let mut pipeline = Pipeline::new(&detector, decoder).fit_within(fit);
  if let Some(classifier) = classifier.as_ref() {
    let labels = match &args.classifier_labels {
      Some(path) => Labels::from_json_file(path)
        .with_context(|| format!("读取标签文件 {} 失败", path.display()))?,
      None => Labels::new(Vec::<String>::new()),
    };
    pipeline = pipeline.with_classifier(classifier, labels);
  }

  let report = pipeline.run(
    &image,
    output.as_mut().map(|output| output as &mut dyn RenderSurface),
  )?;

  println!(
    "图像 {}x{} (检测尺寸 {}x{}): 检测到 {} 个对象",
    report.source_size.0,
    report.source_size.1,
    report.frame.width(),
    report.frame.height(),
    report.detections.len()
  );
  let labels = pipeline.decoder().labels();
  for det in &report.detections {
    println!(
      "  - {}: {:.1}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      labels.name(det.class_id),
      det.score * 100.0,
      det.x1,
      det.y1,
      det.width,
      det.height
    );
  }
  if let Some(verdict) = &report.verdict {
    println!(
      "分类结果: {} ({:.1}%)",
      verdict.label,
      verdict.probability * 100.0
    );
  }

  drop(pipeline);
  if let Some(classifier) = classifier {
    classifier.dispose();
  }
  detector.dispose();
  Ok(())
}
