// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::{Cursor, Read};
use std::path::PathBuf;

use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceEngine, ModelLoader},
  tensor::{RawTensor, Tensor as ScopedTensor},
};

const DEFAULT_INPUT_SIZE: u32 = 640;
const READ_CHUNK: usize = 1 << 20;
// 读取文件占总进度的比例，其余为图优化
const READ_PROGRESS_SHARE: f32 = 0.8;

#[derive(Error, Debug)]
pub enum TractError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("模型参数无效: {0}")]
  InvalidQuery(String),
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("tract 错误: {0}")]
  Tract(String),
  #[error("输入张量形状 {actual:?} 与模型输入 {expected:?} 不符")]
  InputShape {
    expected: [usize; 4],
    actual: Vec<usize>,
  },
}

fn tract_error(err: anyhow::Error) -> TractError {
  TractError::Tract(format!("{:#}", err))
}

/// 模型期望的输入布局；预处理总是输出 NHWC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  Nhwc,
  #[default]
  Nchw,
}

/// ONNX 模型加载器
///
/// URL 形如 `onnx:///path/to/model.onnx?width=640&height=640&layout=nchw`。
pub struct TractModelLoader {
  path: PathBuf,
  width: u32,
  height: u32,
  layout: TensorLayout,
}

impl FromUrlWithScheme for TractModelLoader {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractModelLoader {
  type Error = TractError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractError::SchemeMismatch(Self::SCHEME));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| TractError::InvalidQuery(e.to_string()))?;
    let mut loader = Self::new(path.as_ref());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => loader.width = parse_size(&key, &value)?,
        "height" => loader.height = parse_size(&key, &value)?,
        "layout" => {
          loader.layout = match value.as_ref() {
            "nhwc" => TensorLayout::Nhwc,
            "nchw" => TensorLayout::Nchw,
            other => return Err(TractError::InvalidQuery(format!("layout={}", other))),
          }
        }
        _ => debug!("忽略模型参数: {}={}", key, value),
      }
    }
    Ok(loader)
  }
}

fn parse_size(key: &str, value: &str) -> Result<u32, TractError> {
  value
    .parse::<u32>()
    .ok()
    .filter(|size| *size > 0)
    .ok_or_else(|| TractError::InvalidQuery(format!("{}={}", key, value)))
}

impl TractModelLoader {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self {
      path: path.into(),
      width: DEFAULT_INPUT_SIZE,
      height: DEFAULT_INPUT_SIZE,
      layout: TensorLayout::default(),
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  fn read_model(&self, progress: &mut dyn FnMut(f32)) -> Result<Vec<u8>, TractError> {
    let mut file = std::fs::File::open(&self.path)?;
    let total = file.metadata()?.len().max(1) as f32;
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
      let read = file.read(&mut chunk)?;
      if read == 0 {
        break;
      }
      bytes.extend_from_slice(&chunk[..read]);
      progress(bytes.len() as f32 / total * READ_PROGRESS_SHARE);
    }
    debug!(
      "模型文件大小: {:.2} MB",
      bytes.len() as f64 / (1024.0 * 1024.0)
    );
    Ok(bytes)
  }
}

impl ModelLoader for TractModelLoader {
  type Engine = TractEngine;
  type Error = TractError;

  fn load(self, progress: &mut dyn FnMut(f32)) -> Result<Self::Engine, Self::Error> {
    info!("加载模型文件: {}", self.path.display());
    let bytes = self.read_model(progress)?;

    let (height, width) = (self.height as usize, self.width as usize);
    let input_shape = match self.layout {
      TensorLayout::Nhwc => tvec!(1, height, width, 3),
      TensorLayout::Nchw => tvec!(1, 3, height, width),
    };
    let model = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(bytes))
      .map_err(tract_error)?
      .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), input_shape))
      .map_err(tract_error)?
      .into_optimized()
      .map_err(tract_error)?
      .into_runnable()
      .map_err(tract_error)?;
    progress(1.0);
    info!("模型加载完成");

    Ok(TractEngine {
      model,
      width: self.width,
      height: self.height,
      layout: self.layout,
    })
  }
}

/// tract 推理引擎
pub struct TractEngine {
  model: TypedRunnableModel<TypedModel>,
  width: u32,
  height: u32,
  layout: TensorLayout,
}

impl TractEngine {
  fn build_input(&self, input: &ScopedTensor<'_>) -> Result<Tensor, TractError> {
    let (height, width) = (self.height as usize, self.width as usize);
    let expected = [1, height, width, 3];
    if input.shape() != expected {
      return Err(TractError::InputShape {
        expected,
        actual: input.shape().to_vec(),
      });
    }

    let data = input.data();
    let tensor = match self.layout {
      TensorLayout::Nhwc => {
        tract_ndarray::Array4::from_shape_vec((1, height, width, 3), data.to_vec())
          .map_err(|e| TractError::Tract(e.to_string()))?
          .into_tensor()
      }
      TensorLayout::Nchw => {
        tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, channel, y, x)| {
          data[(y * width + x) * 3 + channel]
        })
        .into_tensor()
      }
    };
    Ok(tensor)
  }

  fn run(&self, input: &ScopedTensor<'_>) -> Result<Vec<RawTensor>, TractError> {
    let input = self.build_input(input)?;
    let outputs = self.model.run(tvec!(input.into())).map_err(tract_error)?;
    outputs
      .iter()
      .map(|output| {
        let values = output.cast_to::<f32>().map_err(tract_error)?;
        let data = values.as_slice::<f32>().map_err(tract_error)?.to_vec();
        Ok(RawTensor::new(output.shape().to_vec(), data))
      })
      .collect()
  }
}

impl InferenceEngine for TractEngine {
  type Error = TractError;

  fn input_dims(&self) -> [Option<usize>; 4] {
    [
      Some(1),
      Some(self.height as usize),
      Some(self.width as usize),
      Some(3),
    ]
  }

  fn execute(&self, input: &ScopedTensor<'_>) -> Result<Vec<RawTensor>, Self::Error> {
    self.run(input)
  }

  fn predict(&self, input: &ScopedTensor<'_>) -> Result<RawTensor, Self::Error> {
    self
      .run(input)?
      .into_iter()
      .next()
      .ok_or_else(|| TractError::Tract("模型没有输出".to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loader_reads_query() {
    let url = Url::parse("onnx:///models/yolo%20v5.onnx?width=320&height=256&layout=nhwc").unwrap();
    let loader = TractModelLoader::from_url(&url).unwrap();
    assert_eq!(loader.path, PathBuf::from("/models/yolo v5.onnx"));
    assert_eq!((loader.width, loader.height), (320, 256));
    assert_eq!(loader.layout, TensorLayout::Nhwc);
  }

  #[test]
  fn loader_defaults_and_rejections() {
    let url = Url::parse("onnx:///models/classifier.onnx").unwrap();
    let loader = TractModelLoader::from_url(&url).unwrap();
    assert_eq!((loader.width, loader.height), (640, 640));
    assert_eq!(loader.layout, TensorLayout::Nchw);

    let url = Url::parse("onnx:///m.onnx?width=0").unwrap();
    assert!(matches!(
      TractModelLoader::from_url(&url),
      Err(TractError::InvalidQuery(_))
    ));
    let url = Url::parse("yolo:///m.onnx").unwrap();
    assert!(matches!(
      TractModelLoader::from_url(&url),
      Err(TractError::SchemeMismatch(_))
    ));
  }

  fn passthrough_engine(layout: TensorLayout) -> TractEngine {
    let shape = match layout {
      TensorLayout::Nhwc => [1, 2, 2, 3],
      TensorLayout::Nchw => [1, 3, 2, 2],
    };
    let mut model = TypedModel::default();
    let source = model
      .add_source("input", TypedFact::dt_shape(f32::datum_type(), shape))
      .unwrap();
    model.set_output_outlets(&[source]).unwrap();
    TractEngine {
      model: model.into_runnable().unwrap(),
      width: 2,
      height: 2,
      layout,
    }
  }

  #[test]
  fn nhwc_input_is_transposed_for_nchw_models() {
    let backend = crate::tensor::TensorBackend::new();
    let scope = backend.scope();
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let input = scope.alloc(&[1, 2, 2, 3], data.clone()).unwrap();

    let engine = passthrough_engine(TensorLayout::Nchw);
    assert_eq!(engine.input_dims(), [Some(1), Some(2), Some(2), Some(3)]);
    let output = engine.predict(&input).unwrap();
    assert_eq!(output.shape, vec![1, 3, 2, 2]);
    // 第一个通道是每个像素的 R 分量
    assert_eq!(&output.data[..4], &[0.0, 3.0, 6.0, 9.0]);
    assert_eq!(&output.data[4..8], &[1.0, 4.0, 7.0, 10.0]);

    let engine = passthrough_engine(TensorLayout::Nhwc);
    let outputs = engine.execute(&input).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].data, data);
  }

  #[test]
  fn wrong_input_shape_is_rejected() {
    let backend = crate::tensor::TensorBackend::new();
    let scope = backend.scope();
    let input = scope.filled(&[1, 4, 4, 3], 0.5);
    assert!(matches!(
      passthrough_engine(TensorLayout::Nchw).predict(&input),
      Err(TractError::InputShape { .. })
    ));
  }

  #[test]
  fn missing_model_file_is_io_error() {
    let loader = TractModelLoader::new("/definitely/not/a/model.onnx");
    assert!(matches!(loader.load(&mut |_| {}), Err(TractError::Io(_))));
  }
}
