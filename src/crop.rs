// 该文件是 Beifeng （北风） 项目的一部分。
// src/crop.rs - 按检测框裁剪图像
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

use image::{GenericImageView, RgbImage, imageops};

use crate::decode::Detection;

/// 原图像素坐标下的裁剪区域，可以部分落在图像之外
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

impl CropBox {
  /// 由检测框得到裁剪区域，坐标向下取整，尺寸截断
  pub fn from_detection(detection: &Detection) -> Self {
    Self {
      x: detection.x1.floor() as i32,
      y: detection.y1.floor() as i32,
      width: detection.width.max(0.0) as u32,
      height: detection.height.max(0.0) as u32,
    }
  }

  /// 限制尺寸不超过 `max_width` x `max_height`，左上角不变
  pub fn capped(self, max_width: u32, max_height: u32) -> Self {
    Self {
      width: self.width.min(max_width),
      height: self.height.min(max_height),
      ..self
    }
  }
}

/// 裁剪出 `crop` 指定的区域，输出尺寸恰为 `crop.width` x `crop.height`
///
/// 区域左上角对齐到输出原点，不做缩放；落在原图之外的部分保持黑色。
pub fn crop_image(frame: &RgbImage, crop: &CropBox) -> RgbImage {
  let mut output = RgbImage::new(crop.width, crop.height);
  let (frame_w, frame_h) = frame.dimensions();

  let x0 = crop.x.max(0) as i64;
  let y0 = crop.y.max(0) as i64;
  let x1 = (crop.x as i64 + crop.width as i64).min(frame_w as i64);
  let y1 = (crop.y as i64 + crop.height as i64).min(frame_h as i64);
  if x1 <= x0 || y1 <= y0 {
    return output;
  }

  let region = frame.view(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
  imageops::replace(&mut output, &*region, x0 - crop.x as i64, y0 - crop.y as i64);
  output
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
  }

  #[test]
  fn inner_region_is_copied_to_origin() {
    let frame = gradient(20, 10);
    let crop = crop_image(
      &frame,
      &CropBox {
        x: 5,
        y: 2,
        width: 4,
        height: 3,
      },
    );
    assert_eq!(crop.dimensions(), (4, 3));
    assert_eq!(crop.get_pixel(0, 0), &Rgb([5, 2, 7]));
    assert_eq!(crop.get_pixel(3, 2), &Rgb([8, 4, 7]));
  }

  #[test]
  fn region_outside_frame_stays_black() {
    let frame = gradient(10, 10);
    let crop = crop_image(
      &frame,
      &CropBox {
        x: -2,
        y: 8,
        width: 4,
        height: 4,
      },
    );
    assert_eq!(crop.dimensions(), (4, 4));
    assert_eq!(crop.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(crop.get_pixel(2, 0), &Rgb([0, 8, 7]));
    assert_eq!(crop.get_pixel(3, 3), &Rgb([0, 0, 0]));
  }

  #[test]
  fn box_from_detection_is_capped() {
    let detection = Detection {
      x1: 10.6,
      y1: 3.2,
      width: 900.9,
      height: 20.5,
      class_id: 0,
      score: 0.9,
    };
    let crop = CropBox::from_detection(&detection).capped(720, 500);
    assert_eq!(
      crop,
      CropBox {
        x: 10,
        y: 3,
        width: 720,
        height: 20
      }
    );
  }
}
