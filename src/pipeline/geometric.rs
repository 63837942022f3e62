// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline/geometric.rs - 缩放与填充
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

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::{Array3, s};

use crate::{
  frame::{ImageData, Record, Shape},
  pipeline::{PipelineError, Transform},
};

/// 缩放到 `img_scale` (宽, 高)。
///
/// `keep_ratio` 时长边不超过 `max(img_scale)`，短边不超过 `min(img_scale)`。
pub struct Resize {
  img_scale: [u32; 2],
  keep_ratio: bool,
}

impl Resize {
  pub fn new(img_scale: [u32; 2], keep_ratio: bool) -> Result<Self, PipelineError> {
    if img_scale.contains(&0) {
      return Err(PipelineError::Invalid(format!("Resize 尺寸不能为 0: {:?}", img_scale)));
    }
    Ok(Self {
      img_scale,
      keep_ratio,
    })
  }

  /// 目标 (宽, 高)
  fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
    if !self.keep_ratio {
      return (self.img_scale[0], self.img_scale[1]);
    }

    let max_long = self.img_scale[0].max(self.img_scale[1]) as f64;
    let max_short = self.img_scale[0].min(self.img_scale[1]) as f64;
    let long = width.max(height) as f64;
    let short = width.min(height) as f64;
    let factor = (max_long / long).min(max_short / short);

    let new_w = ((width as f64 * factor + 0.5) as u32).max(1);
    let new_h = ((height as f64 * factor + 0.5) as u32).max(1);
    (new_w, new_h)
  }
}

impl Transform for Resize {
  fn name(&self) -> &'static str {
    "Resize"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    let image = match record.img.take() {
      Some(ImageData::Rgb(image)) => image,
      Some(ImageData::Float(_)) => {
        return Err(PipelineError::Invalid("Resize 必须位于 Normalize 之前".to_string()));
      }
      None => return Err(PipelineError::MissingImage(self.name())),
    };

    let (width, height) = image.dimensions();
    let (new_w, new_h) = self.target_size(width, height);
    let resized = if (new_w, new_h) == (width, height) {
      image
    } else {
      image::imageops::resize(&image, new_w, new_h, FilterType::Triangle)
    };

    let w_scale = new_w as f32 / width as f32;
    let h_scale = new_h as f32 / height as f32;
    let shape: Shape = (new_h as usize, new_w as usize, 3);
    if let Some(meta) = record.meta.as_mut() {
      meta.img_shape = shape;
      meta.pad_shape = shape;
      meta.scale_factor = [w_scale, h_scale, w_scale, h_scale];
    }

    record.img = Some(ImageData::Rgb(resized));
    Ok(record)
  }
}

/// 在右侧和下方填充到固定尺寸或指定倍数
pub struct Pad {
  size: Option<[u32; 2]>,
  size_divisor: Option<u32>,
  pad_val: f32,
}

impl Pad {
  pub fn new(size: Option<[u32; 2]>, size_divisor: Option<u32>, pad_val: f32) -> Result<Self, PipelineError> {
    match (size, size_divisor) {
      (Some(_), Some(_)) | (None, None) => Err(PipelineError::Invalid(
        "Pad 需要且只能指定 size 或 size_divisor 之一".to_string(),
      )),
      (_, Some(0)) => Err(PipelineError::Invalid("Pad 的 size_divisor 不能为 0".to_string())),
      _ => Ok(Self {
        size,
        size_divisor,
        pad_val,
      }),
    }
  }

  /// 目标 (高, 宽)
  fn target(&self, height: usize, width: usize) -> Result<(usize, usize), PipelineError> {
    if let Some([w, h]) = self.size {
      let (w, h) = (w as usize, h as usize);
      if w < width || h < height {
        return Err(PipelineError::Invalid(format!(
          "图像尺寸 {}x{} 超过填充尺寸 {}x{}",
          width, height, w, h
        )));
      }
      return Ok((h, w));
    }

    let divisor = self.size_divisor.unwrap_or(1) as usize;
    Ok((height.div_ceil(divisor) * divisor, width.div_ceil(divisor) * divisor))
  }
}

impl Transform for Pad {
  fn name(&self) -> &'static str {
    "Pad"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    let image = record
      .img
      .take()
      .ok_or(PipelineError::MissingImage(self.name()))?;
    let (height, width, channels) = image.shape();
    let (pad_h, pad_w) = self.target(height, width)?;

    let padded = match image {
      ImageData::Rgb(image) => {
        let fill = self.pad_val.clamp(0.0, 255.0).round() as u8;
        let mut canvas = RgbImage::from_pixel(pad_w as u32, pad_h as u32, Rgb([fill; 3]));
        image::imageops::replace(&mut canvas, &image, 0, 0);
        ImageData::Rgb(canvas)
      }
      ImageData::Float(array) => {
        let mut canvas = Array3::from_elem((pad_h, pad_w, channels), self.pad_val);
        canvas.slice_mut(s![..height, ..width, ..]).assign(&array);
        ImageData::Float(canvas)
      }
    };

    if let Some(meta) = record.meta.as_mut() {
      meta.pad_shape = (pad_h, pad_w, channels);
    }
    record.img = Some(padded);
    Ok(record)
  }
}
