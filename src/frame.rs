// 该文件是 Beifeng （北风） 项目的一部分。
// src/frame.rs - 单张图像在预处理流水线中的数据定义
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

use image::RgbImage;
use ndarray::{Array3, Axis};

pub const RGB_CHANNELS: usize = 3;

/// (高, 宽, 通道)
pub type Shape = (usize, usize, usize);

/// 预处理中间图像：解码后是 u8 RGB，归一化后是 HWC 浮点数组
#[derive(Debug, Clone)]
pub enum ImageData {
  Rgb(RgbImage),
  Float(Array3<f32>),
}

impl ImageData {
  pub fn shape(&self) -> Shape {
    match self {
      ImageData::Rgb(image) => (image.height() as usize, image.width() as usize, RGB_CHANNELS),
      ImageData::Float(array) => array.dim(),
    }
  }

  /// 转为 HWC 浮点数组，像素值保持 0..=255 的原始范围
  pub fn into_float(self) -> Array3<f32> {
    match self {
      ImageData::Rgb(image) => {
        let (h, w, c) = (image.height() as usize, image.width() as usize, RGB_CHANNELS);
        Array3::from_shape_fn((h, w, c), |(y, x, ch)| image.get_pixel(x as u32, y as u32)[ch] as f32)
      }
      ImageData::Float(array) => array,
    }
  }

  /// 转为 CHW 浮点张量
  pub fn into_chw(self) -> Array3<f32> {
    let hwc = self.into_float();
    hwc.permuted_axes([2, 0, 1]).as_standard_layout().to_owned()
  }
}

/// 每张图像随张量一起传递的元信息，坐标反算依赖 `scale_factor`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
  pub filename: PathBuf,
  pub ori_shape: Shape,
  pub img_shape: Shape,
  pub pad_shape: Shape,
  /// [w_scale, h_scale, w_scale, h_scale]
  pub scale_factor: [f32; 4],
}

impl ImageMeta {
  pub fn new(filename: impl Into<PathBuf>, shape: Shape) -> Self {
    Self {
      filename: filename.into(),
      ori_shape: shape,
      img_shape: shape,
      pad_shape: shape,
      scale_factor: [1.0; 4],
    }
  }

  /// 将网络输入坐标系下的框映射回原图像素坐标
  pub fn rescale_bbox(&self, bbox: [f32; 4]) -> [f32; 4] {
    let mut out = bbox;
    for (v, s) in out.iter_mut().zip(self.scale_factor) {
      if s > 0.0 {
        *v /= s;
      }
    }
    out
  }
}

/// 送入预处理流水线的记录，只在单张图像推理步骤内存在
#[derive(Debug, Clone)]
pub struct Record {
  pub filename: PathBuf,
  pub prefix: Option<PathBuf>,
  pub img: Option<ImageData>,
  pub meta: Option<ImageMeta>,
  /// CHW 浮点张量
  pub tensor: Option<Array3<f32>>,
}

impl Record {
  pub fn new(filename: impl Into<PathBuf>) -> Self {
    Self {
      filename: filename.into(),
      prefix: None,
      img: None,
      meta: None,
      tensor: None,
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
    self.prefix = Some(prefix.into());
    self
  }

  /// 实际读取的文件路径
  pub fn source_path(&self) -> PathBuf {
    match &self.prefix {
      Some(prefix) => prefix.join(&self.filename),
      None => self.filename.clone(),
    }
  }

  pub fn filename(&self) -> &Path {
    &self.filename
  }
}

/// CHW 张量的 (通道, 高, 宽)
pub fn chw_dims(tensor: &Array3<f32>) -> (usize, usize, usize) {
  (
    tensor.len_of(Axis(0)),
    tensor.len_of(Axis(1)),
    tensor.len_of(Axis(2)),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn rgb_to_chw_keeps_values() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));

    let chw = ImageData::Rgb(image).into_chw();
    assert_eq!(chw_dims(&chw), (3, 1, 2));
    assert_eq!(chw[[0, 0, 0]], 1.0);
    assert_eq!(chw[[0, 0, 1]], 4.0);
    assert_eq!(chw[[2, 0, 1]], 6.0);
  }

  #[test]
  fn rescale_bbox_divides_by_scale_factor() {
    let mut meta = ImageMeta::new("a.jpg", (100, 200, 3));
    meta.scale_factor = [0.5, 0.25, 0.5, 0.25];
    assert_eq!(meta.rescale_bbox([10.0, 10.0, 20.0, 20.0]), [20.0, 40.0, 40.0, 80.0]);
  }

  #[test]
  fn source_path_joins_prefix() {
    let record = Record::new("b.png").with_prefix("/data");
    assert_eq!(record.source_path(), PathBuf::from("/data/b.png"));
    assert_eq!(Record::new("c.png").source_path(), PathBuf::from("c.png"));
  }
}
