// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline/format.rs - 张量格式化与收集
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

use crate::{
  frame::Record,
  pipeline::{PipelineError, Transform},
};

/// HWC 图像转为 CHW 浮点张量
pub struct ImageToTensor;

impl Transform for ImageToTensor {
  fn name(&self) -> &'static str {
    "ImageToTensor"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    let image = record
      .img
      .take()
      .ok_or(PipelineError::MissingImage(self.name()))?;
    record.tensor = Some(image.into_chw());
    Ok(record)
  }
}

/// 流水线终点：确认模型输入已就绪并释放中间图像
pub struct Collect {
  keys: Vec<String>,
}

impl Collect {
  pub fn new(keys: Vec<String>) -> Result<Self, PipelineError> {
    if !keys.iter().any(|k| k == "img") {
      return Err(PipelineError::Invalid(format!("Collect 必须包含 \"img\": {:?}", keys)));
    }
    Ok(Self { keys })
  }

  pub fn keys(&self) -> &[String] {
    &self.keys
  }
}

impl Transform for Collect {
  fn name(&self) -> &'static str {
    "Collect"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    if record.tensor.is_none() {
      // 允许省略 ImageToTensor
      let image = record
        .img
        .take()
        .ok_or(PipelineError::MissingImage(self.name()))?;
      record.tensor = Some(image.into_chw());
    }
    if record.meta.is_none() {
      return Err(PipelineError::Invalid(format!(
        "{} 缺少图像元信息",
        record.filename.display()
      )));
    }
    record.img = None;
    Ok(record)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{ImageData, ImageMeta};
  use image::RgbImage;

  #[test]
  fn collect_requires_img_key() {
    assert!(Collect::new(vec!["gt_bboxes".to_string()]).is_err());
    assert_eq!(Collect::new(vec!["img".to_string()]).unwrap().keys(), ["img"]);
  }

  #[test]
  fn collect_converts_and_drops_intermediate_image() {
    let mut record = Record::new("x.png");
    record.meta = Some(ImageMeta::new("x.png", (2, 3, 3)));
    record.img = Some(ImageData::Rgb(RgbImage::new(3, 2)));

    let record = Collect::new(vec!["img".to_string()]).unwrap().apply(record).unwrap();
    assert!(record.img.is_none());
    assert_eq!(record.tensor.unwrap().dim(), (3, 2, 3));
  }

  #[test]
  fn collect_without_meta_fails() {
    let mut record = Record::new("x.png");
    record.img = Some(ImageData::Rgb(RgbImage::new(1, 1)));
    assert!(Collect::new(vec!["img".to_string()]).unwrap().apply(record).is_err());
  }
}
