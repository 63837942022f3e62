// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline/normalize.rs - 像素归一化
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

use ndarray::Axis;

use crate::{
  frame::{ImageData, Record},
  pipeline::{PipelineError, Transform},
};

/// `(x - mean) / std`，均值和方差按 RGB 顺序给出
pub struct Normalize {
  mean: [f32; 3],
  std: [f32; 3],
  to_rgb: bool,
}

impl Normalize {
  pub fn new(mean: [f32; 3], std: [f32; 3], to_rgb: bool) -> Result<Self, PipelineError> {
    if std.iter().any(|v| *v == 0.0) {
      return Err(PipelineError::Invalid(format!("Normalize 的 std 不能包含 0: {:?}", std)));
    }
    Ok(Self { mean, std, to_rgb })
  }
}

impl Transform for Normalize {
  fn name(&self) -> &'static str {
    "Normalize"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    let image = record
      .img
      .take()
      .ok_or(PipelineError::MissingImage(self.name()))?;
    let mut array = image.into_float();

    if !self.to_rgb {
      // 解码结果为 RGB，这里交换为 BGR
      array.invert_axis(Axis(2));
      array = array.as_standard_layout().into_owned();
    }

    for (c, mut channel) in array.axis_iter_mut(Axis(2)).enumerate() {
      let (mean, std) = (self.mean[c], self.std[c]);
      channel.mapv_inplace(|v| (v - mean) / std);
    }

    record.img = Some(ImageData::Float(array));
    Ok(record)
  }
}
