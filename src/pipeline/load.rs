// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline/load.rs - 从文件加载图像
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

use tracing::debug;

use crate::{
  frame::{ImageData, ImageMeta, Record},
  input::read_rgb_image,
  pipeline::{PipelineError, Transform},
};

pub struct LoadImageFromFile;

impl Transform for LoadImageFromFile {
  fn name(&self) -> &'static str {
    "LoadImageFromFile"
  }

  fn apply(&self, mut record: Record) -> Result<Record, PipelineError> {
    let path = record.source_path();
    let image = read_rgb_image(&path)?;
    let data = ImageData::Rgb(image);
    let shape = data.shape();
    debug!("加载图像 {}: {:?}", path.display(), shape);

    record.meta = Some(ImageMeta::new(record.filename.clone(), shape));
    record.img = Some(data);
    Ok(record)
  }
}
