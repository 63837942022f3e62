// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
use thiserror::Error;
use tracing::debug;

use crate::{
  config::Config,
  engine::DetectionResult,
  input::{ImageReadError, read_rgb_image},
  output::{ColorError, Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("读取原图失败: {0}")]
  Read(#[from] ImageReadError),
  #[error("无法创建输出目录 {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法写入图像 {path}: {source}")]
  Write {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 在原图（原始分辨率）上绘制结果并按输出扩展名编码保存
pub struct SaveImageFileOutput {
  draw: Draw,
  class_names: Option<Vec<String>>,
}

impl SaveImageFileOutput {
  pub fn new(draw: Draw, class_names: Option<Vec<String>>) -> Self {
    Self { draw, class_names }
  }

  pub fn from_config(config: &Config) -> Result<Self, ColorError> {
    Ok(Self::new(Draw::from_config(&config.render)?, config.class_names.clone()))
  }

  fn save_image(&self, image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| SaveImageFileError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    image.save(path).map_err(|source| SaveImageFileError::Write {
      path: path.to_path_buf(),
      source,
    })?;

    debug!("保存图像到文件: {}", path.display());
    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, source: &Path, result: &DetectionResult, output: &Path) -> Result<(), Self::Error> {
    let mut image = read_rgb_image(source)?;
    self.draw.draw_result(&mut image, result, self.class_names.as_deref());
    self.save_image(&image, output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::RenderConfig;
  use image::Rgb;
  use tempfile::tempdir;

  fn output(class_names: Option<Vec<String>>) -> SaveImageFileOutput {
    SaveImageFileOutput::new(Draw::from_config(&RenderConfig::default()).unwrap(), class_names)
  }

  #[test]
  fn empty_result_rewrites_identical_image() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("in.png");
    let target = dir.path().join("out.png");
    let original = RgbImage::from_fn(16, 9, |x, y| Rgb([(x * 13) as u8, (y * 29) as u8, 200]));
    original.save(&source).unwrap();

    output(None)
      .render_result(&source, &DetectionResult::empty(3), &target)
      .unwrap();

    let written = image::open(&target).unwrap().to_rgb8();
    assert_eq!(written, original);
  }

  #[test]
  fn draws_on_source_resolution_and_creates_directories() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("in.png");
    let target = dir.path().join("result/nested/in.png");
    RgbImage::new(32, 24).save(&source).unwrap();

    let result = DetectionResult::from_rows(&[vec![], vec![vec![4.0, 6.0, 20.0, 18.0, 0.87]]]).unwrap();
    output(Some(vec!["person".into(), "car".into()]))
      .render_result(&source, &result, &target)
      .unwrap();

    let written = image::open(&target).unwrap().to_rgb8();
    assert_eq!(written.dimensions(), (32, 24));
    assert_eq!(written.get_pixel(4, 15), &Rgb([0, 255, 0]));
    assert_eq!(written.get_pixel(20, 18), &Rgb([0, 255, 0]));
  }

  #[test]
  fn unreadable_source_is_an_error() {
    let dir = tempdir().unwrap();
    let err = output(None)
      .render_result(&dir.path().join("missing.png"), &DetectionResult::empty(1), &dir.path().join("o.png"))
      .unwrap_err();
    assert!(matches!(err, SaveImageFileError::Read(_)));
  }
}
