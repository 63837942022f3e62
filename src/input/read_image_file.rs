// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ImageReadError {
  #[error("无法打开图片文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图片文件 {path}: {source}")]
  Decode {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 读取图像并统一转换为 8 位 RGB
pub fn read_rgb_image(path: &Path) -> Result<RgbImage, ImageReadError> {
  let reader = ImageReader::open(path).map_err(|source| {
    error!("无法打开图片文件: {}", path.display());
    ImageReadError::Io {
      path: path.to_path_buf(),
      source,
    }
  })?;

  let reader = reader.with_guessed_format().map_err(|source| ImageReadError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let image = reader.decode().map_err(|source| {
    error!("无法解码图片文件: {}", path.display());
    ImageReadError::Decode {
      path: path.to_path_buf(),
      source,
    }
  })?;

  Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use tempfile::tempdir;

  #[test]
  fn reads_png_as_rgb() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.png");
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, Rgb([9, 8, 7]));
    image.save(&path).unwrap();

    let loaded = read_rgb_image(&path).unwrap();
    assert_eq!(loaded.dimensions(), (3, 2));
    assert_eq!(loaded.get_pixel(2, 1), &Rgb([9, 8, 7]));
  }

  #[test]
  fn missing_and_corrupt_files_are_errors() {
    let dir = tempdir().unwrap();
    assert!(matches!(
      read_rgb_image(&dir.path().join("missing.png")),
      Err(ImageReadError::Io { .. })
    ));

    let corrupt = dir.path().join("corrupt.png");
    std::fs::write(&corrupt, b"not an image").unwrap();
    assert!(matches!(read_rgb_image(&corrupt), Err(ImageReadError::Decode { .. })));
  }
}
