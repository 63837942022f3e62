// 该文件是 Beifeng （北风） 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::path::Path;

use image::Rgb;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::DetectionResult;

pub mod draw;
mod save_image_file;

pub use self::draw::{Draw, label_text};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

/// 把检测结果绘制到原图上并写出
pub trait Render {
  type Error;
  fn render_result(&self, source: &Path, result: &DetectionResult, output: &Path) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum ColorError {
  #[error("未知颜色名称: {0}")]
  UnknownName(String),
}

/// 颜色名称或 `[r, g, b]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
  Name(String),
  Rgb([u8; 3]),
}

impl Default for ColorSpec {
  fn default() -> Self {
    ColorSpec::Name("green".to_string())
  }
}

impl ColorSpec {
  pub fn resolve(&self) -> Result<Rgb<u8>, ColorError> {
    let rgb = match self {
      ColorSpec::Rgb(rgb) => *rgb,
      ColorSpec::Name(name) => match name.to_ascii_lowercase().as_str() {
        "red" => [255, 0, 0],
        "green" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "cyan" => [0, 255, 255],
        "yellow" => [255, 255, 0],
        "magenta" => [255, 0, 255],
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        _ => return Err(ColorError::UnknownName(name.clone())),
      },
    };
    Ok(Rgb(rgb))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_names_and_triples() {
    assert_eq!(ColorSpec::default().resolve().unwrap(), Rgb([0, 255, 0]));
    assert_eq!(ColorSpec::Name("Red".into()).resolve().unwrap(), Rgb([255, 0, 0]));
    assert_eq!(ColorSpec::Rgb([1, 2, 3]).resolve().unwrap(), Rgb([1, 2, 3]));
    assert!(ColorSpec::Name("chartreuse".into()).resolve().is_err());
  }

  #[test]
  fn deserialize_either_form() {
    let name: ColorSpec = serde_json::from_str(r#""blue""#).unwrap();
    let rgb: ColorSpec = serde_json::from_str("[10, 20, 30]").unwrap();
    assert_eq!(name, ColorSpec::Name("blue".into()));
    assert_eq!(rgb, ColorSpec::Rgb([10, 20, 30]));
  }
}
