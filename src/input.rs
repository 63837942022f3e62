// 该文件是 Beifeng （北风） 项目的一部分。
// src/input.rs - 图像输入与目录扫描
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

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

mod read_image_file;
pub use self::read_image_file::{ImageReadError, read_rgb_image};

/// 可处理的图像扩展名（区分大小写，包含前导点）
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".webp", ".bmp", ".png"];

/// 能识别但不处理的视频扩展名
pub const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".mov", ".avi", ".mkv"];

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("遍历目录失败: {0}")]
  Walk(#[from] walkdir::Error),
}

/// 带前导点的扩展名，没有扩展名时返回 `None`
pub fn extension_of(path: &Path) -> Option<String> {
  path
    .extension()
    .map(|ext| format!(".{}", ext.to_string_lossy()))
}

pub fn is_image_path(path: &Path) -> bool {
  extension_of(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_video_path(path: &Path) -> bool {
  extension_of(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// 递归扫描 `root` 下的所有图像文件。
///
/// 返回顺序即遍历顺序，需要确定顺序时由调用方排序。
/// `root` 不存在时返回空列表。
pub fn scan(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
  if !root.exists() {
    warn!("扫描目录不存在: {}", root.display());
    return Ok(Vec::new());
  }

  let mut images = Vec::new();
  for entry in WalkDir::new(root) {
    let entry = entry?;
    let path = entry.path();
    let regular = entry.file_type().is_file() || (entry.path_is_symlink() && path.is_file());
    if !regular {
      continue;
    }

    if is_image_path(path) {
      images.push(path.to_path_buf());
    } else if is_video_path(path) {
      debug!("跳过视频文件: {}", path.display());
    }
  }

  debug!("在 {} 下找到 {} 张图像", root.display(), images.len());
  Ok(images)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs::{self, File};
  use tempfile::tempdir;

  #[test]
  fn image_extension_is_case_sensitive() {
    assert!(is_image_path(Path::new("a/b.jpg")));
    assert!(is_image_path(Path::new("b.webp")));
    assert!(!is_image_path(Path::new("b.JPG")));
    assert!(!is_image_path(Path::new("b.gif")));
    assert!(!is_image_path(Path::new("b.mp4")));
    assert!(!is_image_path(Path::new("result")));
    assert!(!is_image_path(Path::new(".png")));
  }

  #[test]
  fn scan_recurses_and_filters_by_extension() {
    let dir = tempdir().unwrap();
    let d = dir.path();
    fs::create_dir_all(d.join("sub/deeper")).unwrap();

    for name in [
      "a.jpg",
      "b.png",
      "sub/c.jpeg",
      "sub/deeper/d.bmp",
      "sub/deeper/e.webp",
      "skip.gif",
      "skip.mp4",
      "skip.PNG",
      "sub/noext",
    ] {
      File::create(d.join(name)).unwrap();
    }

    let mut found = scan(d).unwrap();
    found.sort();

    let mut expected: Vec<PathBuf> = ["a.jpg", "b.png", "sub/c.jpeg", "sub/deeper/d.bmp", "sub/deeper/e.webp"]
      .iter()
      .map(|name| d.join(name))
      .collect();
    expected.sort();

    assert_eq!(found, expected);
  }

  #[test]
  fn scan_missing_or_empty_root_is_empty() {
    let dir = tempdir().unwrap();
    assert!(scan(dir.path()).unwrap().is_empty());
    assert!(scan(&dir.path().join("missing")).unwrap().is_empty());
  }
}
