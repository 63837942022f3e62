// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use ndarray::ArrayView1;
use tracing::{debug, warn};

use crate::{
  config::RenderConfig,
  engine::DetectionResult,
  output::ColorError,
};

// font_scale 为 1 时的字高（像素）
const FONT_BASE_HEIGHT: f32 = 30.0;
// 文字基线距离框顶部的距离
const LABEL_BASELINE_OFFSET: i32 = 2;

// 坐标裁剪到图像外这一范围内，框线和标签仍落在图像之外
const CLIP_MARGIN: i32 = 4096;
const MAX_CLIP_LEN: u32 = 1 << 20;

/// 找不到配置字体时使用的内置字体 (DejaVu Sans)
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

fn clip(v: i32, len: u32) -> i32 {
  v.clamp(-CLIP_MARGIN, len.min(MAX_CLIP_LEN) as i32 + CLIP_MARGIN)
}

/// 标签文本：有类别名表时用名称，否则用 `cls {label}`；带分数时追加 `|{score:.2}`
pub fn label_text(label: usize, bbox: ArrayView1<'_, f32>, class_names: Option<&[String]>) -> String {
  let mut text = match class_names.and_then(|names| names.get(label)) {
    Some(name) => name.clone(),
    None => format!("cls {}", label),
  };
  if bbox.len() > 4 {
    text.push_str(&format!("|{:.2}", bbox[bbox.len() - 1]));
  }
  text
}

pub struct Draw {
  bbox_color: Rgb<u8>,
  text_color: Rgb<u8>,
  thickness: u32,
  font_scale: f32,
  font: Option<FontArc>,
}

impl Draw {
  pub fn from_config(config: &RenderConfig) -> Result<Self, ColorError> {
    Ok(Self {
      bbox_color: config.bbox_color.resolve()?,
      text_color: config.text_color.resolve()?,
      thickness: config.thickness.max(1),
      font_scale: config.font_scale,
      font: load_font(config.font.as_deref()),
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 逐个绘制矩形框和标签，绘制顺序与 [`DetectionResult::flatten`] 一致
  pub fn draw_result(&self, image: &mut RgbImage, result: &DetectionResult, class_names: Option<&[String]>) {
    let (boxes, labels) = result.flatten();
    for (bbox, label) in boxes.into_iter().zip(labels) {
      if bbox.len() < 4 {
        continue;
      }
      // 与整数转换语义一致：向零截断
      let (width, height) = image.dimensions();
      let left = clip(bbox[0] as i32, width);
      let top = clip(bbox[1] as i32, height);
      let right = clip(bbox[2] as i32, width);
      let bottom = clip(bbox[3] as i32, height);

      self.draw_rect(image, (left, top), (right, bottom));

      let text = label_text(label, bbox, class_names);
      self.draw_label(image, left, top - LABEL_BASELINE_OFFSET, &text);
    }
  }

  fn draw_rect(&self, image: &mut RgbImage, (x0, y0): (i32, i32), (x1, y1): (i32, i32)) {
    let (left, right) = (x0.min(x1), x0.max(x1));
    let (top, bottom) = (y0.min(y1), y0.max(y1));

    // 线宽向两侧扩展
    let half = (self.thickness as i32 - 1) / 2;
    for k in 0..self.thickness as i32 {
      let d = k - half;
      let width = right - left + 1 + 2 * d;
      let height = bottom - top + 1 + 2 * d;
      if width <= 0 || height <= 0 {
        continue;
      }
      let rect = Rect::at(left - d, top - d).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.bbox_color);
    }
  }

  /// `(x, baseline)` 为文字左下角
  fn draw_label(&self, image: &mut RgbImage, x: i32, baseline: i32, text: &str) {
    let Some(font) = &self.font else {
      return;
    };
    let height = self.font_scale * FONT_BASE_HEIGHT;
    let scale = PxScale::from(height);
    draw_text_mut(image, self.text_color, x, baseline - height as i32, scale, font, text);
  }
}

fn read_font(path: &Path) -> Option<FontArc> {
  let data = std::fs::read(path).ok()?;
  FontArc::try_from_vec(data).ok()
}

/// 先用配置的字体，失败时退回内置字体
fn load_font(configured: Option<&Path>) -> Option<FontArc> {
  if let Some(path) = configured {
    match read_font(path) {
      Some(font) => {
        debug!("使用字体: {}", path.display());
        return Some(font);
      }
      None => warn!("无法加载字体 {}, 使用内置字体", path.display()),
    }
  }

  match FontArc::try_from_slice(EMBEDDED_FONT) {
    Ok(font) => Some(font),
    Err(e) => {
      warn!("内置字体无效 ({}), 仅绘制检测框", e);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn names() -> Vec<String> {
    vec!["person".to_string(), "car".to_string()]
  }

  fn plain_draw() -> Draw {
    Draw {
      bbox_color: Rgb([0, 255, 0]),
      text_color: Rgb([0, 255, 0]),
      thickness: 1,
      font_scale: 0.5,
      font: None,
    }
  }

  #[test]
  fn label_with_name_and_score() {
    let bbox = array![10.0, 10.0, 50.0, 50.0, 0.87];
    let names = names();
    assert_eq!(label_text(1, bbox.view(), Some(names.as_slice())), "car|0.87");
    assert_eq!(label_text(1, bbox.view(), None), "cls 1|0.87");
  }

  #[test]
  fn label_without_score_has_no_suffix() {
    let bbox = array![10.0, 10.0, 50.0, 50.0];
    let names = names();
    assert_eq!(label_text(0, bbox.view(), Some(names.as_slice())), "person");
    assert_eq!(label_text(1, bbox.view(), None), "cls 1");
  }

  #[test]
  fn label_outside_name_table_falls_back() {
    let bbox = array![0.0, 0.0, 1.0, 1.0, 0.5];
    let names = names();
    assert_eq!(label_text(5, bbox.view(), Some(names.as_slice())), "cls 5|0.50");
  }

  #[test]
  fn draws_one_pixel_rectangle_edges() {
    let mut image = RgbImage::new(20, 20);
    let result = DetectionResult::from_rows(&[vec![vec![2.7, 3.2, 10.9, 12.0, 0.9]]]).unwrap();
    plain_draw().draw_result(&mut image, &result, None);

    let green = Rgb([0, 255, 0]);
    let black = Rgb([0, 0, 0]);
    // 坐标截断为 (2, 3) - (10, 12)
    assert_eq!(image.get_pixel(2, 3), &green);
    assert_eq!(image.get_pixel(10, 12), &green);
    assert_eq!(image.get_pixel(6, 3), &green);
    assert_eq!(image.get_pixel(2, 8), &green);
    assert_eq!(image.get_pixel(6, 8), &black);
    assert_eq!(image.get_pixel(11, 12), &black);
    assert_eq!(image.get_pixel(1, 3), &black);
  }

  #[test]
  fn empty_result_leaves_image_untouched() {
    let mut image = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8, y as u8, 7]));
    let before = image.clone();
    plain_draw().draw_result(&mut image, &DetectionResult::empty(2), None);
    assert_eq!(image, before);
  }

  #[test]
  fn extreme_coordinates_are_clipped() {
    let mut image = RgbImage::new(8, 8);
    let result = DetectionResult::from_rows(&[vec![vec![-3e9, 0.0, 3e9, 5.0, 0.5]]]).unwrap();
    plain_draw().draw_result(&mut image, &result, None);

    let green = Rgb([0, 255, 0]);
    assert!((0..8).all(|x| image.get_pixel(x, 0) == &green && image.get_pixel(x, 5) == &green));
    assert_eq!(image.get_pixel(0, 3), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(7, 3), &Rgb([0, 0, 0]));

    let huge = DetectionResult::from_rows(&[vec![vec![f32::MIN, f32::MIN, f32::MAX, f32::MAX]]]).unwrap();
    plain_draw().draw_result(&mut image, &huge, None);
  }

  #[test]
  fn label_is_drawn_above_box_with_embedded_font() {
    let config = RenderConfig {
      text_color: crate::output::ColorSpec::Name("red".to_string()),
      ..RenderConfig::default()
    };
    let draw = Draw::from_config(&config).unwrap();
    assert!(draw.has_font());

    let mut image = RgbImage::new(80, 50);
    let result = DetectionResult::from_rows(&[vec![vec![2.0, 24.0, 70.0, 45.0, 0.9]]]).unwrap();
    draw.draw_result(&mut image, &result, None);

    // 基线在 y = 22，文字位于框顶部上方
    let is_text = |p: &Rgb<u8>| p[0] > 0 && p[1] == 0;
    let above = (2..70).flat_map(|x| (0..23).map(move |y| (x, y)));
    assert!(above.filter(|&(x, y)| is_text(image.get_pixel(x, y))).count() > 10);
    let mut inside = (3..70).flat_map(|x| (26..45).map(move |y| (x, y)));
    assert!(inside.all(|(x, y)| !is_text(image.get_pixel(x, y))));
    assert_eq!(image.get_pixel(2, 30), &Rgb([0, 255, 0]));
  }

  #[test]
  fn boxes_outside_image_are_clipped() {
    let mut image = RgbImage::new(4, 4);
    let result = DetectionResult::from_rows(&[vec![vec![-5.0, -5.0, 100.0, 100.0]]]).unwrap();
    plain_draw().draw_result(&mut image, &result, None);
    assert_eq!(image.dimensions(), (4, 4));
  }
}
