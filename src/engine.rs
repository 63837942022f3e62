// 该文件是 Beifeng （北风） 项目的一部分。
// src/engine.rs - 检测引擎接口与检测结果
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

use ndarray::{Array2, ArrayView1, Axis};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{batch::DeviceTensor, device::Device, frame::ImageMeta};

mod stub;
pub use self::stub::{StubEngine, StubModel};

#[cfg(feature = "backend-tract")]
mod tract;
#[cfg(feature = "backend-tract")]
pub use self::tract::{TractEngine, TractModel};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26Engine, Yolo26Model};

const DEFAULT_SCORE_THR: f32 = 0.5;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型权重尚未加载")]
  NotLoaded,
  #[error("无法加载权重文件 {path}: {source}")]
  Weights {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("{engine} 不支持设备 {device}")]
  UnsupportedDevice { engine: &'static str, device: Device },
  #[error("推理后端 {0} 未编译，请启用对应的 feature")]
  BackendDisabled(&'static str),
  #[error("数据形状错误: {0}")]
  Shape(String),
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// 可以迁移到设备上并加载权重的模型
pub trait Model {
  fn device(&self) -> Device;
  fn to_device(&mut self, device: Device) -> Result<(), EngineError>;
  fn load_weights(&mut self, path: &Path) -> Result<(), EngineError>;
}

/// 检测引擎：持有模型，把已放置到设备上的批次转换为检测结果
pub trait Engine {
  fn name(&self) -> &'static str;
  fn model(&self) -> &dyn Model;
  fn model_mut(&mut self) -> &mut dyn Model;

  /// 返回批次中每个样本的检测结果，顺序与 `img_metas` 一致
  fn infer(
    &self,
    img: &DeviceTensor,
    img_metas: &[ImageMeta],
  ) -> Result<Vec<DetectionResult>, EngineError>;
}

/// `infer_engine` 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "typename")]
pub enum EngineConfig {
  /// 对每张图像返回固定结果
  StubEngine { results: Vec<Vec<Vec<f32>>> },
  /// ONNX 检测模型，输出 `dets [1, N, 5]` 与 `labels [1, N]`
  TractEngine {
    input_size: [u32; 2],
    num_classes: usize,
    #[serde(default = "default_score_thr")]
    score_thr: f32,
  },
  /// RKNN 格式的 YOLO26 模型
  Yolo26Engine {
    #[serde(default = "default_yolo26_classes")]
    num_classes: usize,
    #[serde(default = "default_score_thr")]
    score_thr: f32,
  },
}

fn default_score_thr() -> f32 {
  DEFAULT_SCORE_THR
}

fn default_yolo26_classes() -> usize {
  80
}

pub fn build_engine(config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
  let engine: Box<dyn Engine> = match config {
    EngineConfig::StubEngine { results } => Box::new(StubEngine::new(DetectionResult::from_rows(results)?)),
    #[cfg(feature = "backend-tract")]
    EngineConfig::TractEngine {
      input_size,
      num_classes,
      score_thr,
    } => Box::new(TractEngine::new(*input_size, *num_classes, *score_thr)),
    #[cfg(not(feature = "backend-tract"))]
    EngineConfig::TractEngine { .. } => return Err(EngineError::BackendDisabled("backend-tract")),
    #[cfg(feature = "model_yolo26")]
    EngineConfig::Yolo26Engine {
      num_classes,
      score_thr,
    } => Box::new(Yolo26Engine::new(*num_classes, *score_thr)),
    #[cfg(not(feature = "model_yolo26"))]
    EngineConfig::Yolo26Engine { .. } => return Err(EngineError::BackendDisabled("model_yolo26")),
  };
  info!("创建检测引擎: {}", engine.name());
  Ok(engine)
}

/// 单张图像的检测结果。
///
/// 第 c 项是类别 c 的 `(N_c, 4)` 或 `(N_c, 5)` 数组：
/// `left, top, right, bottom` 以及可选的置信度，坐标位于原图像素空间。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
  per_class: Vec<Array2<f32>>,
}

impl DetectionResult {
  pub fn new(per_class: Vec<Array2<f32>>) -> Result<Self, EngineError> {
    for (class, boxes) in per_class.iter().enumerate() {
      if boxes.nrows() > 0 && !matches!(boxes.ncols(), 4 | 5) {
        return Err(EngineError::Shape(format!(
          "类别 {} 的检测框应为 4 或 5 列, 实际为 {}",
          class,
          boxes.ncols()
        )));
      }
    }
    Ok(Self { per_class })
  }

  /// 每个类别都没有检测框
  pub fn empty(num_classes: usize) -> Self {
    Self {
      per_class: vec![Array2::zeros((0, 5)); num_classes],
    }
  }

  /// 从逐行数据构建，同一类别内的行长度必须一致
  pub fn from_rows(rows: &[Vec<Vec<f32>>]) -> Result<Self, EngineError> {
    let per_class = rows
      .iter()
      .enumerate()
      .map(|(class, boxes)| {
        let cols = boxes.first().map_or(5, Vec::len);
        if boxes.iter().any(|b| b.len() != cols) {
          return Err(EngineError::Shape(format!("类别 {} 的检测框长度不一致", class)));
        }
        let flat: Vec<f32> = boxes.iter().flatten().copied().collect();
        Array2::from_shape_vec((boxes.len(), cols), flat).map_err(|e| EngineError::Shape(e.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?;
    Self::new(per_class)
  }

  /// 按 (类别, [l, t, r, b, score]) 收集，保持同类内的先后顺序
  pub fn from_detections(
    num_classes: usize,
    detections: impl IntoIterator<Item = (usize, [f32; 5])>,
  ) -> Result<Self, EngineError> {
    let mut grouped: Vec<Vec<f32>> = vec![Vec::new(); num_classes];
    for (class, det) in detections {
      let Some(bucket) = grouped.get_mut(class) else {
        return Err(EngineError::Shape(format!("类别 {} 超出类别数 {}", class, num_classes)));
      };
      bucket.extend_from_slice(&det);
    }

    let per_class = grouped
      .into_iter()
      .map(|flat| {
        let n = flat.len() / 5;
        Array2::from_shape_vec((n, 5), flat).map_err(|e| EngineError::Shape(e.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { per_class })
  }

  pub fn per_class(&self) -> &[Array2<f32>] {
    &self.per_class
  }

  pub fn num_classes(&self) -> usize {
    self.per_class.len()
  }

  pub fn num_detections(&self) -> usize {
    self.per_class.iter().map(Array2::nrows).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.num_detections() == 0
  }

  /// 展平为 (检测框, 类别索引)，先按类别、再按类内顺序排列
  pub fn flatten(&self) -> (Vec<ArrayView1<'_, f32>>, Vec<usize>) {
    let boxes = self
      .per_class
      .iter()
      .flat_map(|boxes| boxes.axis_iter(Axis(0)))
      .collect();
    let labels = self
      .per_class
      .iter()
      .enumerate()
      .flat_map(|(class, boxes)| std::iter::repeat_n(class, boxes.nrows()))
      .collect();
    (boxes, labels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn flatten_orders_by_class_then_detection() {
    let result = DetectionResult::new(vec![
      array![[0.0, 0.0, 1.0, 1.0, 0.9], [2.0, 2.0, 3.0, 3.0, 0.8]],
      array![[4.0, 4.0, 5.0, 5.0, 0.7]],
    ])
    .unwrap();

    let (boxes, labels) = result.flatten();
    assert_eq!(labels, vec![0, 0, 1]);
    assert_eq!(boxes.len(), 3);
    assert_eq!(boxes[0][0], 0.0);
    assert_eq!(boxes[1][0], 2.0);
    assert_eq!(boxes[2][0], 4.0);
    assert_eq!(result.num_detections(), 3);
  }

  #[test]
  fn empty_classes_are_skipped_in_flatten() {
    let result = DetectionResult::from_rows(&[vec![], vec![vec![1.0, 2.0, 3.0, 4.0]], vec![]]).unwrap();
    let (boxes, labels) = result.flatten();
    assert_eq!(labels, vec![1]);
    assert_eq!(boxes[0].len(), 4);
    assert_eq!(result.num_classes(), 3);
  }

  #[test]
  fn rejects_bad_column_counts() {
    assert!(DetectionResult::new(vec![Array2::zeros((1, 3))]).is_err());
    assert!(DetectionResult::from_rows(&[vec![vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0, 3.0, 4.0, 0.5]]]).is_err());
    assert!(DetectionResult::new(vec![Array2::zeros((0, 0))]).is_ok());
  }

  #[test]
  fn from_detections_groups_by_class() {
    let result = DetectionResult::from_detections(
      2,
      [(1, [0.0, 0.0, 1.0, 1.0, 0.5]), (0, [1.0, 1.0, 2.0, 2.0, 0.6]), (1, [2.0, 2.0, 3.0, 3.0, 0.7])],
    )
    .unwrap();
    assert_eq!(result.per_class()[0].nrows(), 1);
    assert_eq!(result.per_class()[1].nrows(), 2);
    assert_eq!(result.per_class()[1][[1, 4]], 0.7);
    assert!(DetectionResult::from_detections(1, [(3, [0.0; 5])]).is_err());
  }

  #[test]
  fn empty_result() {
    let result = DetectionResult::empty(3);
    assert!(result.is_empty());
    assert_eq!(result.flatten().1, Vec::<usize>::new());
  }

  #[test]
  fn engine_config_parses_typename() {
    let config: EngineConfig =
      serde_json::from_str(r#"{ "typename": "TractEngine", "input_size": [640, 640], "num_classes": 1 }"#).unwrap();
    assert!(matches!(
      config,
      EngineConfig::TractEngine {
        input_size: [640, 640],
        num_classes: 1,
        ..
      }
    ));
  }
}
