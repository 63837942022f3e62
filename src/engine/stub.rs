// 该文件是 Beifeng （北风） 项目的一部分。
// src/engine/stub.rs - 固定输出的检测引擎
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

use tracing::{debug, info};

use crate::{
  batch::DeviceTensor,
  device::Device,
  engine::{DetectionResult, Engine, EngineError, Model},
  frame::ImageMeta,
};

/// 只检查权重文件可读，不解析内容
#[derive(Debug, Default)]
pub struct StubModel {
  device: Option<Device>,
  weights: Option<PathBuf>,
}

impl StubModel {
  pub fn weights(&self) -> Option<&Path> {
    self.weights.as_deref()
  }
}

impl Model for StubModel {
  fn device(&self) -> Device {
    self.device.unwrap_or(Device::Cpu)
  }

  fn to_device(&mut self, device: Device) -> Result<(), EngineError> {
    debug!("StubModel 迁移到 {}", device);
    self.device = Some(device);
    Ok(())
  }

  fn load_weights(&mut self, path: &Path) -> Result<(), EngineError> {
    let metadata = std::fs::metadata(path).map_err(|source| EngineError::Weights {
      path: path.to_path_buf(),
      source,
    })?;
    if !metadata.is_file() {
      return Err(EngineError::Weights {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "不是普通文件"),
      });
    }
    info!("加载权重: {} ({} 字节)", path.display(), metadata.len());
    self.weights = Some(path.to_path_buf());
    Ok(())
  }
}

/// 对每个样本返回同一份结果，用于联调和测试
#[derive(Debug)]
pub struct StubEngine {
  model: StubModel,
  result: DetectionResult,
}

impl StubEngine {
  pub fn new(result: DetectionResult) -> Self {
    Self {
      model: StubModel::default(),
      result,
    }
  }
}

impl Engine for StubEngine {
  fn name(&self) -> &'static str {
    "StubEngine"
  }

  fn model(&self) -> &dyn Model {
    &self.model
  }

  fn model_mut(&mut self) -> &mut dyn Model {
    &mut self.model
  }

  fn infer(
    &self,
    img: &DeviceTensor,
    img_metas: &[ImageMeta],
  ) -> Result<Vec<DetectionResult>, EngineError> {
    if self.model.weights.is_none() {
      return Err(EngineError::NotLoaded);
    }

    let (n, _, _, _) = img.shape();
    if n != img_metas.len() {
      return Err(EngineError::Shape(format!(
        "批大小 {} 与元信息数量 {} 不一致",
        n,
        img_metas.len()
      )));
    }
    Ok(vec![self.result.clone(); n])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array4;
  use tempfile::NamedTempFile;

  #[test]
  fn infer_requires_weights() {
    let engine = StubEngine::new(DetectionResult::empty(1));
    let img = DeviceTensor::new(Device::Cpu, Array4::zeros((1, 3, 2, 2)));
    let metas = [ImageMeta::new("a.png", (2, 2, 3))];
    assert!(matches!(engine.infer(&img, &metas), Err(EngineError::NotLoaded)));
  }

  #[test]
  fn returns_canned_result_per_sample() {
    let weights = NamedTempFile::new().unwrap();
    let canned = DetectionResult::from_rows(&[vec![vec![1.0, 2.0, 3.0, 4.0, 0.5]]]).unwrap();
    let mut engine = StubEngine::new(canned.clone());
    engine.model_mut().to_device(Device::Npu(0)).unwrap();
    engine.model_mut().load_weights(weights.path()).unwrap();
    assert_eq!(engine.model().device(), Device::Npu(0));

    let img = DeviceTensor::new(Device::Npu(0), Array4::zeros((2, 3, 2, 2)));
    let metas = [ImageMeta::new("a.png", (2, 2, 3)), ImageMeta::new("b.png", (2, 2, 3))];
    assert_eq!(engine.infer(&img, &metas).unwrap(), vec![canned.clone(), canned]);
    assert!(engine.infer(&img, &metas[..1]).is_err());
  }

  #[test]
  fn missing_weights_file_is_fatal() {
    let mut model = StubModel::default();
    let err = model.load_weights(Path::new("/nonexistent/weights.pth")).unwrap_err();
    assert!(matches!(err, EngineError::Weights { .. }));
  }
}
