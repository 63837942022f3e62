// 该文件是 Beifeng （北风） 项目的一部分。
// src/engine/tract.rs - 基于 tract 的 ONNX 检测引擎
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

use ndarray::Axis;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use crate::{
  batch::DeviceTensor,
  device::Device,
  engine::{DetectionResult, Engine, EngineError, Model},
  frame::ImageMeta,
};

const DETS_WIDTH: usize = 5;

fn backend_error(context: &str, e: impl std::fmt::Display) -> EngineError {
  EngineError::Backend(format!("{}: {:#}", context, e))
}

/// 仅在 CPU 上运行的 ONNX 模型，权重即 ONNX 文件本身
pub struct TractModel {
  plan: Option<TypedRunnableModel<TypedModel>>,
  input_size: [u32; 2],
}

impl TractModel {
  fn new(input_size: [u32; 2]) -> Self {
    Self {
      plan: None,
      input_size,
    }
  }
}

impl Model for TractModel {
  fn device(&self) -> Device {
    Device::Cpu
  }

  fn to_device(&mut self, device: Device) -> Result<(), EngineError> {
    if device != Device::Cpu {
      warn!("tract 后端仅支持 CPU, 模型保留在 CPU 上 (请求设备: {})", device);
    }
    Ok(())
  }

  fn load_weights(&mut self, path: &Path) -> Result<(), EngineError> {
    if let Err(source) = std::fs::metadata(path) {
      return Err(EngineError::Weights {
        path: path.to_path_buf(),
        source,
      });
    }

    let [width, height] = self.input_size;
    info!("加载 ONNX 模型: {} (输入 {}x{})", path.display(), width, height);
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(|e| backend_error("无法读取 ONNX 模型", e))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, height as usize, width as usize)),
      )
      .map_err(|e| backend_error("无法设置模型输入", e))?
      .into_optimized()
      .map_err(|e| backend_error("模型优化失败", e))?
      .into_runnable()
      .map_err(|e| backend_error("无法构建可执行模型", e))?;

    self.plan = Some(plan);
    info!("模型加载完成");
    Ok(())
  }
}

pub struct TractEngine {
  model: TractModel,
  num_classes: usize,
  score_thr: f32,
}

impl TractEngine {
  pub fn new(input_size: [u32; 2], num_classes: usize, score_thr: f32) -> Self {
    Self {
      model: TractModel::new(input_size),
      num_classes,
      score_thr,
    }
  }

  fn decode(&self, outputs: TVec<TValue>, meta: &ImageMeta) -> Result<DetectionResult, EngineError> {
    if outputs.len() < 2 {
      return Err(EngineError::Shape(format!(
        "模型应输出 dets 和 labels, 实际输出 {} 个张量",
        outputs.len()
      )));
    }

    let dets: Vec<f32> = outputs[0]
      .to_array_view::<f32>()
      .map_err(|e| backend_error("dets 不是 f32 张量", e))?
      .iter()
      .copied()
      .collect();
    let labels = outputs[1]
      .cast_to::<i64>()
      .map_err(|e| backend_error("labels 无法转换为整数", e))?;
    let labels: Vec<i64> = labels
      .to_array_view::<i64>()
      .map_err(|e| backend_error("labels 读取失败", e))?
      .iter()
      .copied()
      .collect();

    if dets.len() != labels.len() * DETS_WIDTH {
      return Err(EngineError::Shape(format!(
        "dets 元素数 {} 与 labels 数量 {} 不匹配",
        dets.len(),
        labels.len()
      )));
    }

    let mut kept = Vec::new();
    for (det, &label) in dets.chunks_exact(DETS_WIDTH).zip(&labels) {
      let score = det[4];
      if score < self.score_thr {
        continue;
      }
      let class = match usize::try_from(label) {
        Ok(class) if class < self.num_classes => class,
        _ => {
          warn!("忽略超出范围的类别: {}", label);
          continue;
        }
      };
      let [l, t, r, b] = meta.rescale_bbox([det[0], det[1], det[2], det[3]]);
      kept.push((class, [l, t, r, b, score]));
    }
    debug!("{}: 保留 {} 个检测框", meta.filename.display(), kept.len());

    DetectionResult::from_detections(self.num_classes, kept)
  }
}

impl Engine for TractEngine {
  fn name(&self) -> &'static str {
    "TractEngine"
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
    let plan = self.model.plan.as_ref().ok_or(EngineError::NotLoaded)?;

    let (n, c, h, w) = img.shape();
    let [width, height] = self.model.input_size;
    if (h, w) != (height as usize, width as usize) || n != img_metas.len() {
      return Err(EngineError::Shape(format!(
        "输入形状 {:?} 与模型输入 {}x{} 或元信息数量 {} 不匹配",
        (n, c, h, w),
        width,
        height,
        img_metas.len()
      )));
    }

    let view = img.view();
    let mut results = Vec::with_capacity(n);
    for (sample, meta) in view.axis_iter(Axis(0)).zip(img_metas) {
      let data: Vec<f32> = sample.iter().copied().collect();
      let input: Tensor = tract_ndarray::Array4::from_shape_vec((1, c, h, w), data)
        .map_err(|e| EngineError::Shape(e.to_string()))?
        .into_tensor();
      let outputs = plan
        .run(tvec!(input.into()))
        .map_err(|e| backend_error("ONNX 推理失败", e))?;
      results.push(self.decode(outputs, meta)?);
    }
    Ok(results)
  }
}
