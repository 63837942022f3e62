// 该文件是 Beifeng （北风） 项目的一部分。
// src/engine/yolo26.rs - RKNPU 上的 YOLO26 检测引擎
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

use ndarray::{ArrayView3, Axis};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use crate::{
  batch::DeviceTensor,
  device::Device,
  engine::{DetectionResult, Engine, EngineError, Model},
  frame::ImageMeta,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_W: usize = 640;
const YOLO26_INPUT_H: usize = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

impl From<rknpu::Error> for EngineError {
  fn from(err: rknpu::Error) -> Self {
    EngineError::Backend(format!("RKNN 错误: {}", err))
  }
}

/// RKNN 模型，只能运行在 NPU 上
#[derive(Default)]
pub struct Yolo26Model {
  context: Option<Context>,
  device: Option<Device>,
}

impl Model for Yolo26Model {
  fn device(&self) -> Device {
    self.device.unwrap_or(Device::Npu(0))
  }

  fn to_device(&mut self, device: Device) -> Result<(), EngineError> {
    match device {
      Device::Npu(_) => {
        self.device = Some(device);
        Ok(())
      }
      Device::Cpu => Err(EngineError::UnsupportedDevice {
        engine: "Yolo26Engine",
        device,
      }),
    }
  }

  fn load_weights(&mut self, path: &Path) -> Result<(), EngineError> {
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path).map_err(|source| EngineError::Weights {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(EngineError::Shape(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }

    self.context = Some(context);
    info!("模型加载完成");
    Ok(())
  }
}

pub struct Yolo26Engine {
  model: Yolo26Model,
  num_classes: usize,
  score_thr: f32,
}

impl Yolo26Engine {
  pub fn new(num_classes: usize, score_thr: f32) -> Self {
    Self {
      model: Yolo26Model::default(),
      num_classes,
      score_thr,
    }
  }

  /// 量化模型的输入是 NHWC u8，像素值需保持 0..=255 的原始范围
  fn to_nhwc_u8(sample: ArrayView3<'_, f32>) -> Vec<u8> {
    sample
      .permuted_axes([1, 2, 0])
      .iter()
      .map(|v| v.round().clamp(0.0, 255.0) as u8)
      .collect()
  }

  fn postprocess(&self, output: &rknpu::Output, meta: &ImageMeta) -> Result<DetectionResult, EngineError> {
    let mut items = Vec::new();

    for (head_idx, (&(map_h, map_w), stride)) in YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate() {
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = self.num_classes * spatial;

      // 输出顺序不固定，按张量大小区分回归和分类
      let first = output.get_f32(head_idx * 2)?;
      let second = output.get_f32(head_idx * 2 + 1)?;
      let (first, second) = (&first[..], &second[..]);
      let (reg, cls) = if first.len() == reg_expected && second.len() == cls_expected {
        (first, second)
      } else if first.len() == cls_expected && second.len() == reg_expected {
        (second, first)
      } else {
        return Err(EngineError::Shape(format!(
          "检测头 {}: 输出大小 {}/{} 与期望 {}/{} 不符",
          head_idx,
          first.len(),
          second.len(),
          reg_expected,
          cls_expected
        )));
      };

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (max_logit, class_id) = (0..self.num_classes)
            .map(|c| (cls[c * spatial + idx], c))
            .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
          let score = sigmoid(max_logit);
          if score <= self.score_thr {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;
          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, YOLO26_INPUT_W as f32);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, YOLO26_INPUT_H as f32);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, YOLO26_INPUT_W as f32);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, YOLO26_INPUT_H as f32);

          let [l, t, r, b] = meta.rescale_bbox([xmin, ymin, xmax, ymax]);
          items.push((class_id, [l, t, r, b, score]));
        }
      }
    }

    debug!("检测到 {} 个物体", items.len());
    DetectionResult::from_detections(self.num_classes, items)
  }
}

impl Engine for Yolo26Engine {
  fn name(&self) -> &'static str {
    "Yolo26Engine"
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
    let context = self.model.context.as_ref().ok_or(EngineError::NotLoaded)?;
    let (n, c, h, w) = img.shape();
    if (c, h, w) != (3, YOLO26_INPUT_H, YOLO26_INPUT_W) || n != img_metas.len() {
      return Err(EngineError::Shape(format!(
        "输入形状 {:?} 应为 (N, 3, {}, {}) 且 N 等于元信息数量 {}",
        (n, c, h, w),
        YOLO26_INPUT_H,
        YOLO26_INPUT_W,
        img_metas.len()
      )));
    }

    let view = img.view();
    let mut results = Vec::with_capacity(n);
    for (sample, meta) in view.axis_iter(Axis(0)).zip(img_metas) {
      debug!("设置模型输入");
      let input = Self::to_nhwc_u8(sample);
      context.set_input(0, &input, TensorFormat::NHWC, TensorType::UInt8)?;

      debug!("执行模型推理");
      context.run()?;

      let output = context.get_outputs()?;
      results.push(self.postprocess(&output, meta)?);
    }
    Ok(results)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
