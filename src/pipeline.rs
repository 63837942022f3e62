// 该文件是 Beifeng （北风） 项目的一部分。
// src/pipeline.rs - 预处理流水线
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

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{frame::Record, input::ImageReadError};

mod format;
mod geometric;
mod load;
mod normalize;

pub use self::format::{Collect, ImageToTensor};
pub use self::geometric::{Pad, Resize};
pub use self::load::LoadImageFromFile;
pub use self::normalize::Normalize;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像读取失败: {0}")]
  Read(#[from] ImageReadError),
  #[error("{0} 需要已加载的图像")]
  MissingImage(&'static str),
  #[error("预处理参数无效: {0}")]
  Invalid(String),
}

/// 预处理步骤，输入和输出都是同一条记录
pub trait Transform: Send + Sync {
  fn name(&self) -> &'static str;
  fn apply(&self, record: Record) -> Result<Record, PipelineError>;
}

/// `data_pipeline` 中的单个步骤描述
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "typename")]
pub enum TransformConfig {
  LoadImageFromFile,
  Resize {
    img_scale: [u32; 2],
    #[serde(default = "default_keep_ratio")]
    keep_ratio: bool,
  },
  Normalize {
    mean: [f32; 3],
    std: [f32; 3],
    #[serde(default = "default_to_rgb")]
    to_rgb: bool,
  },
  Pad {
    #[serde(default)]
    size: Option<[u32; 2]>,
    #[serde(default)]
    size_divisor: Option<u32>,
    #[serde(default)]
    pad_val: f32,
  },
  ImageToTensor,
  Collect {
    keys: Vec<String>,
  },
}

fn default_keep_ratio() -> bool {
  true
}

fn default_to_rgb() -> bool {
  true
}

impl TransformConfig {
  pub fn build(&self) -> Result<Box<dyn Transform>, PipelineError> {
    let step: Box<dyn Transform> = match self {
      TransformConfig::LoadImageFromFile => Box::new(LoadImageFromFile),
      TransformConfig::Resize {
        img_scale,
        keep_ratio,
      } => Box::new(Resize::new(*img_scale, *keep_ratio)?),
      TransformConfig::Normalize { mean, std, to_rgb } => {
        Box::new(Normalize::new(*mean, *std, *to_rgb)?)
      }
      TransformConfig::Pad {
        size,
        size_divisor,
        pad_val,
      } => Box::new(Pad::new(*size, *size_divisor, *pad_val)?),
      TransformConfig::ImageToTensor => Box::new(ImageToTensor),
      TransformConfig::Collect { keys } => Box::new(Collect::new(keys.clone())?),
    };
    Ok(step)
  }
}

/// 按声明顺序串联的预处理链，构建后只读
pub struct Compose {
  steps: Vec<Box<dyn Transform>>,
}

impl Compose {
  pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
    Self { steps }
  }

  pub fn from_config(configs: &[TransformConfig]) -> Result<Self, PipelineError> {
    let steps = configs
      .iter()
      .map(TransformConfig::build)
      .collect::<Result<Vec<_>, _>>()?;
    debug!(
      "预处理流水线: [{}]",
      steps.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(Self::new(steps))
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn apply(&self, record: Record) -> Result<Record, PipelineError> {
    self.steps.iter().try_fold(record, |record, step| step.apply(record))
  }
}
