// 该文件是 Beifeng （北风） 项目的一部分。
// src/config.rs - 推理配置文件
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  device::{DeviceError, DevicePreference},
  engine::EngineConfig,
  output::ColorSpec,
  pipeline::TransformConfig,
};

/// 覆盖配置文件中 `device` 字段的环境变量
pub const DEVICE_ENV: &str = "BEIFENG_DEVICE";

const DEFAULT_FONT_SCALE: f32 = 0.5;
const DEFAULT_THICKNESS: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("设备配置错误: {0}")]
  Device(#[from] DeviceError),
  #[error("配置无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
  pub filepath: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
  pub bbox_color: ColorSpec,
  pub text_color: ColorSpec,
  pub thickness: u32,
  pub font_scale: f32,
  pub font: Option<PathBuf>,
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      bbox_color: ColorSpec::default(),
      text_color: ColorSpec::default(),
      thickness: DEFAULT_THICKNESS,
      font_scale: DEFAULT_FONT_SCALE,
      font: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub infer_engine: EngineConfig,
  pub weights: WeightsConfig,
  pub data_pipeline: Vec<TransformConfig>,
  #[serde(default)]
  pub class_names: Option<Vec<String>>,
  #[serde(default)]
  pub render: RenderConfig,
  #[serde(default)]
  pub device: Option<String>,
}

impl Config {
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let mut config = Self::from_json(&text).map_err(|e| match e {
      ConfigError::Parse { source, .. } => ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })?;

    if let Some(base) = path.parent() {
      config.resolve_relative_to(base);
    }
    Ok(config)
  }

  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
      path: PathBuf::new(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.data_pipeline.is_empty() {
      return Err(ConfigError::Invalid("data_pipeline 不能为空".to_string()));
    }
    if self.weights.filepath.as_os_str().is_empty() {
      return Err(ConfigError::Invalid("weights.filepath 不能为空".to_string()));
    }
    if self.render.font_scale <= 0.0 {
      return Err(ConfigError::Invalid(format!(
        "render.font_scale 必须为正数, 实际为 {}",
        self.render.font_scale
      )));
    }
    Ok(())
  }

  /// 相对路径在工作目录下找不到时，按配置文件所在目录解析
  fn resolve_relative_to(&mut self, base: &Path) {
    fn resolve(path: &mut PathBuf, base: &Path) {
      if path.is_relative() && !path.exists() {
        let candidate = base.join(&*path);
        if candidate.exists() {
          debug!("相对路径 {} 解析为 {}", path.display(), candidate.display());
          *path = candidate;
        }
      }
    }

    resolve(&mut self.weights.filepath, base);
    if let Some(font) = self.render.font.as_mut() {
      resolve(font, base);
    }
  }

  /// 环境变量优先于配置文件
  pub fn device_preference(&self) -> Result<DevicePreference, ConfigError> {
    let from_env = std::env::var(DEVICE_ENV).ok();
    match from_env.as_deref().or(self.device.as_deref()) {
      Some(text) => Ok(text.parse()?),
      None => Ok(DevicePreference::Auto),
    }
  }
}
