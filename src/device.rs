// 该文件是 Beifeng （北风） 项目的一部分。
// src/device.rs - 计算设备选择
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::{debug, info};

/// NPU 驱动在不同内核版本下暴露的设备节点
#[cfg(feature = "model_yolo26")]
const NPU_DEVICE_NODES: [&str; 3] = ["/dev/rknpu", "/sys/class/misc/rknpu", "/sys/kernel/debug/rknpu"];

/// 推理所在的计算设备，进程生命周期内只选择一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
  Cpu,
  Npu(u32),
}

impl Device {
  pub fn is_accelerator(&self) -> bool {
    matches!(self, Device::Npu(_))
  }

  /// 根据偏好选择设备
  pub fn select(preference: DevicePreference) -> Result<Self, DeviceError> {
    let available = npu_available();
    debug!("NPU 可用: {}", available);

    let device = match preference {
      DevicePreference::Cpu => Device::Cpu,
      DevicePreference::Npu(index) if available => Device::Npu(index),
      DevicePreference::Npu(index) => return Err(DeviceError::Unavailable(Device::Npu(index))),
      DevicePreference::Auto if available => Device::Npu(0),
      DevicePreference::Auto => Device::Cpu,
    };

    info!("选择计算设备: {}", device);
    Ok(device)
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Npu(index) => write!(f, "npu:{}", index),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
  #[default]
  Auto,
  Cpu,
  Npu(u32),
}

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("无法识别的设备描述: {0}")]
  Unrecognized(String),
  #[error("设备不可用: {0}")]
  Unavailable(Device),
}

impl FromStr for DevicePreference {
  type Err = DeviceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
      "" | "auto" => Ok(DevicePreference::Auto),
      "cpu" => Ok(DevicePreference::Cpu),
      "npu" => Ok(DevicePreference::Npu(0)),
      other => other
        .strip_prefix("npu:")
        .and_then(|index| index.parse().ok())
        .map(DevicePreference::Npu)
        .ok_or_else(|| DeviceError::Unrecognized(other.to_string())),
    }
  }
}

#[cfg(feature = "model_yolo26")]
fn npu_available() -> bool {
  NPU_DEVICE_NODES
    .iter()
    .any(|node| std::path::Path::new(node).exists())
}

#[cfg(not(feature = "model_yolo26"))]
fn npu_available() -> bool {
  false
}
