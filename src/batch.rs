// 该文件是 Beifeng （北风） 项目的一部分。
// src/batch.rs - 批组装与设备分发
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

use ndarray::{Array4, ArrayView4, s};
use thiserror::Error;
use tracing::debug;

use crate::{
  device::Device,
  frame::{ImageMeta, Record, chw_dims},
};

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("不能组装空批次")]
  Empty,
  #[error("每个设备的样本数不能为 0")]
  ZeroSamplesPerDevice,
  #[error("样本 {0} 缺少张量或元信息")]
  Incomplete(String),
  #[error("样本通道数不一致: 期望 {expected}, 实际 {actual}")]
  ChannelMismatch { expected: usize, actual: usize },
  #[error("分块数 {chunks} 超过设备数 {devices}")]
  TooFewDevices { chunks: usize, devices: usize },
}

/// 组装后的批次，每个分块对应一个设备。
///
/// 元信息按样本保留，不做展平。
#[derive(Debug, Clone)]
pub struct Batch {
  pub img: Vec<Array4<f32>>,
  pub img_metas: Vec<Vec<ImageMeta>>,
}

impl Batch {
  pub fn num_chunks(&self) -> usize {
    self.img.len()
  }
}

/// 已放置到某个设备上的张量
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTensor {
  device: Device,
  data: Array4<f32>,
}

impl DeviceTensor {
  pub fn new(device: Device, data: Array4<f32>) -> Self {
    Self { device, data }
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  /// (N, C, H, W)
  pub fn shape(&self) -> (usize, usize, usize, usize) {
    self.data.dim()
  }

  pub fn into_inner(self) -> Array4<f32> {
    self.data
  }
}

/// 可以直接交给引擎的输入
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
  pub img: DeviceTensor,
  pub img_metas: Vec<ImageMeta>,
}

/// 把样本按 `samples_per_device` 分块并堆叠，块内张量在右侧和下方补零到相同尺寸
pub fn collate(records: Vec<Record>, samples_per_device: usize) -> Result<Batch, BatchError> {
  if records.is_empty() {
    return Err(BatchError::Empty);
  }
  if samples_per_device == 0 {
    return Err(BatchError::ZeroSamplesPerDevice);
  }

  let mut samples = Vec::with_capacity(records.len());
  for record in records {
    match (record.tensor, record.meta) {
      (Some(tensor), Some(meta)) => samples.push((tensor, meta)),
      _ => return Err(BatchError::Incomplete(record.filename.display().to_string())),
    }
  }

  let mut img = Vec::new();
  let mut img_metas = Vec::new();
  for chunk in samples.chunks(samples_per_device) {
    let (channels, _, _) = chw_dims(&chunk[0].0);
    let mut max_h = 0;
    let mut max_w = 0;
    for (tensor, _) in chunk {
      let (c, h, w) = chw_dims(tensor);
      if c != channels {
        return Err(BatchError::ChannelMismatch {
          expected: channels,
          actual: c,
        });
      }
      max_h = max_h.max(h);
      max_w = max_w.max(w);
    }

    let mut stacked = Array4::<f32>::zeros((chunk.len(), channels, max_h, max_w));
    for (i, (tensor, _)) in chunk.iter().enumerate() {
      let (_, h, w) = chw_dims(tensor);
      stacked.slice_mut(s![i, .., ..h, ..w]).assign(tensor);
    }
    debug!("组装批次分块: {:?}", stacked.dim());

    img.push(stacked);
    img_metas.push(chunk.iter().map(|(_, meta)| meta.clone()).collect());
  }

  Ok(Batch { img, img_metas })
}

/// 第 k 个分块放到 `devices[k]` 上
pub fn scatter(batch: Batch, devices: &[Device]) -> Result<Vec<StagedBatch>, BatchError> {
  if batch.num_chunks() > devices.len() {
    return Err(BatchError::TooFewDevices {
      chunks: batch.num_chunks(),
      devices: devices.len(),
    });
  }

  Ok(
    batch
      .img
      .into_iter()
      .zip(batch.img_metas)
      .zip(devices)
      .map(|((img, img_metas), device)| StagedBatch {
        img: DeviceTensor::new(*device, img),
        img_metas,
      })
      .collect(),
  )
}

/// 把批次放到推理设备上：加速器走 `scatter` 取第一个分片，CPU 直接取出第一个分块
pub fn stage(batch: Batch, device: Device) -> Result<StagedBatch, BatchError> {
  match device {
    Device::Npu(_) => scatter(batch, &[device])?
      .into_iter()
      .next()
      .ok_or(BatchError::Empty),
    Device::Cpu => {
      let Batch { img, img_metas } = batch;
      match (img.into_iter().next(), img_metas.into_iter().next()) {
        (Some(img), Some(img_metas)) => Ok(StagedBatch {
          img: DeviceTensor::new(Device::Cpu, img),
          img_metas,
        }),
        _ => Err(BatchError::Empty),
      }
    }
  }
}
