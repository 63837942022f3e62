// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 推理任务：单张图像与目录批处理
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

use std::{
  fmt,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use tracing::{error, info, warn};

use crate::{
  batch::{StagedBatch, collate, stage},
  config::Config,
  device::Device,
  engine::{DetectionResult, Engine, build_engine},
  frame::Record,
  input::{is_image_path, scan},
  output::Render,
  pipeline::Compose,
};

const DEFAULT_SINGLE_OUTPUT: &str = "out.jpg";
const DEFAULT_BATCH_OUTPUT_DIR: &str = "result";

/// 准备好的推理环境：引擎、预处理链和设备在整个运行期间只读共享
pub struct Prepared {
  pub engine: Box<dyn Engine>,
  pub chain: Compose,
  pub device: Device,
}

/// 选择设备，创建引擎并加载权重，构建预处理链
pub fn prepare(config: &Config) -> anyhow::Result<Prepared> {
  let device = Device::select(config.device_preference()?)?;

  let mut engine = build_engine(&config.infer_engine)?;
  engine.model_mut().to_device(device)?;
  engine
    .model_mut()
    .load_weights(&config.weights.filepath)
    .with_context(|| format!("加载权重失败: {}", config.weights.filepath.display()))?;

  let chain = Compose::from_config(&config.data_pipeline)?;
  info!("推理环境就绪: 引擎 {}, 设备 {}, 预处理 {} 步", engine.name(), device, chain.len());

  Ok(Prepared { engine, chain, device })
}

/// 预处理单张图像并放置到设备上，得到大小为 1 的批次
pub fn preprocess(path: &Path, chain: &Compose, device: Device) -> anyhow::Result<StagedBatch> {
  let record = chain.apply(Record::new(path))?;
  let batch = collate(vec![record], 1)?;
  Ok(stage(batch, device)?)
}

/// 前向推理，取批次中唯一样本的结果
pub fn forward(staged: &StagedBatch, engine: &dyn Engine) -> anyhow::Result<DetectionResult> {
  engine
    .infer(&staged.img, &staged.img_metas)?
    .into_iter()
    .next()
    .ok_or_else(|| anyhow!("引擎 {} 未返回检测结果", engine.name()))
}

pub fn infer_one(
  path: &Path,
  chain: &Compose,
  device: Device,
  engine: &dyn Engine,
) -> anyhow::Result<DetectionResult> {
  let staged = preprocess(path, chain, device)?;
  forward(&staged, engine)
}

/// 按输入路径决定运行方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  SingleFile(PathBuf),
  Directory(PathBuf),
}

impl Mode {
  /// 扩展名属于图像扩展名时为单张模式，否则把路径当作目录
  pub fn from_input(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    if is_image_path(&path) {
      Mode::SingleFile(path)
    } else {
      Mode::Directory(path)
    }
  }
}

pub trait Task<O: Render>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: &Path, prepared: &Prepared, output: &O) -> Result<Self::Output, Self::Error>;
}

/// 单张图像：推理并把结果画到 `output`
#[derive(Debug, Clone)]
pub struct SingleFileTask {
  output: PathBuf,
}

impl Default for SingleFileTask {
  fn default() -> Self {
    Self {
      output: PathBuf::from(DEFAULT_SINGLE_OUTPUT),
    }
  }
}

impl SingleFileTask {
  pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
    self.output = output.into();
    self
  }

  pub fn output(&self) -> &Path {
    &self.output
  }
}

impl<O, RE> Task<O> for SingleFileTask
where
  RE: std::error::Error + Send + Sync + 'static,
  O: Render<Error = RE>,
{
  type Output = ();
  type Error = anyhow::Error;

  fn run_task(self, input: &Path, prepared: &Prepared, output: &O) -> Result<Self::Output, Self::Error> {
    info!("开始推理: {}", input.display());
    let result = infer_one(input, &prepared.chain, prepared.device, prepared.engine.as_ref())
      .with_context(|| format!("推理失败: {}", input.display()))?;
    info!("检测到 {} 个目标", result.num_detections());

    output
      .render_result(input, &result, &self.output)
      .with_context(|| format!("保存结果失败: {}", self.output.display()))?;
    info!("结果已保存到 {}", self.output.display());
    Ok(())
  }
}

/// 单张图像处理失败时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  /// 第一次失败即中止整个批次
  #[default]
  FailFast,
  /// 记录失败原因并继续处理后续图像
  SkipAndContinue,
}

/// 单张图像三个阶段的耗时
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemTiming {
  pub preprocess: Duration,
  pub forward: Duration,
  pub save: Duration,
}

impl ItemTiming {
  pub fn total(&self) -> Duration {
    self.preprocess + self.forward + self.save
  }
}

impl fmt::Display for ItemTiming {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "预处理: {:.4}s, 推理: {:.4}s, 保存: {:.4}s, 合计: {:.4}s",
      self.preprocess.as_secs_f64(),
      self.forward.as_secs_f64(),
      self.save.as_secs_f64(),
      self.total().as_secs_f64()
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
  Completed(ItemTiming),
  Failed(String),
}

impl ItemOutcome {
  pub fn is_completed(&self) -> bool {
    matches!(self, ItemOutcome::Completed(_))
  }
}

/// 各阶段耗时的累计值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingAccumulator {
  pub preprocess: Duration,
  pub forward: Duration,
  pub save: Duration,
  pub total: Duration,
}

impl TimingAccumulator {
  pub fn record(&mut self, timing: &ItemTiming) {
    self.preprocess += timing.preprocess;
    self.forward += timing.forward;
    self.save += timing.save;
    self.total += timing.total();
  }

  /// 平均值的除数是列出的图像数，而不是成功处理的图像数
  pub fn summarize(&self, listed: usize) -> Summary {
    if listed == 0 {
      return Summary::default();
    }
    let mean_total = self.total.as_secs_f64() / listed as f64;
    let throughput = if mean_total > 0.0 { 1.0 / mean_total } else { 0.0 };
    Summary { mean_total, throughput }
  }
}

/// 平均每张耗时（秒）与吞吐量（张/秒）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
  pub mean_total: f64,
  pub throughput: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
  pub items: Vec<(PathBuf, ItemOutcome)>,
  pub timing: TimingAccumulator,
  pub listed: usize,
}

impl RunReport {
  pub fn summary(&self) -> Summary {
    self.timing.summarize(self.listed)
  }

  pub fn completed(&self) -> usize {
    self.items.iter().filter(|(_, outcome)| outcome.is_completed()).count()
  }

  pub fn failed(&self) -> impl Iterator<Item = (&Path, &str)> {
    self.items.iter().filter_map(|(path, outcome)| match outcome {
      ItemOutcome::Failed(reason) => Some((path.as_path(), reason.as_str())),
      ItemOutcome::Completed(_) => None,
    })
  }
}

/// 目录批处理：结果按原文件名写入 `output_dir`
#[derive(Debug, Clone)]
pub struct BatchTask {
  output_dir: PathBuf,
  policy: FailurePolicy,
}

impl Default for BatchTask {
  fn default() -> Self {
    Self {
      output_dir: PathBuf::from(DEFAULT_BATCH_OUTPUT_DIR),
      policy: FailurePolicy::default(),
    }
  }
}

impl BatchTask {
  pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
    self.output_dir = output_dir.into();
    self
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  pub fn policy(&self) -> FailurePolicy {
    self.policy
  }

  /// 同名文件位于不同子目录时，后处理的会覆盖先处理的
  fn output_path(&self, source: &Path) -> PathBuf {
    match source.file_name() {
      Some(name) => self.output_dir.join(name),
      None => self.output_dir.join(source),
    }
  }

  fn process<O, RE>(&self, path: &Path, prepared: &Prepared, output: &O) -> anyhow::Result<ItemTiming>
  where
    RE: std::error::Error + Send + Sync + 'static,
    O: Render<Error = RE>,
  {
    let start = Instant::now();
    let staged = preprocess(path, &prepared.chain, prepared.device).context("预处理失败")?;
    let preprocessed = Instant::now();
    let result = forward(&staged, prepared.engine.as_ref()).context("推理失败")?;
    let forwarded = Instant::now();
    let target = self.output_path(path);
    output
      .render_result(path, &result, &target)
      .with_context(|| format!("保存结果失败: {}", target.display()))?;
    let saved = Instant::now();

    Ok(ItemTiming {
      preprocess: preprocessed - start,
      forward: forwarded - preprocessed,
      save: saved - forwarded,
    })
  }
}

impl<O, RE> Task<O> for BatchTask
where
  RE: std::error::Error + Send + Sync + 'static,
  O: Render<Error = RE>,
{
  type Output = RunReport;
  type Error = anyhow::Error;

  fn run_task(self, input: &Path, prepared: &Prepared, output: &O) -> Result<Self::Output, Self::Error> {
    info!("扫描目录: {}", input.display());
    let mut files = scan(input).with_context(|| format!("扫描目录失败: {}", input.display()))?;
    files.sort();

    let mut report = RunReport {
      listed: files.len(),
      ..RunReport::default()
    };
    if files.is_empty() {
      warn!("目录 {} 下没有可处理的图像", input.display());
      return Ok(report);
    }
    info!("共 {} 张图像, 结果写入 {}", files.len(), self.output_dir.display());

    for (index, path) in files.into_iter().enumerate() {
      match self.process(&path, prepared, output) {
        Ok(timing) => {
          info!("[{}/{}] {} {}", index + 1, report.listed, path.display(), timing);
          report.timing.record(&timing);
          report.items.push((path, ItemOutcome::Completed(timing)));
        }
        Err(err) if self.policy == FailurePolicy::SkipAndContinue => {
          warn!("[{}/{}] 跳过 {}: {:#}", index + 1, report.listed, path.display(), err);
          report.items.push((path, ItemOutcome::Failed(format!("{:#}", err))));
        }
        Err(err) => {
          error!("[{}/{}] 处理 {} 失败, 中止批处理", index + 1, report.listed, path.display());
          return Err(err.context(format!("处理图像失败: {}", path.display())));
        }
      }
    }

    let summary = report.summary();
    info!("平均耗时: {:.4}s/张", summary.mean_total);
    info!("吞吐量: {:.2} 张/秒", summary.throughput);
    let skipped = report.listed - report.completed();
    if skipped > 0 {
      warn!("{} 张图像处理失败", skipped);
    }
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{engine::StubEngine, frame::ImageMeta};
  use ndarray::Array3;
  use tempfile::NamedTempFile;

  fn secs(s: u64) -> ItemTiming {
    ItemTiming {
      preprocess: Duration::from_millis(s * 250),
      forward: Duration::from_millis(s * 500),
      save: Duration::from_millis(s * 250),
    }
  }

  #[test]
  fn aggregate_mean_and_throughput() {
    let mut acc = TimingAccumulator::default();
    for s in [1, 2, 3] {
      acc.record(&secs(s));
    }
    assert_eq!(acc.total, Duration::from_secs(6));
    assert_eq!(acc.forward, Duration::from_secs(3));

    let summary = acc.summarize(3);
    assert!((summary.mean_total - 2.0).abs() < 1e-9);
    assert!((summary.throughput - 0.5).abs() < 1e-9);
  }

  #[test]
  fn timing_line_includes_total() {
    let line = secs(2).to_string();
    assert_eq!(line, "预处理: 0.5000s, 推理: 1.0000s, 保存: 0.5000s, 合计: 2.0000s");
  }

  #[test]
  fn sample_stub_config_prepares() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/stub.json");
    let config = Config::from_file(&path).unwrap();
    let prepared = prepare(&config).unwrap();
    assert_eq!(prepared.engine.name(), "StubEngine");
    assert_eq!(prepared.chain.len(), 6);
  }

  #[test]
  fn empty_run_reports_zero() {
    let summary = TimingAccumulator::default().summarize(0);
    assert_eq!(summary, Summary::default());
    assert_eq!(summary.throughput, 0.0);
    assert_eq!(RunReport::default().summary().mean_total, 0.0);
  }

  #[test]
  fn divisor_is_listed_count() {
    let mut acc = TimingAccumulator::default();
    acc.record(&secs(2));
    let summary = acc.summarize(2);
    assert!((summary.mean_total - 1.0).abs() < 1e-9);
  }

  #[test]
  fn dispatch_by_extension() {
    assert_eq!(Mode::from_input("a/b.png"), Mode::SingleFile(PathBuf::from("a/b.png")));
    assert_eq!(Mode::from_input("x.jpeg"), Mode::SingleFile(PathBuf::from("x.jpeg")));
    assert_eq!(Mode::from_input("images"), Mode::Directory(PathBuf::from("images")));
    assert_eq!(Mode::from_input("b.PNG"), Mode::Directory(PathBuf::from("b.PNG")));
    assert_eq!(Mode::from_input("clip.mp4"), Mode::Directory(PathBuf::from("clip.mp4")));
  }

  #[test]
  fn batch_output_keeps_file_name() {
    let task = BatchTask::default();
    assert_eq!(task.output_dir(), Path::new("result"));
    assert_eq!(task.policy(), FailurePolicy::FailFast);
    assert_eq!(task.output_path(Path::new("data/sub/a.jpg")), PathBuf::from("result/a.jpg"));
    assert_eq!(SingleFileTask::default().output(), Path::new("out.jpg"));
  }

  #[test]
  fn staging_path_does_not_change_result() {
    let weights = NamedTempFile::new().unwrap();
    let canned = DetectionResult::from_rows(&[vec![vec![1.0, 2.0, 3.0, 4.0, 0.9]], vec![]]).unwrap();
    let mut engine = StubEngine::new(canned.clone());
    engine.model_mut().load_weights(weights.path()).unwrap();

    let mut record = Record::new("a.png");
    record.tensor = Some(Array3::from_shape_fn((3, 4, 5), |(c, h, w)| (c * 100 + h * 10 + w) as f32));
    record.meta = Some(ImageMeta::new("a.png", (4, 5, 3)));
    let batch = collate(vec![record], 1).unwrap();

    let cpu = stage(batch.clone(), Device::Cpu).unwrap();
    let npu = stage(batch, Device::Npu(0)).unwrap();
    assert_eq!(cpu.img.view(), npu.img.view());
    assert_eq!(cpu.img_metas, npu.img_metas);
    assert_eq!(forward(&cpu, &engine).unwrap(), forward(&npu, &engine).unwrap());
    assert_eq!(forward(&cpu, &engine).unwrap(), canned);
  }
}
