// 该文件是 Beifeng （北风） 项目的一部分。
// src/main.rs - 检测推理命令行入口
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use beifeng::{
  BatchTask, Config, Mode, SingleFileTask,
  output::SaveImageFileOutput,
  task::{FailurePolicy, Task, prepare},
};

/// Beifeng 检测推理：对单张图像或整个目录运行检测并保存可视化结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（JSON）
  #[arg(value_name = "CONFIG")]
  pub config: PathBuf,
  /// 输入图像或目录，扩展名为 .jpg/.jpeg/.webp/.bmp/.png 时按单张图像处理
  #[arg(value_name = "IMGNAME")]
  pub imgname: PathBuf,
  /// 单张模式的输出文件
  #[arg(long, default_value = "out.jpg", value_name = "FILE")]
  pub output: PathBuf,
  /// 目录模式的输出目录
  #[arg(long, default_value = "result", value_name = "DIR")]
  pub output_dir: PathBuf,
  /// 目录模式下跳过处理失败的图像继续运行
  #[arg(long)]
  pub keep_going: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输入: {}", args.imgname.display());

  let config = Config::from_file(&args.config)?;
  let prepared = prepare(&config)?;
  let output = SaveImageFileOutput::from_config(&config)?;

  match Mode::from_input(args.imgname) {
    Mode::SingleFile(path) => {
      SingleFileTask::default()
        .with_output(args.output)
        .run_task(&path, &prepared, &output)?;
    }
    Mode::Directory(root) => {
      let policy = if args.keep_going {
        FailurePolicy::SkipAndContinue
      } else {
        FailurePolicy::FailFast
      };
      let report = BatchTask::default()
        .with_output_dir(args.output_dir)
        .with_policy(policy)
        .run_task(&root, &prepared, &output)?;
      info!("完成 {}/{} 张图像", report.completed(), report.listed);
    }
  }

  Ok(())
}
