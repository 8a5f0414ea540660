// 该文件是 Maodian （锚点） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;
use url::Url;

use maodian::transform::{TransformMode, ViewSize};

/// Maodian 场景回放参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 场景文件，例如 scenario:///path/to/scenario.json
  #[arg(long, value_name = "SCENARIO")]
  pub scenario: Url,

  /// 锚点存储
  /// 支持:
  /// - memory: 进程内存储
  /// - file:///path/to/anchors.jsonl 文件存储
  #[arg(long, default_value = "memory:", value_name = "STORE")]
  pub store: Url,

  /// 自动模式：每批检测结果都尝试放置
  #[arg(long)]
  pub auto: bool,

  /// 视图尺寸，例如 1080x1920；不指定时使用场景中的设置
  #[arg(long, value_name = "WxH")]
  pub view: Option<ViewSize>,

  /// 坐标变换方式 (cover | rotation-aware)
  #[arg(long, default_value = "cover", value_name = "MODE")]
  pub transform: TransformMode,

  /// 无命中时沿射线放置的深度（米）
  #[arg(long, default_value = "0.7", value_name = "METERS")]
  pub fallback_depth: f32,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 每帧等待推理结果的最长时间（毫秒），0 表示不等待
  #[arg(long, default_value = "200", value_name = "MILLIS")]
  pub result_timeout_ms: u64,

  /// 模拟渲染节点挂载耗时（毫秒）
  #[arg(long, default_value = "0", value_name = "MILLIS")]
  pub render_delay_ms: u64,
}
