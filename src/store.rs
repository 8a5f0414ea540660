// 该文件是 Maodian （锚点） 项目的一部分。
// src/store.rs - 锚点位姿的持久化存储
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

//! 持久化记录只追加，不删除也不修改。
//!
//! 支持的 URL：
//! - `memory:` 进程内存储，会话结束即丢失
//! - `file:///path/to/anchors.jsonl` 每行一条 JSON 记录

use std::{
  fs::OpenOptions,
  io::{BufRead, BufReader, Write},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, pose::WorldPose};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 与渲染节点无关的锚点持久化表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAnchorRecord {
  pub id: String,
  pub pose: WorldPose,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

pub trait AnchorStore {
  fn load_records(&self) -> Result<Vec<PersistedAnchorRecord>, StoreError>;
  fn append_record(&mut self, record: &PersistedAnchorRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryAnchorStore {
  records: Vec<PersistedAnchorRecord>,
}

impl MemoryAnchorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_records(records: Vec<PersistedAnchorRecord>) -> Self {
    Self { records }
  }

  pub fn records(&self) -> &[PersistedAnchorRecord] {
    &self.records
  }
}

impl AnchorStore for MemoryAnchorStore {
  fn load_records(&self) -> Result<Vec<PersistedAnchorRecord>, StoreError> {
    Ok(self.records.clone())
  }

  fn append_record(&mut self, record: &PersistedAnchorRecord) -> Result<(), StoreError> {
    self.records.push(record.clone());
    Ok(())
  }
}

impl FromUrlWithScheme for MemoryAnchorStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryAnchorStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch);
    }
    Ok(Self::new())
  }
}

/// JSON Lines 文件存储
#[derive(Debug, Clone)]
pub struct JsonLinesAnchorStore {
  path: PathBuf,
}

impl JsonLinesAnchorStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl AnchorStore for JsonLinesAnchorStore {
  fn load_records(&self) -> Result<Vec<PersistedAnchorRecord>, StoreError> {
    let file = match std::fs::File::open(&self.path) {
      Ok(file) => file,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!("存储文件 {} 不存在，视为空", self.path.display());
        return Ok(Vec::new());
      }
      Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<PersistedAnchorRecord>(&line) {
        Ok(record) => records.push(record),
        Err(e) => warn!("跳过第 {} 行无法解析的锚点记录: {}", index + 1, e),
      }
    }
    info!("从 {} 读取 {} 条锚点记录", self.path.display(), records.len());
    Ok(records)
  }

  fn append_record(&mut self, record: &PersistedAnchorRecord) -> Result<(), StoreError> {
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
    file.write_all(line.as_bytes())?;
    debug!("追加锚点记录 {} 到 {}", record.id, self.path.display());
    Ok(())
  }
}

impl FromUrlWithScheme for JsonLinesAnchorStore {
  const SCHEME: &'static str = "file";
}

impl FromUrl for JsonLinesAnchorStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

/// 按 URL 方案选择的存储
#[derive(Debug, Clone)]
pub enum StoreWrapper {
  Memory(MemoryAnchorStore),
  JsonLines(JsonLinesAnchorStore),
}

impl FromUrl for StoreWrapper {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      MemoryAnchorStore::SCHEME => Ok(StoreWrapper::Memory(MemoryAnchorStore::from_url(url)?)),
      JsonLinesAnchorStore::SCHEME => Ok(StoreWrapper::JsonLines(JsonLinesAnchorStore::from_url(url)?)),
      _ => Err(StoreError::SchemeMismatch),
    }
  }
}

impl AnchorStore for StoreWrapper {
  fn load_records(&self) -> Result<Vec<PersistedAnchorRecord>, StoreError> {
    match self {
      StoreWrapper::Memory(store) => store.load_records(),
      StoreWrapper::JsonLines(store) => store.load_records(),
    }
  }

  fn append_record(&mut self, record: &PersistedAnchorRecord) -> Result<(), StoreError> {
    match self {
      StoreWrapper::Memory(store) => store.append_record(record),
      StoreWrapper::JsonLines(store) => store.append_record(record),
    }
  }
}
