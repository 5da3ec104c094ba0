//! 引擎配置
//!
//! 启动时构造一次，以引用方式传给各组件；核心代码只读不写。

use serde::Deserialize;
use crate::common::Result;

/// 缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingLevel {
    /// 解锁即释放
    None,
    /// 保留最近使用的已解锁 pack，超过阈值时淘汰
    Normal,
    /// 只要内存允许就不淘汰
    Aggressive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 缓存中最多保留的 pack 数
    pub cache_max_packs:         usize,
    /// 超过 `cache_max_packs` 时一次淘汰到该比例（百分比）
    pub cache_release_threshold: u8,
    pub caching_level:           CachingLevel,
    /// 0 = 不压缩；1 = 标准编码；>= 2 时浮点/原始字节再尝试 LZ4
    pub compression_level:       u8,
    pub load_threads:            usize,
    pub query_threads:           usize,
    /// 异步 join 每一步处理的 pack 数
    pub join_step_sizes:         Vec<u32>,
    /// 是否创建 bloom / cmap / hist 过滤器目录
    pub enable_filters:          bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_max_packs:         1024,
            cache_release_threshold: 75,
            caching_level:           CachingLevel::Normal,
            compression_level:       2,
            load_threads:            4,
            query_threads:           4,
            join_step_sizes:         vec![16, 64, 256],
            enable_filters:          true,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 片段构造，缺省字段取默认值
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        log::debug!("engine config loaded: {cfg:?}");
        Ok(cfg)
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression_level > 0
    }

    pub fn lz4_enabled(&self) -> bool {
        self.compression_level >= 2
    }

    /// 淘汰后缓存应降到的 pack 数
    pub fn cache_low_watermark(&self) -> usize {
        self.cache_max_packs * self.cache_release_threshold.min(100) as usize / 100
    }
}
