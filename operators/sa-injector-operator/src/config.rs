//! 配置管理模块
//!
//! 配置按以下顺序叠加：内置默认值 → 可选的 YAML/JSON 配置文件 →
//! `SA_INJECTOR_` 前缀的环境变量 → 命令行参数。

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File, FileFormat};
use sa_injector_common::error::IntoError;
use sa_injector_common::{
    Error, Result, INITIALIZER_NAME, SECRET_MOUNT_ROOT, SERVICE_ACCOUNT_ANNOTATION,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 监听的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// core/v1 Pod
    Pod,
    /// apps/v1 Deployment
    Deployment,
}

/// 初始化器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializerConfig {
    /// 本组件在初始化器队列中的名称
    pub initializer_name: String,
    /// 携带 Secret 名称的注解键
    pub annotation: String,
    /// Secret 挂载根目录
    pub secret_mount_root: String,
    /// 监听的资源类型
    pub kind: WorkloadKind,
    /// 重新同步周期（秒）
    pub resync_period_secs: u64,
    /// 补丁提交超时（秒）
    pub patch_timeout_secs: u64,
    /// 补丁请求的 fieldManager
    pub field_manager: String,
    /// 日志级别
    pub log_level: String,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            initializer_name: INITIALIZER_NAME.to_string(),
            annotation: SERVICE_ACCOUNT_ANNOTATION.to_string(),
            secret_mount_root: SECRET_MOUNT_ROOT.to_string(),
            kind: WorkloadKind::Pod,
            resync_period_secs: 30,
            patch_timeout_secs: 10,
            field_manager: "sa-injector".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl InitializerConfig {
    /// 加载配置，`path` 为可选的配置文件
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("initializer_name", defaults.initializer_name)
            .and_then(|b| b.set_default("annotation", defaults.annotation))
            .and_then(|b| b.set_default("secret_mount_root", defaults.secret_mount_root))
            .and_then(|b| b.set_default("kind", "pod"))
            .and_then(|b| b.set_default("resync_period_secs", defaults.resync_period_secs))
            .and_then(|b| b.set_default("patch_timeout_secs", defaults.patch_timeout_secs))
            .and_then(|b| b.set_default("field_manager", defaults.field_manager))
            .and_then(|b| b.set_default("log_level", defaults.log_level))
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(path) = path {
            let config_file = path
                .to_str()
                .ok_or_else(|| Error::Config(format!("配置路径无效: {}", path.display())))?;

            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return "不支持的配置文件格式，仅支持 YAML 或 JSON".into_error(Error::Config),
            };
            builder = builder.add_source(File::with_name(config_file).format(format));
        }

        let config = builder
            .add_source(Environment::with_prefix("SA_INJECTOR").try_parsing(true))
            .build()
            .map_err(|e| Error::Config(format!("构建配置失败: {e}")))?
            .try_deserialize::<Self>()
            .map_err(|e| Error::Config(format!("配置格式错误: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.initializer_name.trim().is_empty() {
            return "initializer_name 不能为空".into_error(Error::Config);
        }
        if self.annotation.trim().is_empty() {
            return "annotation 不能为空".into_error(Error::Config);
        }
        if !self.secret_mount_root.starts_with('/') {
            return format!("secret_mount_root 必须是绝对路径: {}", self.secret_mount_root)
                .into_error(Error::Config);
        }
        if self.resync_period_secs == 0 {
            return "resync_period_secs 必须大于 0".into_error(Error::Config);
        }
        if self.patch_timeout_secs == 0 {
            return "patch_timeout_secs 必须大于 0".into_error(Error::Config);
        }
        Ok(())
    }

    /// 重新同步周期
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// 补丁提交超时
    pub fn patch_timeout(&self) -> Duration {
        Duration::from_secs(self.patch_timeout_secs)
    }
}

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "sa-injector")]
#[command(version)]
#[command(about = "Injects GCP service account credentials into uninitialized workloads", long_about = None)]
pub struct Cli {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(long, env = "SA_INJECTOR_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// 监听的资源类型
    #[arg(long, value_enum)]
    pub kind: Option<WorkloadKind>,

    /// 携带 Secret 名称的注解键
    #[arg(long)]
    pub annotation: Option<String>,

    /// 日志级别
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// 加载配置并应用命令行覆盖
    pub fn load_config(&self) -> Result<InitializerConfig> {
        let mut config = InitializerConfig::load(self.config.as_deref())?;

        if let Some(kind) = self.kind {
            config.kind = kind;
        }
        if let Some(annotation) = &self.annotation {
            config.annotation = annotation.clone();
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}
