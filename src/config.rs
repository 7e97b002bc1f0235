//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WREN__*` 覆盖（双下划线表示嵌套，如 `WREN__BRIDGE__TIMEOUT_SECONDS=20`）。
//! 配置在进程启动时加载一次，之后只读；解析或校验失败时直接终止启动，不回退到默认值。

use std::path::PathBuf;

use serde::Deserialize;

use crate::filter::FilterPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub bridge: BridgeSection,
    /// [calendar] 段直接反序列化为过滤策略
    pub calendar: FilterPolicy,
}

/// [app] 段：应用名、单轮最大规划步数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单次用户输入内最多规划几步（防止 Planner 无限调用工具）
    pub max_steps: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_steps: 12,
        }
    }
}

/// [llm] 段：后端选择；API Key 只从环境变量读取，不允许写在配置文件里
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名；未设置时按 provider 取默认值
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            api_key_env: None,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn api_key_var(&self) -> String {
        if let Some(name) = &self.api_key_env {
            return name.clone();
        }
        match self.provider.to_lowercase().as_str() {
            "deepseek" => "DEEPSEEK_API_KEY".to_string(),
            _ => "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [bridge] 段：脚本解释器与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// 脚本解释器，macOS 上为 osascript
    pub interpreter: PathBuf,
    /// 传入脚本文本的参数，osascript 为 -e
    pub script_flag: String,
    /// 单次脚本执行的墙钟超时（秒）
    pub timeout_seconds: u64,
    /// 为 true 时调用方可拿到渲染后的脚本与原始输出
    pub debug: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("osascript"),
            script_flag: "-e".to_string(),
            timeout_seconds: 15,
            debug: false,
        }
    }
}

impl AppConfig {
    /// 启动期校验；任何一项不合法都视为配置错误
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.app.max_steps == 0 {
            return Err(config::ConfigError::Message(
                "app.max_steps must be at least 1".to_string(),
            ));
        }
        if self.bridge.timeout_seconds == 0 {
            return Err(config::ConfigError::Message(
                "bridge.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.bridge.script_flag.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "bridge.script_flag must not be empty".to_string(),
            ));
        }
        self.calendar
            .validate()
            .map_err(config::ConfigError::Message)
    }
}

/// 从 config 目录加载配置，环境变量 WREN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则该文件必须存在（显式指定的文件缺失也算启动错误）
/// 3. 最后叠加环境变量 WREN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WREN")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("calendar.enabled_calendars")
            .with_list_parse_key("calendar.disabled_calendars")
            .with_list_parse_key("calendar.skip_patterns")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
