//! 日历可见性过滤策略
//!
//! 启动时从 [calendar] 段加载一次，之后只读。Bridge 在每次枚举日历（列出日历 / 列出事件 / 搜索事件）时
//! 都会按此策略排除噪音日历（节假日、生日、Siri 建议等）。
//!
//! 判定顺序固定为：skip_patterns（不区分大小写的子串）→ disabled_calendars → enabled_calendars → default_enabled。
//! 也就是说 skip pattern 优先于显式启用：名字命中 skip pattern 的日历即使写进 enabled_calendars 也不会显示。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 日历过滤策略（集合用 BTreeSet，保证渲染脚本时顺序稳定）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    /// 非空时只显示其中的日历（skip pattern 仍然优先）
    pub enabled_calendars: BTreeSet<String>,
    /// 精确匹配即隐藏
    pub disabled_calendars: BTreeSet<String>,
    /// enabled_calendars 为空时未命中任何规则的日历是否显示
    pub default_enabled: bool,
    /// 不区分大小写的子串匹配，命中即隐藏
    pub skip_patterns: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            enabled_calendars: BTreeSet::new(),
            disabled_calendars: ["Holiday", "Birthday", "Siri Suggestions"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_enabled: true,
            skip_patterns: vec!["Holiday".into(), "Birthday".into(), "Siri".into()],
        }
    }
}

/// 单个日历的判定结果及原因，用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    SkipPattern,
    Disabled,
    Enabled,
    NotInEnabledSet,
    Default(bool),
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        match self {
            Visibility::Enabled => true,
            Visibility::Default(v) => v,
            _ => false,
        }
    }
}

impl FilterPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(i) = self.skip_patterns.iter().position(|p| p.trim().is_empty()) {
            return Err(format!("calendar.skip_patterns[{i}] must not be empty"));
        }
        if let Some(name) = self
            .enabled_calendars
            .intersection(&self.disabled_calendars)
            .next()
        {
            return Err(format!(
                "calendar '{name}' is listed in both enabled_calendars and disabled_calendars"
            ));
        }
        Ok(())
    }

    /// 按固定顺序判定，返回命中的规则
    pub fn classify(&self, name: &str) -> Visibility {
        let lower = name.to_lowercase();
        if self
            .skip_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
        {
            return Visibility::SkipPattern;
        }
        if self.disabled_calendars.contains(name) {
            return Visibility::Disabled;
        }
        if self.enabled_calendars.contains(name) {
            return Visibility::Enabled;
        }
        if !self.enabled_calendars.is_empty() {
            return Visibility::NotInEnabledSet;
        }
        Visibility::Default(self.default_enabled)
    }

    pub fn is_calendar_visible(&self, name: &str) -> bool {
        self.classify(name).is_visible()
    }

    /// 小写后的 skip pattern，供脚本渲染使用（脚本端同样做不区分大小写的包含判断）
    pub fn lowercase_skip_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.skip_patterns.iter().map(|p| p.to_lowercase()).collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }
}
