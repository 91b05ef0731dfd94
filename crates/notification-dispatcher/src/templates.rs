//! 通知默认文案
//!
//! 调用方未提供标题或正文时，按部署配置的语言填充固定文案。

use std::fmt;
use std::str::FromStr;

/// 部署语言
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    Th,
}

impl Locale {
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Th => "th",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    /// 接受 "en" / "th" 以及带地区后缀的写法（如 "th-TH"、"en_US"）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let language = s
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match language.as_str() {
            "en" => Ok(Self::En),
            "th" => Ok(Self::Th),
            _ => Err(format!("不支持的语言: {s}")),
        }
    }
}

/// 默认通知文案
pub struct NotificationTemplates;

impl NotificationTemplates {
    /// 默认标题
    pub fn default_title(locale: Locale) -> &'static str {
        match locale {
            Locale::En => "New job application",
            Locale::Th => "มีผู้สมัครงานใหม่",
        }
    }

    /// 默认正文
    pub fn default_body(locale: Locale) -> &'static str {
        match locale {
            Locale::En => "A dentist has applied for your job posting.",
            Locale::Th => "มีผู้สมัครงานใหม่สำหรับงานของคุณ",
        }
    }

    /// 取调用方文案，缺失或为空字符串时使用默认值
    pub fn or_default(value: Option<&str>, default: &'static str) -> String {
        match value {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default.to_string(),
        }
    }
}
