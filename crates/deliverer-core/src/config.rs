//! Manager 与分帧规则的声明式配置。
//!
//! # 教案级注释
//!
//! ## 契约（What）
//! - [`ManagerConfig`]：派发模式与派发线程名，缺省值与工厂默认一致（事件切换到派发上下文）；
//! - [`PacketRuleConfig`]：以 `kind` 标签区分四种参考分帧规则，`build` 生成规则实例；
//! - 所有配置都可以从 TOML 片段解析，未填写的字段使用缺省值。
//!
//! ## 注意事项（Trade-offs）
//! - 配置只描述策略选择，不负责传输地址等介质参数，后者由各传输 crate 自己的配置类型承担。

use serde::Deserialize;

use crate::error::{DelivererError, Result};
use crate::packet_rule::{
    DEFAULT_MAX_FRAME_SIZE, Endian, FixedLengthRule, HeaderWidth, NoDivisionRule, PacketRule,
    SizeBodyRule, TerminateRule,
};

/// 缺省派发线程名。
pub const DEFAULT_DISPATCH_THREAD_NAME: &str = "deliverer-dispatch";

/// Manager 行为配置。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// `true` 时事件切换到派发上下文执行；`false` 时在产生事件的 I/O 上下文中直接调用回调。
    pub event_on_dispatch_context: bool,
    /// 未显式提供派发队列时，内置派发线程使用的名字。
    pub dispatch_thread_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_on_dispatch_context: true,
            dispatch_thread_name: DEFAULT_DISPATCH_THREAD_NAME.to_owned(),
        }
    }
}

impl ManagerConfig {
    /// 直接派发：回调在 I/O 上下文中执行。
    pub fn direct() -> Self {
        Self {
            event_on_dispatch_context: false,
            ..Self::default()
        }
    }

    pub fn with_event_on_dispatch_context(mut self, enabled: bool) -> Self {
        self.event_on_dispatch_context = enabled;
        self
    }

    pub fn with_dispatch_thread_name(mut self, name: impl Into<String>) -> Self {
        self.dispatch_thread_name = name.into();
        self
    }

    /// 解析 TOML 文本。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| DelivererError::Config {
            detail: err.to_string().into(),
        })
    }
}

/// 分帧规则选择。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketRuleConfig {
    SizeBody {
        #[serde(default = "default_header_width")]
        header_width: HeaderWidth,
        #[serde(default)]
        endian: Endian,
        #[serde(default = "default_max_frame_size")]
        max_frame_size: usize,
    },
    Terminate {
        #[serde(default = "default_terminator")]
        terminator: String,
        #[serde(default = "default_max_frame_size")]
        max_frame_size: usize,
    },
    FixedLength {
        frame_size: usize,
    },
    NoDivision {
        #[serde(default = "default_max_frame_size")]
        max_frame_size: usize,
    },
}

fn default_header_width() -> HeaderWidth {
    HeaderWidth::Four
}

fn default_terminator() -> String {
    "\n".to_owned()
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for PacketRuleConfig {
    fn default() -> Self {
        PacketRuleConfig::SizeBody {
            header_width: default_header_width(),
            endian: Endian::Big,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl PacketRuleConfig {
    /// 解析 TOML 文本。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| DelivererError::Config {
            detail: err.to_string().into(),
        })
    }

    /// 生成规则实例。
    pub fn build(&self) -> Result<Box<dyn PacketRule>> {
        let rule: Box<dyn PacketRule> = match self {
            PacketRuleConfig::SizeBody {
                header_width,
                endian,
                max_frame_size,
            } => Box::new(
                SizeBodyRule::new()
                    .with_header_width(*header_width)
                    .with_endian(*endian)
                    .with_max_frame_size(*max_frame_size),
            ),
            PacketRuleConfig::Terminate {
                terminator,
                max_frame_size,
            } => {
                if terminator.is_empty() {
                    return Err(DelivererError::Config {
                        detail: "terminate rule requires a non-empty terminator".into(),
                    });
                }
                Box::new(
                    TerminateRule::new(terminator.as_bytes().to_vec())
                        .with_max_frame_size(*max_frame_size),
                )
            }
            PacketRuleConfig::FixedLength { frame_size } => {
                if *frame_size == 0 {
                    return Err(DelivererError::Config {
                        detail: "fixed length rule requires frame_size > 0".into(),
                    });
                }
                Box::new(FixedLengthRule::new(*frame_size))
            }
            PacketRuleConfig::NoDivision { max_frame_size } => {
                Box::new(NoDivisionRule::new().with_max_frame_size(*max_frame_size))
            }
        };
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_factory_defaults() {
        let config = ManagerConfig::from_toml_str("").expect("parse");
        assert_eq!(config, ManagerConfig::default());
        assert!(config.event_on_dispatch_context);
        assert_eq!(config.dispatch_thread_name, "deliverer-dispatch");
    }

    #[test]
    fn direct_mode_is_parsed() {
        let config =
            ManagerConfig::from_toml_str("event_on_dispatch_context = false").expect("parse");
        assert!(!config.event_on_dispatch_context);
    }

    #[test]
    fn unknown_field_is_a_config_error() {
        let err = ManagerConfig::from_toml_str("bogus = 1").expect_err("unknown field");
        assert_eq!(err.code(), crate::error::codes::CONFIG_INVALID);
    }

    #[test]
    fn packet_rule_variants_build() {
        let size_body = PacketRuleConfig::from_toml_str(
            "kind = \"size_body\"\nheader_width = \"two\"\nendian = \"little\"\nmax_frame_size = 64",
        )
        .expect("parse");
        let rule = size_body.build().expect("build");
        assert_eq!(rule.name(), "size_body");
        assert_eq!(rule.max_frame_size(), 64);

        let terminate =
            PacketRuleConfig::from_toml_str("kind = \"terminate\"\nterminator = \"\\r\\n\"")
                .expect("parse");
        assert_eq!(terminate.build().expect("build").name(), "terminate");

        let fixed = PacketRuleConfig::from_toml_str("kind = \"fixed_length\"\nframe_size = 16")
            .expect("parse");
        assert_eq!(fixed.build().expect("build").max_frame_size(), 16);
    }

    #[test]
    fn zero_fixed_length_is_rejected() {
        let fixed = PacketRuleConfig::FixedLength { frame_size: 0 };
        assert!(matches!(fixed.build(), Err(DelivererError::Config { .. })));
    }
}
