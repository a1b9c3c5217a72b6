//! Role domain model
//! 角色与权限等级由外部身份服务签发，这里只做再校验与比较

use serde::{Deserialize, Serialize};

/// 系统角色，按权限从低到高排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Student,
    Instructor,
    Registrar,
    TenantAdmin,
    Operator,
    #[serde(rename = "SUPERADMIN")]
    SuperAdmin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Student => "STUDENT",
            ActorRole::Instructor => "INSTRUCTOR",
            ActorRole::Registrar => "REGISTRAR",
            ActorRole::TenantAdmin => "TENANT_ADMIN",
            ActorRole::Operator => "OPERATOR",
            ActorRole::SuperAdmin => "SUPERADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STUDENT" => Some(ActorRole::Student),
            "INSTRUCTOR" => Some(ActorRole::Instructor),
            "REGISTRAR" => Some(ActorRole::Registrar),
            "TENANT_ADMIN" => Some(ActorRole::TenantAdmin),
            "OPERATOR" => Some(ActorRole::Operator),
            "SUPERADMIN" => Some(ActorRole::SuperAdmin),
            _ => None,
        }
    }

    /// 权限等级，用于 "X 及以上" 判断
    pub fn rank(&self) -> u8 {
        match self {
            ActorRole::Student => 0,
            ActorRole::Instructor => 1,
            ActorRole::Registrar => 2,
            ActorRole::TenantAdmin => 3,
            ActorRole::Operator => 4,
            ActorRole::SuperAdmin => 5,
        }
    }

    /// 顶层运维角色（可见 GLOBAL 审计条目）
    pub fn is_top_tier(&self) -> bool {
        self.rank() >= ActorRole::Operator.rank()
    }
}
