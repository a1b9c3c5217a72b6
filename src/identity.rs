//! 调用方身份再校验
//!
//! 会话签发属于外部身份服务；网关完成认证后把身份信息放在
//! 请求头里透传进来。这里只负责再校验（格式、角色取值），
//! 绝不签发或刷新任何凭证。

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::role::ActorRole;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_TENANT_HEADER: &str = "x-actor-tenant";
pub const ACTOR_PERMISSIONS_HEADER: &str = "x-actor-permissions";

/// 当前调用方身份
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub actor_id: Uuid,
    pub role: ActorRole,
    pub tenant_id: Option<Uuid>,
    pub permissions: Vec<String>,
}

impl ActorContext {
    /// 角色等级不低于 min 才放行
    pub fn require_role(&self, min: ActorRole) -> Result<(), AppError> {
        if self.role.rank() < min.rank() {
            tracing::warn!(
                actor_id = %self.actor_id,
                role = %self.role.as_str(),
                required = %min.as_str(),
                "Permission denied"
            );
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    pub fn is_top_tier(&self) -> bool {
        self.role.is_top_tier()
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor_id = header_str(parts, ACTOR_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(AppError::Unauthorized)?;

        let role = header_str(parts, ACTOR_ROLE_HEADER)
            .and_then(ActorRole::parse)
            .ok_or(AppError::Unauthorized)?;

        // 租户头可缺省（顶层运维角色没有租户）
        let tenant_id = match header_str(parts, ACTOR_TENANT_HEADER) {
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| AppError::Unauthorized)?),
            None => None,
        };

        let permissions = header_str(parts, ACTOR_PERMISSIONS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ActorContext {
            actor_id,
            role,
            tenant_id,
            permissions,
        })
    }
}
