use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub role: String,
}

/// Every school-scoped read or write goes through here.
pub fn verify_tenant(actor: &Actor, resource_school_id: &str) -> CoreResult<()> {
    if actor.school_id == resource_school_id {
        return Ok(());
    }
    warn!(
        actor_id = %actor.id,
        actor_school_id = %actor.school_id,
        resource_school_id,
        "cross-tenant access rejected"
    );
    Err(CoreError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(school: &str) -> Actor {
        Actor {
            id: "u1".to_string(),
            school_id: school.to_string(),
            name: "Head Teacher".to_string(),
            role: "admin".to_string(),
        }
    }

    #[test]
    fn same_school_is_allowed() {
        assert!(verify_tenant(&actor("s1"), "s1").is_ok());
    }

    #[test]
    fn other_school_is_unauthorized() {
        let e = verify_tenant(&actor("s1"), "s2").unwrap_err();
        assert_eq!(e.code(), "unauthorized");
    }
}
