/// Guild Engine — Permission Model
///
/// Pure checks over roles. Authority is a strict order: a role may only
/// act on roles with strictly lower authority.

use crate::domain::{GuildPerms, Role, RoleId, FOUNDER_ROLE_ID, MEMBER_ROLE_ID};
use crate::error::GuildError;

/// True when `role` holds *all* bits of `perms`.
pub fn has_permission(role: &Role, perms: GuildPerms) -> bool {
    role.permissions.contains(perms)
}

pub fn can_act_on(acting: &Role, target: &Role) -> bool {
    acting.authority > target.authority
}

/// Authority an editor may actually assign: anything at or above the
/// editor's own level is pulled down to one below it.
pub fn clamp_authority(editor: &Role, requested: i32) -> i32 {
    if requested >= editor.authority {
        editor.authority.saturating_sub(1)
    } else {
        requested
    }
}

pub fn is_protected_role(role_id: RoleId) -> bool {
    role_id == MEMBER_ROLE_ID || role_id == FOUNDER_ROLE_ID
}

pub fn require_permission(role: &Role, perms: GuildPerms) -> Result<(), GuildError> {
    if has_permission(role, perms) {
        Ok(())
    } else {
        Err(GuildError::MissingPermission(perms))
    }
}

pub fn require_authority_over(acting: &Role, target: &Role) -> Result<(), GuildError> {
    if can_act_on(acting, target) {
        Ok(())
    } else {
        Err(GuildError::InsufficientAuthority)
    }
}
