use crate::domain::UserId;

/// Administrator predicate: the user is in the configured admin list.
///
/// An unknown user or an empty list never passes.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}
