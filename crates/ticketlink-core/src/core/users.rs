//! User service.

use crate::access::Principal;
use crate::index::{IndexDb, User};

use super::{CoreError, CoreResult};

/// Service for user operations.
pub struct UserService<'a> {
    db: &'a IndexDb,
}

impl<'a> UserService<'a> {
    pub(crate) const fn new(db: &'a IndexDb) -> Self {
        Self { db }
    }

    pub fn add(&self, name: &str, is_admin: bool) -> CoreResult<User> {
        let user_id = self.db.insert_user(name, is_admin)?;
        self.get(user_id)
    }

    pub fn get(&self, user_id: i64) -> CoreResult<User> {
        self.db
            .get_user(user_id)?
            .ok_or(CoreError::UserNotFound { user_id })
    }

    /// Resolve the caller. `None` is an anonymous caller.
    pub fn principal(&self, user_id: Option<i64>) -> CoreResult<Principal> {
        let Some(user_id) = user_id else {
            return Ok(Principal::Anonymous);
        };
        let user = self.get(user_id)?;
        Ok(Principal::User {
            id: user.id,
            is_admin: user.is_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::setup_db;

    #[test]
    fn test_principal_resolution() {
        let db = setup_db();
        let users = UserService::new(&db);
        let admin = users.add("root", true).expect("add");

        assert_eq!(users.principal(None).expect("anon"), Principal::Anonymous);
        assert_eq!(
            users.principal(Some(admin.id)).expect("admin"),
            Principal::User {
                id: admin.id,
                is_admin: true
            }
        );
        assert!(matches!(
            users.principal(Some(admin.id + 1)),
            Err(CoreError::UserNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_is_an_error() {
        let db = setup_db();
        let users = UserService::new(&db);
        users.add("alice", false).expect("first");
        assert!(users.add("alice", false).is_err());
    }
}
