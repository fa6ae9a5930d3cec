use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Login names ending in this suffix authenticate as administrators.
pub const ADMIN_SUFFIX: &str = "@admin";

/// Cleartext password check. Users share one password, administrators
/// another.
#[derive(Debug)]
pub struct SpotbookAuthSource {
    password: String,
    admin_password: String,
}

impl SpotbookAuthSource {
    pub fn new(password: String, admin_password: String) -> Self {
        Self { password, admin_password }
    }

    fn expected(&self, user: Option<&str>) -> &str {
        match user {
            Some(u) if u.ends_with(ADMIN_SUFFIX) => &self.admin_password,
            _ => &self.password,
        }
    }
}

#[async_trait]
impl AuthSource for SpotbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.expected(login.user()).as_bytes().to_vec()))
    }
}
