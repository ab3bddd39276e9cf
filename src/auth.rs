use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password (`CALLBOARD_PASSWORD`) for every connection. Speaker
/// and organizer identity is the upstream identity provider's concern; the
/// engine only gates the wire.
#[derive(Debug)]
pub struct CallboardAuthSource {
    password: String,
}

impl CallboardAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CallboardAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
