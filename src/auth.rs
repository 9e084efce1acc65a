use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every login. The login name selects the acting
/// person, and its role comes from the tenant's employee records.
#[derive(Debug)]
pub struct SharedPasswordSource {
    password: String,
}

impl SharedPasswordSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("password check for {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
