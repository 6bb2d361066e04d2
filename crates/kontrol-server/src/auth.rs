//! Gate for `POST /machine`.
//!
//! With a shared secret configured, a machine gets a kite key by presenting
//! it as its credential. Without one, machine registration is closed and
//! kite keys come only from the `kite-key` command.
use async_trait::async_trait;
use kontrol::{MachineAuthenticator, MachineRequest};
use subtle::ConstantTimeEq;

pub struct SharedSecret {
    secret: String,
}

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl MachineAuthenticator for SharedSecret {
    async fn authenticate(&self, request: &MachineRequest) -> Result<(), String> {
        let matched: bool = request
            .credential
            .as_bytes()
            .ct_eq(self.secret.as_bytes())
            .into();
        if matched {
            Ok(())
        } else {
            Err("credential mismatch".into())
        }
    }
}

pub struct Closed;

#[async_trait]
impl MachineAuthenticator for Closed {
    async fn authenticate(&self, _: &MachineRequest) -> Result<(), String> {
        Err("machine registration is disabled".into())
    }
}
