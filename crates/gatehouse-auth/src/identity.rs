use std::sync::RwLock;

use async_trait::async_trait;
use gatehouse_core::Identity;

/// The external identity layer: who is signed in right now, if anyone.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Option<Identity>;
}

/// An identity provider whose answer is set explicitly.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    current: RwLock<Option<Identity>>,
}

impl StaticIdentity {
    pub fn signed_in(identity: impl Into<Identity>) -> Self {
        Self {
            current: RwLock::new(Some(identity.into())),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, identity: impl Into<Identity>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(identity.into());
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
