use async_trait::async_trait;
use tracing::{debug, info};

use crate::users::UserRecord;

/// Hands a password reset link to the user out of band (e.g. email).
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, user: &UserRecord, reset_url: &str) -> anyhow::Result<()>;
}

/// Delivery that only records the event in the log. The link itself is
/// logged only when `reveal_links` is set (development profile).
pub struct LogDelivery {
    reveal_links: bool,
}

impl LogDelivery {
    pub fn new(reveal_links: bool) -> Self {
        Self { reveal_links }
    }
}

#[async_trait]
impl ResetDelivery for LogDelivery {
    async fn deliver(&self, user: &UserRecord, reset_url: &str) -> anyhow::Result<()> {
        if self.reveal_links {
            debug!(user_id = %user.id, %reset_url, "password reset link");
        }
        info!(user_id = %user.id, "password reset link issued");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps delivered links so tests can follow them.
    #[derive(Default)]
    pub struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl Outbox {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        /// `(email, url)` pairs in delivery order.
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn last_token(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let (_, url) = sent.last()?;
            url.rsplit('/').next().map(str::to_string)
        }
    }

    #[async_trait]
    impl ResetDelivery for Outbox {
        async fn deliver(&self, user: &UserRecord, reset_url: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("mail server unavailable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((user.email.clone(), reset_url.to_string()));
            Ok(())
        }
    }
}
