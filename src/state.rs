use std::sync::Arc;

use tracing::warn;

use crate::{
    auth::{
        delivery::{LogDelivery, ResetDelivery},
        password::PasswordHasher,
        services::Credentials,
    },
    clock::{Clock, SystemClock},
    config::AppConfig,
    db,
    users::{memory::MemoryUserStore, postgres::PgUserStore, UserStore, Users},
};

#[derive(Clone)]
pub struct AppState {
    pub credentials: Credentials,
    pub config: Arc<AppConfig>,
    pub delivery: Arc<dyn ResetDelivery>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::new(db::connect(url).await?)),
            None => {
                warn!("DATABASE_URL not set; users are kept in memory only");
                Arc::new(MemoryUserStore::default())
            }
        };
        let delivery = Arc::new(LogDelivery::new(config.profile.is_development()));

        Self::from_parts(Arc::new(config), store, delivery, Arc::new(SystemClock))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        delivery: Arc<dyn ResetDelivery>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(&config.hashing)?;
        let credentials = Credentials::new(Users::new(store), hasher, clock);
        Ok(Self {
            credentials,
            config,
            delivery,
        })
    }

    /// In-memory state with cheap hashing, for tests.
    #[cfg(test)]
    pub fn fake_with(
        config: AppConfig,
        delivery: Arc<dyn ResetDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_parts(
            Arc::new(config),
            Arc::new(MemoryUserStore::default()),
            delivery,
            clock,
        )
        .expect("test state")
    }
}
