use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::client::QueueClient;
use oxmq_config::QueueSettings;

static REDIS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn redis_lock() -> &'static Mutex<()> {
    REDIS_LOCK.get_or_init(|| Mutex::new(()))
}

pub struct RedisTestContext {
    _guard: MutexGuard<'static, ()>,
    pub settings: QueueSettings,
    pub client: QueueClient,
    pub conn: MultiplexedConnection,
}

impl RedisTestContext {
    pub async fn new() -> Result<Self> {
        let guard = redis_lock().lock().await;
        let mut settings = QueueSettings::default();
        settings.redis_dsn = std::env::var("OXMQ_TEST_REDIS_DSN")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        settings.queue_name = format!("test-queue-{}", Uuid::new_v4());

        let redis = redis::Client::open(settings.redis_dsn.as_str())?;
        let mut conn = redis.get_multiplexed_async_connection().await?;
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;

        let client = QueueClient::connect(settings.clone()).await?;
        Ok(Self {
            _guard: guard,
            settings,
            client,
            conn,
        })
    }

    /// Reads the whole event stream, oldest first, one field map per entry.
    pub async fn events(&mut self) -> Result<Vec<HashMap<String, String>>> {
        let entries: Vec<(String, Vec<String>)> = redis::cmd("XRANGE")
            .arg(self.client.keys().events())
            .arg("-")
            .arg("+")
            .query_async(&mut self.conn)
            .await?;
        Ok(entries
            .into_iter()
            .map(|(_, fields)| {
                fields
                    .chunks(2)
                    .filter(|pair| pair.len() == 2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect()
            })
            .collect())
    }
}
