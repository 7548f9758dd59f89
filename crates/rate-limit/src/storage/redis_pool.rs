//! Pooled multiplexed Redis connections.

use deadpool::{
    Runtime,
    managed::{self, Metrics, PoolConfig, RecycleError, RecycleResult, Timeouts},
};
use redis::{Client, RedisError, aio::MultiplexedConnection};

use config::{RedisConfig, RedisPoolConfig};

use super::StorageError;

pub(super) type Pool = managed::Pool<ConnectionManager>;
pub(super) type Connection = managed::Object<ConnectionManager>;

/// Opens connections for the pool and checks idle ones before reuse.
#[derive(Debug)]
pub(super) struct ConnectionManager {
    client: Client,
}

impl managed::Manager for ConnectionManager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> RecycleResult<RedisError> {
        // A dropped transaction must not leak into the next borrower.
        let pong: String = redis::pipe()
            .cmd("UNWATCH")
            .ignore()
            .cmd("PING")
            .query_async::<(String,)>(conn)
            .await
            .map(|(pong,)| pong)?;

        match pong.as_str() {
            "PONG" => Ok(()),
            other => Err(RecycleError::message(format!("Unexpected PING reply '{other}'"))),
        }
    }
}

/// Build the pool described by the configuration. No connection is opened yet.
pub(super) fn create_pool(config: &RedisConfig) -> Result<Pool, StorageError> {
    let client = Client::open(config.url.as_str())
        .map_err(|e| StorageError::Connection(format!("Invalid Redis URL: {e}")))?;

    Pool::builder(ConnectionManager { client })
        .config(pool_config(&config.pool))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))
}

fn pool_config(config: &RedisPoolConfig) -> PoolConfig {
    let mut pool_config = PoolConfig::default();

    pool_config.timeouts = Timeouts {
        create: config.timeout_create,
        wait: config.timeout_wait,
        recycle: config.timeout_recycle,
    };

    if let Some(max_size) = config.max_size {
        pool_config.max_size = max_size;
    }

    pool_config
}
