//! Ships assembled scripts to the server and invokes them by SHA.
//!
//! The first invocation of a command loads its body with SCRIPT LOAD and
//! caches the SHA the server reports. Later calls go through EVALSHA; when
//! the server answers NOSCRIPT (a restart, a SCRIPT FLUSH), the body is
//! reloaded and the call retried exactly once.

use std::collections::HashMap;
use std::sync::RwLock;

use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, Value};

use crate::error::{QueueError, Result};
use crate::scripts::ScriptDef;

#[derive(Debug, Default)]
pub struct ScriptRegistry {
    shas: RwLock<HashMap<&'static str, String>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn invoke(
        &self,
        conn: &mut MultiplexedConnection,
        script: &ScriptDef,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<Value> {
        let sha = match self.cached_sha(script.name) {
            Some(sha) => sha,
            None => self.load(conn, script).await?,
        };

        match Self::eval_sha(conn, &sha, keys, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                let sha = self.load(conn, script).await?;
                match Self::eval_sha(conn, &sha, keys, args).await {
                    Err(err) if err.kind() == ErrorKind::NoScriptError => {
                        Err(QueueError::ScriptLoad { name: script.name })
                    }
                    other => other.map_err(QueueError::from),
                }
            }
            other => other.map_err(QueueError::from),
        }
    }

    fn cached_sha(&self, name: &str) -> Option<String> {
        self.shas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    async fn load(&self, conn: &mut MultiplexedConnection, script: &ScriptDef) -> Result<String> {
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.source)
            .query_async(conn)
            .await?;
        self.shas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(script.name, sha.clone());
        Ok(sha)
    }

    async fn eval_sha(
        conn: &mut MultiplexedConnection,
        sha: &str,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> redis::RedisResult<Value> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg.as_slice());
        }
        cmd.query_async(conn).await
    }
}
