//! State Snapshot Persistence
//!
//! Users, balances, orders and the open-order index are written as one JSON
//! document after every mutating operation and loaded once at startup. The
//! snapshot is captured under the state lock, but the disk write happens
//! outside it; a dedicated async mutex serializes writers. Writes go to a
//! temp file first and are renamed into place so a crash mid-write cannot
//! corrupt the previous snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::state::{Balance, Order, SharedState, UserRecord};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredUser {
    password_hash: String,
}

/// On-disk document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: HashMap<String, StoredUser>,
    #[serde(default)]
    balances: HashMap<String, HashMap<String, Balance>>,
    #[serde(default)]
    orders: HashMap<String, Order>,
    #[serde(default)]
    open_orders_by_symbol: HashMap<String, Vec<String>>,
}

pub struct Storage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture the current state and replace the snapshot on disk.
    pub async fn persist(&self, state: &SharedState) -> Result<()> {
        let snapshot = {
            let guard = state.lock();
            Snapshot {
                users: guard
                    .users
                    .iter()
                    .map(|(name, user)| {
                        (
                            name.clone(),
                            StoredUser {
                                password_hash: user.password_hash.clone(),
                            },
                        )
                    })
                    .collect(),
                balances: guard.balances.clone(),
                orders: guard.orders.clone(),
                open_orders_by_symbol: guard.open_orders_by_symbol.clone(),
            }
        };

        let body = serde_json::to_vec_pretty(&snapshot)
            .context("Failed to serialize state snapshot")?;

        let _writer = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }

    /// Load the snapshot into state. A missing file is a no-op.
    pub async fn load(&self, state: &SharedState) -> Result<()> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("Malformed state snapshot {}", self.path.display()))?;

        let mut guard = state.lock();
        guard.users = snapshot
            .users
            .into_iter()
            .map(|(name, stored)| {
                (
                    name.clone(),
                    UserRecord {
                        username: name,
                        password_hash: stored.password_hash,
                    },
                )
            })
            .collect();
        guard.balances = snapshot.balances;
        guard.orders = snapshot.orders;
        guard.open_orders_by_symbol = snapshot.open_orders_by_symbol;

        info!(
            users = guard.users.len(),
            orders = guard.orders.len(),
            "💾 State snapshot loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderStatus};
    use crate::state::new_shared;
    use tempfile::TempDir;

    fn seeded_state() -> SharedState {
        let state = new_shared();
        {
            let mut guard = state.lock();
            guard.users.insert(
                "alice".to_string(),
                UserRecord {
                    username: "alice".to_string(),
                    password_hash: "hash".to_string(),
                },
            );
            guard.balance_mut("alice", "USDT").total = 1000.0;
            guard.balance_mut("alice", "USDT").available = 800.0;
            guard.balance_mut("alice", "BTC").total = 0.5;
            guard.balance_mut("alice", "BTC").available = 0.1;
            guard.orders.insert(
                "ord-1".to_string(),
                Order {
                    token_id: "ord-1".to_string(),
                    username: "alice".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    side: OrderSide::Buy,
                    price: 50000.0,
                    quantity: 0.01,
                    status: OrderStatus::Open,
                    filled_price: None,
                    reason: None,
                    reserved_amount: 500.0,
                    created_at: 123.0,
                },
            );
            guard
                .open_orders_by_symbol
                .insert("BTCUSDT".to_string(), vec!["ord-1".to_string()]);
        }
        state
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        let storage = Storage::new(&path);

        let state = seeded_state();
        storage.persist(&state).await.unwrap();
        assert!(path.exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["users"]["alice"]["password_hash"], "hash");
        assert_eq!(raw["balances"]["alice"]["USDT"]["total"], 1000.0);

        let fresh = new_shared();
        Storage::new(&path).load(&fresh).await.unwrap();

        let guard = fresh.lock();
        assert!(guard.users.contains_key("alice"));
        assert_eq!(guard.users["alice"].username, "alice");
        assert_eq!(guard.balance("alice", "USDT").available, 800.0);
        assert_eq!(guard.orders["ord-1"].symbol, "BTCUSDT");
        assert_eq!(guard.orders["ord-1"].status, OrderStatus::Open);
        assert_eq!(
            guard.open_orders_by_symbol["BTCUSDT"],
            vec!["ord-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_is_noop() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path().join("does_not_exist.json"));

        let state = seeded_state();
        storage.load(&state).await.unwrap();

        // Pre-existing state untouched.
        assert!(state.lock().users.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_persist_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let storage = Storage::new(&path);

        storage.persist(&seeded_state()).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
