//! Round, wallet and transaction persistence.
//!
//! The in-memory engine state is authoritative while the process runs; the
//! store makes rounds, wallets and the transaction journal survive restarts.

use crate::errors::StoreError;
use crate::games::types::{LedgerEntry, Player, RoundRecord, TransactionRecord};
use async_trait::async_trait;
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LAST_ROUND_KEY: &[u8] = b"meta:last_round_id";
const PLAYER_PREFIX: &str = "player:";
const ROUND_PREFIX: &str = "round:";

fn round_key(round_id: u64) -> String {
    format!("{}{:020}", ROUND_PREFIX, round_id)
}

fn player_key(player_id: &str) -> String {
    format!("{}{}", PLAYER_PREFIX, player_id)
}

fn tx_key(reference: &str) -> String {
    format!("tx:{}", reference)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn parse_u64_le(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

/// Bound a store call in time
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Highest round id ever saved, 0 when empty
    async fn last_round_id(&self) -> Result<u64, StoreError>;

    async fn save_round(&self, record: &RoundRecord) -> Result<(), StoreError>;

    async fn load_round(&self, round_id: u64) -> Result<Option<RoundRecord>, StoreError>;

    /// Rounds stored in Betting or Running, oldest first
    async fn unfinished_rounds(&self) -> Result<Vec<RoundRecord>, StoreError>;

    async fn save_player(&self, player: &Player) -> Result<(), StoreError>;

    async fn load_players(&self) -> Result<Vec<Player>, StoreError>;

    /// Write the wallet, its transaction and the bet inside its round record
    /// in one atomic batch. A reference that is already stored fails with
    /// `Duplicate`; a round that was never saved fails with `MissingRound`.
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn load_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>, StoreError>;

    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct MemoryInner {
    rounds: BTreeMap<u64, RoundRecord>,
    players: HashMap<String, Player>,
    transactions: HashMap<String, TransactionRecord>,
}

/// Process-local store with failure and latency injection
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    unavailable: AtomicBool,
    reject_finished_rounds: AtomicBool,
    delay_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            unavailable: AtomicBool::new(false),
            reject_finished_rounds: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail `save_round` for crashed or settled records only; everything
    /// else keeps working
    pub fn set_reject_finished_rounds(&self, reject: bool) {
        self.reject_finished_rounds.store(reject, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(self.inner.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn last_round_id(&self) -> Result<u64, StoreError> {
        let inner = self.gate().await?;
        Ok(inner.rounds.keys().next_back().copied().unwrap_or(0))
    }

    async fn save_round(&self, record: &RoundRecord) -> Result<(), StoreError> {
        let mut inner = self.gate().await?;
        if record.phase.is_finished() && self.reject_finished_rounds.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "finished round {} rejected",
                record.round_id
            )));
        }
        inner.rounds.insert(record.round_id, record.clone());
        Ok(())
    }

    async fn load_round(&self, round_id: u64) -> Result<Option<RoundRecord>, StoreError> {
        let inner = self.gate().await?;
        Ok(inner.rounds.get(&round_id).cloned())
    }

    async fn unfinished_rounds(&self) -> Result<Vec<RoundRecord>, StoreError> {
        let inner = self.gate().await?;
        Ok(inner
            .rounds
            .values()
            .filter(|record| !record.phase.is_finished())
            .cloned()
            .collect())
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        let mut inner = self.gate().await?;
        inner.players.insert(player.player_id.clone(), player.clone());
        Ok(())
    }

    async fn load_players(&self) -> Result<Vec<Player>, StoreError> {
        let inner = self.gate().await?;
        Ok(inner.players.values().cloned().collect())
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut inner = self.gate().await?;
        let reference = &entry.transaction.reference;
        if inner.transactions.contains_key(reference) {
            return Err(StoreError::Duplicate(reference.clone()));
        }
        let round_id = entry.round_id();
        inner
            .rounds
            .get_mut(&round_id)
            .ok_or(StoreError::MissingRound(round_id))?
            .upsert_bet(entry.bet.clone());
        inner
            .transactions
            .insert(reference.clone(), entry.transaction.clone());
        inner
            .players
            .insert(entry.wallet.player_id.clone(), entry.wallet.clone());
        Ok(())
    }

    async fn load_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let inner = self.gate().await?;
        Ok(inner.transactions.get(reference).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// RocksDB-backed store; every call runs on the blocking pool
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes read-modify-write batches
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DB, &Mutex<()>) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        let write_lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || f(&db, &write_lock))
            .await
            .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }

    fn get_json<T: DeserializeOwned>(db: &DB, key: &[u8]) -> Result<Option<T>, StoreError> {
        match db.get(key)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_last_round_id(db: &DB) -> Result<u64, StoreError> {
        Ok(db
            .get(LAST_ROUND_KEY)?
            .and_then(|bytes| parse_u64_le(&bytes))
            .unwrap_or(0))
    }
}

#[async_trait]
impl RoundStore for RocksStore {
    async fn last_round_id(&self) -> Result<u64, StoreError> {
        self.blocking(|db, _| Self::read_last_round_id(db)).await
    }

    async fn save_round(&self, record: &RoundRecord) -> Result<(), StoreError> {
        let round_id = record.round_id;
        let bytes = encode(record)?;
        self.blocking(move |db, write_lock| {
            let _guard = write_lock.lock().unwrap_or_else(|p| p.into_inner());
            let last = Self::read_last_round_id(db)?.max(round_id);

            let mut batch = WriteBatch::default();
            batch.put(round_key(round_id), bytes);
            batch.put(LAST_ROUND_KEY, last.to_le_bytes());
            db.write(batch)?;
            Ok(())
        })
        .await
    }

    async fn load_round(&self, round_id: u64) -> Result<Option<RoundRecord>, StoreError> {
        self.blocking(move |db, _| Self::get_json(db, round_key(round_id).as_bytes()))
            .await
    }

    async fn unfinished_rounds(&self) -> Result<Vec<RoundRecord>, StoreError> {
        self.blocking(|db, _| {
            let mut rounds = Vec::new();
            for item in db.prefix_iterator(ROUND_PREFIX.as_bytes()) {
                let (key, value) = item?;
                if !key.starts_with(ROUND_PREFIX.as_bytes()) {
                    break;
                }
                let record: RoundRecord = decode(&value)?;
                if !record.phase.is_finished() {
                    rounds.push(record);
                }
            }
            Ok(rounds)
        })
        .await
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        let key = player_key(&player.player_id);
        let bytes = encode(player)?;
        self.blocking(move |db, _| Ok(db.put(key, bytes)?)).await
    }

    async fn load_players(&self) -> Result<Vec<Player>, StoreError> {
        self.blocking(|db, _| {
            let mut players = Vec::new();
            for item in db.prefix_iterator(PLAYER_PREFIX.as_bytes()) {
                let (key, value) = item?;
                if !key.starts_with(PLAYER_PREFIX.as_bytes()) {
                    break;
                }
                players.push(decode(&value)?);
            }
            Ok(players)
        })
        .await
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let reference = entry.transaction.reference.clone();
        let round_id = entry.round_id();
        let bet = entry.bet.clone();
        let wallet_key = player_key(&entry.wallet.player_id);
        let wallet = encode(&entry.wallet)?;
        let transaction = encode(&entry.transaction)?;

        self.blocking(move |db, write_lock| {
            let _guard = write_lock.lock().unwrap_or_else(|p| p.into_inner());
            let key = tx_key(&reference);
            if db.get(&key)?.is_some() {
                return Err(StoreError::Duplicate(reference));
            }

            let record_key = round_key(round_id);
            let mut round: RoundRecord = Self::get_json(db, record_key.as_bytes())?
                .ok_or(StoreError::MissingRound(round_id))?;
            round.upsert_bet(bet);

            let mut batch = WriteBatch::default();
            batch.put(key, transaction);
            batch.put(wallet_key, wallet);
            batch.put(record_key, encode(&round)?);
            db.write(batch)?;
            Ok(())
        })
        .await
    }

    async fn load_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let key = tx_key(reference);
        self.blocking(move |db, _| Self::get_json(db, key.as_bytes())).await
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}
