use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension as _, Row, params};

use super::{InsertOutcome, Mutation, SwapStore};
use crate::config::StarknetToken;
use crate::error::{SwapError, SwapResult};
use crate::lightning::invoice::normalize_payment_hash;
use crate::starknet::normalize_felt;
use crate::swap::{LightningInvoice, SwapDirection, SwapSpeed, SwapStatus, SwapTransaction};

const SELECT_SWAP: &str = r#"
SELECT
  swap_id,
  owner,
  status,
  direction,
  input_amount,
  output_amount,
  target_token,
  recipient_address,
  speed,
  invoice_payment_request,
  invoice_payment_hash,
  invoice_amount,
  invoice_expires_at,
  invoice_description,
  payout_invoice,
  transaction_hash,
  lightning_payment_id,
  payment_preimage,
  idempotency_key,
  created_at,
  updated_at,
  expires_at,
  error,
  source_address
FROM swaps
"#;

#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SwapTransaction>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("{SELECT_SWAP} {filter} ORDER BY created_at, swap_id");
        let mut stmt = conn.prepare(&sql).context("prepare list swaps")?;

        let mut out = Vec::new();
        let rows = stmt
            .query_map(args, swap_from_row)
            .context("query list swaps")?;
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

impl SwapStore for SqliteSwapStore {
    fn insert(&self, record: &SwapTransaction) -> Result<InsertOutcome> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction().context("begin insert")?;

        if let Some(key) = &record.idempotency_key {
            let existing = tx
                .query_row(
                    &format!("{SELECT_SWAP} WHERE owner = ?1 AND idempotency_key = ?2"),
                    params![&record.owner, key],
                    swap_from_row,
                )
                .optional()
                .context("lookup idempotency key")?;
            if let Some(existing) = existing {
                return Ok(InsertOutcome::Existing(existing));
            }
        }

        tx.execute(
            r#"
INSERT INTO swaps (
  swap_id,
  owner,
  status,
  direction,
  input_amount,
  output_amount,
  target_token,
  recipient_address,
  speed,
  invoice_payment_request,
  invoice_payment_hash,
  invoice_amount,
  invoice_expires_at,
  invoice_description,
  payout_invoice,
  transaction_hash,
  lightning_payment_id,
  payment_preimage,
  idempotency_key,
  created_at,
  updated_at,
  expires_at,
  error,
  source_address
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
)
"#,
            params![
                &record.id,
                &record.owner,
                record.status.as_str(),
                record.direction.as_str(),
                to_i64(record.input_amount)?,
                &record.output_amount,
                record.target_token.map(StarknetToken::symbol),
                &record.recipient_address,
                record.speed.map(SwapSpeed::as_str),
                record.lightning_invoice.as_ref().map(|i| &i.payment_request),
                record
                    .lightning_invoice
                    .as_ref()
                    .map(|i| normalize_payment_hash(&i.payment_hash)),
                record
                    .lightning_invoice
                    .as_ref()
                    .map(|i| to_i64(i.amount))
                    .transpose()?,
                record
                    .lightning_invoice
                    .as_ref()
                    .map(|i| i.expires_at.timestamp_millis()),
                record
                    .lightning_invoice
                    .as_ref()
                    .and_then(|i| i.description.as_ref()),
                &record.payout_invoice,
                &record.transaction_hash,
                &record.lightning_payment_id,
                &record.payment_preimage,
                &record.idempotency_key,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
                record.expires_at.map(|t| t.timestamp_millis()),
                &record.error,
                &record.source_address,
            ],
        )
        .with_context(|| format!("insert swap {}", record.id))?;

        tx.commit().context("commit insert")?;
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, swap_id: &str) -> Result<Option<SwapTransaction>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            &format!("{SELECT_SWAP} WHERE swap_id = ?1"),
            params![swap_id],
            swap_from_row,
        )
        .optional()
        .with_context(|| format!("get swap {swap_id}"))
    }

    fn update(&self, swap_id: &str, mutate: Mutation<'_>) -> SwapResult<SwapTransaction> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction().context("begin update")?;

        let mut record = tx
            .query_row(
                &format!("{SELECT_SWAP} WHERE swap_id = ?1"),
                params![swap_id],
                swap_from_row,
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;

        mutate(&mut record)?;

        // Identity, ownership and amounts are immutable after creation.
        let rows = tx
            .execute(
                r#"
UPDATE swaps SET
  status = ?2,
  invoice_payment_request = ?3,
  invoice_payment_hash = ?4,
  invoice_amount = ?5,
  invoice_expires_at = ?6,
  invoice_description = ?7,
  transaction_hash = ?8,
  lightning_payment_id = ?9,
  payment_preimage = ?10,
  updated_at = ?11,
  expires_at = ?12,
  error = ?13
WHERE swap_id = ?1
"#,
                params![
                    swap_id,
                    record.status.as_str(),
                    record.lightning_invoice.as_ref().map(|i| &i.payment_request),
                    record
                        .lightning_invoice
                        .as_ref()
                        .map(|i| normalize_payment_hash(&i.payment_hash)),
                    record
                        .lightning_invoice
                        .as_ref()
                        .map(|i| to_i64(i.amount))
                        .transpose()?,
                    record
                        .lightning_invoice
                        .as_ref()
                        .map(|i| i.expires_at.timestamp_millis()),
                    record
                        .lightning_invoice
                        .as_ref()
                        .and_then(|i| i.description.as_ref()),
                    &record.transaction_hash,
                    &record.lightning_payment_id,
                    &record.payment_preimage,
                    record.updated_at.timestamp_millis(),
                    record.expires_at.map(|t| t.timestamp_millis()),
                    &record.error,
                ],
            )
            .with_context(|| format!("update swap {swap_id}"))?;
        if rows != 1 {
            return Err(SwapError::NotFound(swap_id.to_string()));
        }

        tx.commit().context("commit update")?;
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<SwapTransaction>> {
        self.query("", &[])
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<SwapTransaction>> {
        self.query("WHERE owner = ?1", &[&owner])
    }

    fn list_active(&self) -> Result<Vec<SwapTransaction>> {
        self.query(
            "WHERE status NOT IN ('COMPLETED', 'FAILED', 'EXPIRED')",
            &[],
        )
    }

    fn find_by_idempotency_key(&self, owner: &str, key: &str) -> Result<Option<SwapTransaction>> {
        Ok(self
            .query("WHERE owner = ?1 AND idempotency_key = ?2", &[&owner, &key])?
            .into_iter()
            .next())
    }

    fn find_by_payment_hash(&self, payment_hash: &str) -> Result<Option<SwapTransaction>> {
        let hash = normalize_payment_hash(payment_hash);
        Ok(self
            .query("WHERE invoice_payment_hash = ?1", &[&hash])?
            .into_iter()
            .next())
    }

    fn find_by_transaction_hash(&self, tx_hash: &str) -> Result<Option<SwapTransaction>> {
        let hash = normalize_felt(tx_hash);
        Ok(self
            .query("WHERE transaction_hash = ?1", &[&hash])?
            .into_iter()
            .next())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  owner TEXT NOT NULL,
  status TEXT NOT NULL,
  direction TEXT NOT NULL,
  input_amount INTEGER NOT NULL,
  output_amount TEXT NOT NULL,
  target_token TEXT,
  recipient_address TEXT,
  speed TEXT,
  invoice_payment_request TEXT,
  invoice_payment_hash TEXT,
  invoice_amount INTEGER,
  invoice_expires_at INTEGER,
  invoice_description TEXT,
  payout_invoice TEXT,
  transaction_hash TEXT,
  lightning_payment_id TEXT,
  payment_preimage TEXT,
  idempotency_key TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  expires_at INTEGER,
  error TEXT,
  source_address TEXT
);
CREATE INDEX IF NOT EXISTS swaps_status_idx ON swaps(status);
CREATE INDEX IF NOT EXISTS swaps_owner_idx ON swaps(owner);
CREATE INDEX IF NOT EXISTS swaps_payment_hash_idx ON swaps(invoice_payment_hash);
CREATE UNIQUE INDEX IF NOT EXISTS swaps_idempotency_idx
  ON swaps(owner, idempotency_key) WHERE idempotency_key IS NOT NULL;
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow::anyhow!("value out of sqlite range: {value}"))
}

fn conversion_error(col: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, ty, msg.into())
}

fn u64_col(row: &Row<'_>, col: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(col)?;
    u64::try_from(v).map_err(|_| conversion_error(col, Type::Integer, format!("invalid amount {v}")))
}

fn millis_col(row: &Row<'_>, col: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let v: Option<i64> = row.get(col)?;
    v.map(|ms| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| conversion_error(col, Type::Integer, format!("invalid timestamp {ms}")))
    })
    .transpose()
}

fn required_millis_col(row: &Row<'_>, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    millis_col(row, col)?
        .ok_or_else(|| conversion_error(col, Type::Null, "missing timestamp".to_string()))
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<SwapTransaction> {
    let status_str: String = row.get(2)?;
    let status = SwapStatus::parse(&status_str).ok_or_else(|| {
        conversion_error(2, Type::Text, format!("unknown swap status: {status_str}"))
    })?;

    let direction_str: String = row.get(3)?;
    let direction = match direction_str.as_str() {
        "LN_TO_STARKNET" => SwapDirection::LnToStarknet,
        "STARKNET_TO_LN" => SwapDirection::StarknetToLn,
        other => {
            return Err(conversion_error(
                3,
                Type::Text,
                format!("unknown swap direction: {other}"),
            ));
        }
    };

    let target_token = row
        .get::<_, Option<String>>(6)?
        .map(|s| {
            s.parse::<StarknetToken>()
                .map_err(|e| conversion_error(6, Type::Text, format!("{e}")))
        })
        .transpose()?;

    let speed = row
        .get::<_, Option<String>>(8)?
        .map(|s| {
            SwapSpeed::parse(&s)
                .ok_or_else(|| conversion_error(8, Type::Text, format!("unknown speed: {s}")))
        })
        .transpose()?;

    let payment_request: Option<String> = row.get(9)?;
    let lightning_invoice = match payment_request {
        Some(payment_request) => Some(LightningInvoice {
            payment_request,
            payment_hash: row.get(10)?,
            amount: u64_col(row, 11)?,
            expires_at: required_millis_col(row, 12)?,
            description: row.get(13)?,
        }),
        None => None,
    };

    Ok(SwapTransaction {
        id: row.get(0)?,
        owner: row.get(1)?,
        status,
        direction,
        input_amount: u64_col(row, 4)?,
        output_amount: row.get(5)?,
        target_token,
        recipient_address: row.get(7)?,
        speed,
        lightning_invoice,
        payout_invoice: row.get(14)?,
        transaction_hash: row.get(15)?,
        lightning_payment_id: row.get(16)?,
        payment_preimage: row.get(17)?,
        idempotency_key: row.get(18)?,
        created_at: required_millis_col(row, 19)?,
        updated_at: required_millis_col(row, 20)?,
        expires_at: millis_col(row, 21)?,
        error: row.get(22)?,
        source_address: row.get(23)?,
    })
}
