use std::time::Duration;

use rusqlite::params;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::budget::AuditEntry;
use crate::db::Database;

/// Maximum number of entries to buffer before flushing, regardless of timer.
const BATCH_SIZE: usize = 100;

/// How often to flush buffered entries even if the batch is not full.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn a background task that reads [`AuditEntry`] values from the channel
/// and batch-writes them to the durable `usage_log` table.
///
/// Enqueueing is fire-and-forget from the request path; a failed flush is
/// logged and the entries are re-buffered for the next tick, so a transient
/// storage error never fails a request. The returned `JoinHandle` can be
/// used to wait for graceful shutdown (the task exits when the sender half
/// is dropped and remaining entries are flushed).
pub fn spawn_audit_logger(
    db: Database,
    mut rx: mpsc::UnboundedReceiver<AuditEntry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<AuditEntry> = Vec::with_capacity(BATCH_SIZE);
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        // Don't pile up ticks while we're busy flushing.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                entry = rx.recv() => {
                    match entry {
                        Some(e) => {
                            buffer.push(e);
                            if buffer.len() >= BATCH_SIZE {
                                flush_batch(&db, &mut buffer);
                            }
                        }
                        None => {
                            // Channel closed -- flush remaining and exit.
                            if !buffer.is_empty() {
                                flush_batch(&db, &mut buffer);
                            }
                            tracing::info!("Audit logger shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        flush_batch(&db, &mut buffer);
                    }
                }
            }
        }
    })
}

/// Write a batch of audit entries to the database in a single transaction.
fn flush_batch(db: &Database, buffer: &mut Vec<AuditEntry>) {
    let entries = std::mem::take(buffer);
    let count = entries.len();

    if let Err(e) = write_entries(db, &entries) {
        tracing::error!(count, error = %e, "Failed to flush audit batch");
        // Put entries back so we can retry on the next tick.
        buffer.extend(entries);
    } else {
        tracing::debug!(count, "Flushed audit batch");
    }
}

/// Perform the actual `usage_log` inserts inside a transaction.
fn write_entries(db: &Database, entries: &[AuditEntry]) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        {
            let mut insert_stmt = tx.prepare_cached(
                "INSERT INTO usage_log (id, request_id, caller_id, service, provider, model, \
                 input, output, prompt_tokens, completion_tokens, cost, latency_ms, cache_hit) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;

            for entry in entries {
                let id = Uuid::new_v4().to_string();
                insert_stmt.execute(params![
                    id,
                    entry.request_id,
                    entry.caller_id,
                    entry.service,
                    entry.provider,
                    entry.model,
                    entry.input,
                    entry.output,
                    entry.prompt_tokens,
                    entry.completion_tokens,
                    entry.cost,
                    entry.latency_ms,
                    entry.cache_hit,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
