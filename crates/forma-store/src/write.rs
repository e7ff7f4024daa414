//! The write path. Every operation runs in one transaction: the entity-table
//! write, the EAV replacement, and the change-log append commit together.

use crate::{guarded, records, Error, Store};
use forma_models::{RowId, StoredRecord};
use forma_registry::AttributeCache;
use forma_transform::{to_attributes, Flattened, Strictness};
use sqlx::{Acquire, PgConnection};
use tokio_util::sync::CancellationToken;

/// The outcome of a non-atomic batch: records that committed, and per-index
/// failures for those that did not.
#[derive(Debug)]
pub struct BatchOutcome {
    pub created: Vec<StoredRecord>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: Error,
}

impl Store {
    /// Create one record. A missing `row_id` gets a generated UUIDv7. The
    /// returned record carries the stored (reconstructed) document.
    #[tracing::instrument(err, level = "debug", skip(self, document, cancel))]
    pub async fn create(
        &self,
        schema: &str,
        row_id: Option<RowId>,
        document: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StoredRecord, Error> {
        let cache = self.registry().get_by_name(schema)?;
        let flat = to_attributes(&cache, document, Strictness::Lenient)?;
        let row_id = row_id.unwrap_or_else(RowId::generate);
        let now = chrono::Utc::now().timestamp_millis();

        guarded(cancel, async {
            let mut txn = self.pool().begin().await?;
            create_one(&mut txn, self, &cache, row_id, now, &flat).await?;
            txn.commit().await?;
            Ok(())
        })
        .await?;

        self.stored(&cache, row_id, now, now, &flat)
    }

    /// Create many records. `atomic` makes the batch all-or-nothing; without
    /// it each record commits or rolls back on its own savepoint and the
    /// outcome reports failures by input index.
    #[tracing::instrument(err, level = "debug", skip(self, documents, cancel))]
    pub async fn batch_create(
        &self,
        schema: &str,
        documents: &[(Option<RowId>, serde_json::Value)],
        atomic: bool,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, Error> {
        let cache = self.registry().get_by_name(schema)?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut prepared: Vec<(usize, RowId, Flattened)> = Vec::new();
        let mut failed: Vec<BatchFailure> = Vec::new();
        for (index, (row_id, document)) in documents.iter().enumerate() {
            match to_attributes(&cache, document, Strictness::Lenient) {
                Ok(flat) => prepared.push((index, row_id.unwrap_or_else(RowId::generate), flat)),
                Err(err) if atomic => return Err(err.into()),
                Err(err) => failed.push(BatchFailure {
                    index,
                    error: err.into(),
                }),
            }
        }

        let mut committed: Vec<(usize, RowId, Flattened)> = Vec::new();
        guarded(cancel, async {
            let mut txn = self.pool().begin().await?;
            for (index, row_id, flat) in prepared {
                if atomic {
                    create_one(&mut txn, self, &cache, row_id, now, &flat).await?;
                    committed.push((index, row_id, flat));
                    continue;
                }

                let mut savepoint = txn.begin().await?;
                match create_one(&mut savepoint, self, &cache, row_id, now, &flat).await {
                    Ok(()) => {
                        savepoint.commit().await?;
                        committed.push((index, row_id, flat));
                    }
                    Err(error) => {
                        savepoint.rollback().await?;
                        failed.push(BatchFailure { index, error });
                    }
                }
            }
            txn.commit().await?;
            Ok(())
        })
        .await?;

        let mut created = Vec::with_capacity(committed.len());
        for (_, row_id, flat) in &committed {
            created.push(self.stored(&cache, *row_id, now, now, flat)?);
        }
        failed.sort_by_key(|failure| failure.index);
        Ok(BatchOutcome { created, failed })
    }

    /// Replace a record: hot cells present in the new document are SET, and
    /// the EAV set is deleted and re-inserted wholesale, which makes changed
    /// array shapes replace cleanly and repeated updates idempotent.
    #[tracing::instrument(err, level = "debug", skip(self, document, cancel))]
    pub async fn update(
        &self,
        schema: &str,
        row_id: RowId,
        document: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StoredRecord, Error> {
        let cache = self.registry().get_by_name(schema)?;
        let flat = to_attributes(&cache, document, Strictness::Lenient)?;
        let now = chrono::Utc::now().timestamp_millis();

        let created_at = guarded(cancel, async {
            let mut txn = self.pool().begin().await?;
            let created_at = records::update_entity(
                &mut txn,
                self.tables(),
                cache.schema_id(),
                row_id,
                now,
                &flat.hot,
            )
            .await?
            .ok_or(Error::NotFound {
                schema_id: cache.schema_id(),
                row_id,
            })?;
            records::delete_eav(&mut txn, self.tables(), cache.schema_id(), row_id).await?;
            records::insert_eav(
                &mut txn,
                self.tables(),
                cache.schema_id(),
                row_id,
                &flat.eav,
            )
            .await?;
            records::append_change_log(
                &mut txn,
                self.tables(),
                cache.schema_id(),
                row_id,
                now,
                None,
            )
            .await?;
            txn.commit().await?;
            Ok(created_at)
        })
        .await?;

        self.stored(&cache, row_id, created_at, now, &flat)
    }

    /// Soft-delete one record: stamp `ltbase_deleted_at` and purge its EAV
    /// tuples. Reads no longer see the record.
    #[tracing::instrument(err, level = "debug", skip(self, cancel))]
    pub async fn delete(
        &self,
        schema: &str,
        row_id: RowId,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.delete_many(schema, &[row_id], cancel).await
    }

    /// Soft-delete a set of records in one transaction. Any missing id fails
    /// the whole batch with `not_found`.
    #[tracing::instrument(err, level = "debug", skip(self, cancel))]
    pub async fn delete_many(
        &self,
        schema: &str,
        row_ids: &[RowId],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let cache = self.registry().get_by_name(schema)?;
        let now = chrono::Utc::now().timestamp_millis();

        guarded(cancel, async {
            let mut txn = self.pool().begin().await?;
            for &row_id in row_ids {
                let found = records::soft_delete_entity(
                    &mut txn,
                    self.tables(),
                    cache.schema_id(),
                    row_id,
                    now,
                )
                .await?;
                if !found {
                    return Err(Error::NotFound {
                        schema_id: cache.schema_id(),
                        row_id,
                    });
                }
                records::delete_eav(&mut txn, self.tables(), cache.schema_id(), row_id).await?;
                records::append_change_log(
                    &mut txn,
                    self.tables(),
                    cache.schema_id(),
                    row_id,
                    now,
                    Some(now),
                )
                .await?;
            }
            txn.commit().await?;
            Ok(())
        })
        .await
    }

    // The record handed back from a write: identity, audit stamps, and the
    // document as stored (reconstructed from the flattened form).
    fn stored(
        &self,
        cache: &AttributeCache,
        row_id: RowId,
        created_at: i64,
        updated_at: i64,
        flat: &Flattened,
    ) -> Result<StoredRecord, Error> {
        let document = forma_transform::from_rows(cache, &flat.hot, &flat.eav)?;
        Ok(StoredRecord {
            schema_id: cache.schema_id(),
            row_id,
            created_at,
            updated_at,
            document,
        })
    }
}

// One record's writes, on whatever transaction or savepoint the caller put
// them in.
async fn create_one(
    conn: &mut PgConnection,
    store: &Store,
    cache: &AttributeCache,
    row_id: RowId,
    now: i64,
    flat: &Flattened,
) -> Result<(), Error> {
    records::insert_entity(conn, store.tables(), cache.schema_id(), row_id, now, &flat.hot)
        .await
        .map_err(|err| insert_conflict(err, cache, row_id))?;
    records::insert_eav(conn, store.tables(), cache.schema_id(), row_id, &flat.eav).await?;
    records::append_change_log(conn, store.tables(), cache.schema_id(), row_id, now, None).await?;
    Ok(())
}

fn insert_conflict(err: sqlx::Error, cache: &AttributeCache, row_id: RowId) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return Error::AlreadyExists {
                schema_id: cache.schema_id(),
                row_id,
            };
        }
    }
    err.into()
}
