//! Authorization-gated artefact lifecycle.
//!
//! Every call resolves the caller's role first, then runs
//! validate → authorize → encrypt → checksum → persist (or the inverse on
//! read) against the backing [`ArtefactCollection`].

use std::path::{Path, PathBuf};

use lyric_vault_core::{
    checksum, validate_field, Artefact, ArtefactId, ArtefactRecord, Codec, NewArtefact,
    Operation, Role, SecretKey, VaultError,
};
use lyric_vault_store_jsonl::{by_id, ArtefactCollection};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod config;
pub mod thumbnail;

pub use config::VaultConfig;
pub use thumbnail::{ImageThumbnailSink, ThumbnailSink, THUMBNAIL_MAX_EDGE};

/// Outcome of [`ArtefactService::verify`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    pub checksum_mismatches: Vec<ArtefactId>,
    pub undecryptable: Vec<ArtefactId>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.checksum_mismatches.is_empty() && self.undecryptable.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThumbnailedArtefact {
    pub id: ArtefactId,
    pub thumbnail: PathBuf,
}

/// Store facade. Mutations take `&mut self`, so one service value never has
/// two writers in flight.
#[derive(Debug)]
pub struct ArtefactService<C> {
    collection: C,
    codec: Codec,
}

impl<C: ArtefactCollection> ArtefactService<C> {
    #[must_use]
    pub fn new(collection: C, key: &SecretKey) -> Self {
        Self { collection, codec: Codec::new(key) }
    }

    #[must_use]
    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Create an artefact owned by `actor` and return its id.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`], [`VaultError::Unauthorized`],
    /// [`VaultError::InvalidInput`], [`VaultError::Encryption`] or
    /// [`VaultError::Store`].
    pub fn create(
        &mut self,
        artefact: &NewArtefact,
        actor: &str,
        role: &str,
    ) -> Result<ArtefactId, VaultError> {
        let role = resolve_role(Operation::Create, actor, role)?;
        if !role.capabilities().can_create() {
            return Err(denied(Operation::Create, actor, role, None));
        }

        let (title, content) = self.seal(artefact)?;
        let id = self
            .collection
            .allocate_id()
            .map_err(|err| store_failure(Operation::Create, actor, None, &err))?;
        let record = ArtefactRecord {
            id,
            title,
            checksum: checksum(&content),
            content,
            created_at: OffsetDateTime::now_utc(),
            created_by: actor.to_string(),
            modified_at: None,
        };

        self.collection
            .insert(record)
            .map_err(|err| store_failure(Operation::Create, actor, Some(id), &err))?;
        tracing::info!(operation = "create", actor, role = %role, artefact_id = %id, "artefact created");
        Ok(id)
    }

    /// Return every artefact, decrypted, in insertion order.
    ///
    /// The read is all-or-nothing: one record with a bad checksum or an
    /// undecryptable token fails the whole call.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`], [`VaultError::Unauthorized`],
    /// [`VaultError::Decryption`] (including a stored checksum that no longer
    /// matches its ciphertext) or
    /// [`VaultError::Store`].
    pub fn read(&self, actor: &str, role: &str) -> Result<Vec<Artefact>, VaultError> {
        let role = resolve_role(Operation::Read, actor, role)?;
        if !role.capabilities().can_read() {
            return Err(denied(Operation::Read, actor, role, None));
        }

        let records =
            self.collection.all().map_err(|err| store_failure(Operation::Read, actor, None, &err))?;
        let mut artefacts = Vec::with_capacity(records.len());
        for record in records {
            if !record.checksum_matches() {
                tracing::error!(operation = "read", actor, artefact_id = %record.id, "checksum mismatch");
                return Err(VaultError::Decryption {
                    id: Some(record.id),
                    reason: "checksum mismatch".to_string(),
                });
            }
            let plaintext = self.codec.decrypt(&record.content).map_err(|err| {
                tracing::error!(operation = "read", actor, artefact_id = %record.id, error = %err, "decryption failed");
                err.for_artefact(record.id)
            })?;
            artefacts.push(Artefact::from_record(record, plaintext));
        }

        tracing::info!(operation = "read", actor, role = %role, count = artefacts.len(), "artefacts read");
        Ok(artefacts)
    }

    /// Replace title and content of artefact `id`, keeping its identity and
    /// ownership fields, and return the stored record.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`], [`VaultError::NotFound`],
    /// [`VaultError::Unauthorized`], [`VaultError::InvalidInput`],
    /// [`VaultError::Encryption`] or [`VaultError::Store`].
    pub fn update(
        &mut self,
        id: ArtefactId,
        artefact: &NewArtefact,
        actor: &str,
        role: &str,
    ) -> Result<ArtefactRecord, VaultError> {
        let role = resolve_role(Operation::Update, actor, role)?;
        let existing = self.owned_record(Operation::Update, id, actor, role)?;

        let (title, content) = self.seal(artefact)?;
        let record = ArtefactRecord {
            title,
            checksum: checksum(&content),
            content,
            modified_at: Some(OffsetDateTime::now_utc()),
            ..existing
        };

        let replaced = self
            .collection
            .update(record.clone(), &by_id(id))
            .map_err(|err| store_failure(Operation::Update, actor, Some(id), &err))?;
        if replaced == 0 {
            return Err(VaultError::NotFound { operation: Operation::Update, id });
        }
        tracing::info!(operation = "update", actor, role = %role, artefact_id = %id, "artefact updated");
        Ok(record)
    }

    /// Permanently remove artefact `id`. Its id is never handed out again.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`], [`VaultError::NotFound`],
    /// [`VaultError::Unauthorized`] or [`VaultError::Store`].
    pub fn delete(&mut self, id: ArtefactId, actor: &str, role: &str) -> Result<(), VaultError> {
        let role = resolve_role(Operation::Delete, actor, role)?;
        self.owned_record(Operation::Delete, id, actor, role)?;

        let removed = self
            .collection
            .remove(&by_id(id))
            .map_err(|err| store_failure(Operation::Delete, actor, Some(id), &err))?;
        if removed == 0 {
            return Err(VaultError::NotFound { operation: Operation::Delete, id });
        }
        tracing::info!(operation = "delete", actor, role = %role, artefact_id = %id, "artefact deleted");
        Ok(())
    }

    /// Create an artefact, then store its thumbnail through `sink`.
    ///
    /// When the sink fails the new record is removed again, so the call either
    /// leaves an artefact with a thumbnail or nothing at all. The id consumed by
    /// the rolled-back record is not reused.
    ///
    /// # Errors
    /// Returns any error of [`ArtefactService::create`], [`VaultError::InvalidInput`]
    /// for a bad category, or [`VaultError::Thumbnail`] when the sink fails.
    pub fn create_with_thumbnail(
        &mut self,
        sink: &dyn ThumbnailSink,
        artefact: &NewArtefact,
        image_source: &Path,
        category: &str,
        actor: &str,
        role: &str,
    ) -> Result<ThumbnailedArtefact, VaultError> {
        validate_field("category", category)?;
        let id = self.create(artefact, actor, role)?;

        match sink.save(image_source, category, id) {
            Ok(thumbnail) => {
                tracing::info!(
                    operation = "create",
                    actor,
                    artefact_id = %id,
                    thumbnail = %thumbnail.display(),
                    "artefact created with thumbnail"
                );
                Ok(ThumbnailedArtefact { id, thumbnail })
            }
            Err(thumbnail_err) => {
                tracing::warn!(
                    operation = "create",
                    actor,
                    artefact_id = %id,
                    error = %thumbnail_err,
                    "thumbnail failed; rolling back artefact"
                );
                if let Err(err) = self.collection.remove(&by_id(id)) {
                    tracing::error!(artefact_id = %id, error = %format!("{err:#}"), "rollback failed");
                    return Err(VaultError::Store(format!(
                        "{thumbnail_err}; rollback of artefact {id} failed: {err:#}"
                    )));
                }
                Err(thumbnail_err)
            }
        }
    }

    /// Recompute every stored checksum and try every decryption without
    /// failing on bad records.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`], [`VaultError::Unauthorized`] or
    /// [`VaultError::Store`].
    pub fn verify(&self, actor: &str, role: &str) -> Result<IntegrityReport, VaultError> {
        let role = resolve_role(Operation::Read, actor, role)?;
        if !role.capabilities().can_read() {
            return Err(denied(Operation::Read, actor, role, None));
        }

        let records =
            self.collection.all().map_err(|err| store_failure(Operation::Read, actor, None, &err))?;
        let mut report = IntegrityReport { checked: records.len(), ..IntegrityReport::default() };
        for record in &records {
            if !record.checksum_matches() {
                report.checksum_mismatches.push(record.id);
            }
            if self.codec.decrypt(&record.content).is_err() {
                report.undecryptable.push(record.id);
            }
        }

        if report.is_clean() {
            tracing::info!(actor, checked = report.checked, "integrity check passed");
        } else {
            tracing::warn!(
                actor,
                checked = report.checked,
                checksum_mismatches = report.checksum_mismatches.len(),
                undecryptable = report.undecryptable.len(),
                "integrity check found damaged artefacts"
            );
        }
        Ok(report)
    }

    /// Validate both fields, then encrypt the content.
    fn seal(&self, artefact: &NewArtefact) -> Result<(String, String), VaultError> {
        let title = validate_field("title", &artefact.title)?;
        let content = validate_field("content", &artefact.content)?;
        let sealed = self.codec.encrypt(content)?;
        Ok((title.to_string(), sealed))
    }

    /// Fetch `id` and check that `actor` may run `operation` on it.
    fn owned_record(
        &self,
        operation: Operation,
        id: ArtefactId,
        actor: &str,
        role: Role,
    ) -> Result<ArtefactRecord, VaultError> {
        let existing = self
            .collection
            .get_by(&by_id(id))
            .map_err(|err| store_failure(operation, actor, Some(id), &err))?
            .ok_or_else(|| {
                tracing::warn!(operation = operation.as_str(), actor, artefact_id = %id, "artefact not found");
                VaultError::NotFound { operation, id }
            })?;

        let capabilities = role.capabilities();
        let owner = existing.created_by.as_str();
        let allowed = match operation {
            Operation::Update => capabilities.can_update(actor, owner),
            Operation::Delete => capabilities.can_delete(actor, owner),
            Operation::Create | Operation::Read => role.permits(operation, actor, Some(owner)),
        };
        if !allowed {
            return Err(denied(operation, actor, role, Some(id)));
        }
        Ok(existing)
    }
}

fn resolve_role(operation: Operation, actor: &str, role: &str) -> Result<Role, VaultError> {
    Role::resolve(role).inspect_err(|_| {
        tracing::warn!(operation = operation.as_str(), actor, role, "unknown role");
    })
}

fn denied(operation: Operation, actor: &str, role: Role, id: Option<ArtefactId>) -> VaultError {
    tracing::warn!(
        operation = operation.as_str(),
        actor,
        role = %role,
        artefact_id = ?id.map(ArtefactId::get),
        "not authorized"
    );
    VaultError::Unauthorized { operation, actor: actor.to_string(), id }
}

fn store_failure(
    operation: Operation,
    actor: &str,
    id: Option<ArtefactId>,
    err: &anyhow::Error,
) -> VaultError {
    let message = format!("{operation} failed: {err:#}");
    tracing::error!(
        operation = operation.as_str(),
        actor,
        artefact_id = ?id.map(ArtefactId::get),
        error = %message,
        "store operation failed"
    );
    VaultError::Store(message)
}
