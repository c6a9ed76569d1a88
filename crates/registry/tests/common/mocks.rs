//! Recording test doubles for the creation saga.
//!
//! Every double appends to one shared call log so tests can assert the exact
//! order in which the saga touched its collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use lineage_core::{
    ArtifactRef, EntityDraft, EntityId, EntityKind, Provider, Upload, UploadId, UploadOwner,
    VersionedEntity,
};
use lineage_metadata::{
    EntityRepo, MetadataError, MetadataResult, TxBeginner, TxHandle, UploadLedger,
};
use lineage_registry::CreationSaga;
use lineage_storage::{FileMover, StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, call: impl Into<String>) {
    log.lock().unwrap().push(call.into());
}

/// Which collaborator calls should fail.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    pub begin: bool,
    pub insert: bool,
    pub update: bool,
    pub commit: bool,
    pub rollback: bool,
    /// Fail the move whose source key equals this.
    pub move_from: Option<String>,
}

pub struct MockTx {
    log: CallLog,
    faults: Faults,
}

#[async_trait]
impl TxHandle for MockTx {
    async fn commit(&mut self) -> MetadataResult<()> {
        record(&self.log, "commit");
        if self.faults.commit {
            return Err(MetadataError::Internal("commit refused".to_string()));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> MetadataResult<()> {
        record(&self.log, "rollback");
        if self.faults.rollback {
            return Err(MetadataError::Internal("connection lost".to_string()));
        }
        Ok(())
    }
}

pub struct MockDb {
    log: CallLog,
    faults: Faults,
}

#[async_trait]
impl TxBeginner<MockTx> for MockDb {
    async fn begin(&self) -> MetadataResult<MockTx> {
        if self.faults.begin {
            return Err(MetadataError::Internal("pool exhausted".to_string()));
        }
        Ok(MockTx {
            log: self.log.clone(),
            faults: self.faults.clone(),
        })
    }
}

pub struct MockEntityRepo {
    log: CallLog,
    kind: EntityKind,
    id: EntityId,
    fail: bool,
}

#[async_trait]
impl EntityRepo<MockTx> for MockEntityRepo {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn insert_within(
        &self,
        _tx: &mut MockTx,
        draft: &EntityDraft,
    ) -> MetadataResult<VersionedEntity> {
        record(&self.log, format!("create-{}", self.kind));
        if self.fail {
            return Err(MetadataError::Internal("constraint violated".to_string()));
        }
        Ok(VersionedEntity::inserted(
            self.id,
            self.kind,
            draft,
            OffsetDateTime::now_utc(),
        ))
    }

    async fn list(&self) -> MetadataResult<Vec<VersionedEntity>> {
        Ok(Vec::new())
    }

    async fn get(&self, _id: EntityId) -> MetadataResult<Option<VersionedEntity>> {
        Ok(None)
    }
}

pub struct MockLedger {
    log: CallLog,
    uploads: Mutex<HashMap<UploadId, Upload>>,
    faults: Faults,
    fail_update_of: Mutex<Option<UploadId>>,
}

impl MockLedger {
    pub fn upload(&self, upload_id: UploadId) -> Option<Upload> {
        self.uploads.lock().unwrap().get(&upload_id).cloned()
    }
}

#[async_trait]
impl UploadLedger<MockTx> for MockLedger {
    async fn fetch_within(&self, _tx: &mut MockTx, upload_id: UploadId) -> MetadataResult<Upload> {
        record(&self.log, "get-upload");
        self.upload(upload_id)
            .ok_or_else(|| MetadataError::NotFound(format!("upload {upload_id}")))
    }

    async fn update_within(&self, _tx: &mut MockTx, upload: &Upload) -> MetadataResult<()> {
        record(&self.log, "move-upload");
        let targeted = *self.fail_update_of.lock().unwrap() == Some(upload.id);
        if self.faults.update || targeted {
            return Err(MetadataError::Internal("update rejected".to_string()));
        }
        self.uploads.lock().unwrap().insert(upload.id, upload.clone());
        Ok(())
    }
}

pub struct MockMover {
    log: CallLog,
    fail_from: Option<String>,
}

#[async_trait]
impl FileMover for MockMover {
    async fn move_file(&self, from: &str, to: &str) -> StorageResult<()> {
        record(&self.log, format!("move-file {from} -> {to}"));
        if self.fail_from.as_deref() == Some(from) {
            return Err(StorageError::NotFound(from.to_string()));
        }
        Ok(())
    }
}

/// A saga wired to recording doubles.
pub struct Harness {
    pub log: CallLog,
    pub entity_id: EntityId,
    pub ledger: Arc<MockLedger>,
    pub saga: CreationSaga<MockTx>,
}

impl Harness {
    pub fn new(kind: EntityKind) -> Self {
        Self::with_faults(kind, Faults::default())
    }

    pub fn with_faults(kind: EntityKind, faults: Faults) -> Self {
        let log = CallLog::default();
        let entity_id = EntityId::new();
        let ledger = Arc::new(MockLedger {
            log: log.clone(),
            uploads: Mutex::new(HashMap::new()),
            faults: faults.clone(),
            fail_update_of: Mutex::new(None),
        });
        let saga = CreationSaga::new(
            Arc::new(MockDb {
                log: log.clone(),
                faults: faults.clone(),
            }),
            Arc::new(MockEntityRepo {
                log: log.clone(),
                kind,
                id: entity_id,
                fail: faults.insert,
            }),
            ledger.clone(),
            Arc::new(MockMover {
                log: log.clone(),
                fail_from: faults.move_from.clone(),
            }),
        );
        Self {
            log,
            entity_id,
            ledger,
            saga,
        }
    }

    /// Seed an unclaimed upload whose files all live under `dir`.
    pub fn add_upload(&self, dir: &str, filenames: &[&str]) -> UploadId {
        let upload_id = UploadId::new();
        let files: BTreeMap<String, ArtifactRef> = filenames
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ArtifactRef::new(Provider::Filesystem, *name, dir),
                )
            })
            .collect();
        self.ledger
            .uploads
            .lock()
            .unwrap()
            .insert(upload_id, Upload::staged(upload_id, files));
        upload_id
    }

    /// Seed an upload already owned by `owner` under `artifact`.
    pub fn add_claimed_upload(
        &self,
        dir: &str,
        filenames: &[&str],
        owner: UploadOwner,
        artifact: &str,
    ) -> UploadId {
        let upload_id = self.add_upload(dir, filenames);
        if let Some(upload) = self.ledger.uploads.lock().unwrap().get_mut(&upload_id) {
            upload.claim(owner, artifact);
        }
        upload_id
    }

    /// Make updates of `upload_id` fail.
    pub fn fail_update_of(&self, upload_id: UploadId) {
        *self.ledger.fail_update_of.lock().unwrap() = Some(upload_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}
