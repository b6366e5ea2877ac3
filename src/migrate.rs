use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressDrawTarget};
use tokio::sync::Semaphore;

use crate::config::{MigrationConfig, DEFAULT_MAX_CONCURRENT_TRANSFERS, MAX_CONCURRENT_TRANSFERS};
use crate::container_specs::Manifest;
use crate::errors::{BlobFailure, ReplicationError, Result};
use crate::manifest_staging::StagedManifest;
use crate::registry::ops::{ensure_present, size_to_string, ActionsTaken};
use crate::registry::{self, Registry, RegistryEndpoint, Transport};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MigrationState {
    Start,
    SourceExistsChecked,
    ManifestFetched,
    BlobsInFlight,
    BlobsDone,
    ManifestRegistered,
    Done,
    Aborted,
}

/// Where the migrated image can now be found.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DestinationReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    /// `<registry>/v2/<path>/manifests/<tag>`
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub destination: DestinationReference,
    pub actions: ActionsTaken,
    /// The destination tag already existed and nothing was copied.
    pub skipped: bool,
}

/// One image copy from a source repository to a destination repository.
pub struct Migration {
    source: Arc<dyn Registry>,
    destination: Arc<dyn Registry>,
    source_tag: String,
    destination_tag: String,
    max_concurrent_transfers: usize,
    staging_dir: Option<PathBuf>,
    skip_if_destination_exists: bool,
    progress: Arc<MultiProgress>,
    state: MigrationState,
}

impl Migration {
    pub fn new(
        source: Arc<dyn Registry>,
        source_tag: impl Into<String>,
        destination: Arc<dyn Registry>,
        destination_tag: impl Into<String>,
    ) -> Migration {
        Migration {
            source,
            destination,
            source_tag: source_tag.into(),
            destination_tag: destination_tag.into(),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            staging_dir: None,
            skip_if_destination_exists: false,
            progress: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
            state: MigrationState::Start,
        }
    }

    /// Builds both endpoints over one shared transport.
    pub fn from_config(config: &MigrationConfig) -> Result<Migration> {
        config.validate()?;
        let transport = Arc::new(Transport::new(&config.transport));
        let source = registry::from_endpoint(
            RegistryEndpoint::from_location(&config.source)?,
            Arc::clone(&transport),
        );
        let destination = registry::from_endpoint(
            RegistryEndpoint::from_location(&config.destination)?,
            transport,
        );
        Ok(Migration::new(
            source,
            &config.source.tag,
            destination,
            &config.destination.tag,
        )
        .with_max_concurrent_transfers(config.max_concurrent_transfers)
        .with_staging_dir(config.staging_dir.clone())
        .with_skip_if_destination_exists(config.skip_if_destination_exists))
    }

    pub fn with_max_concurrent_transfers(mut self, max_concurrent_transfers: usize) -> Migration {
        self.max_concurrent_transfers = max_concurrent_transfers.clamp(1, MAX_CONCURRENT_TRANSFERS);
        self
    }

    pub fn with_staging_dir(mut self, staging_dir: Option<PathBuf>) -> Migration {
        self.staging_dir = staging_dir;
        self
    }

    pub fn with_skip_if_destination_exists(mut self, skip: bool) -> Migration {
        self.skip_if_destination_exists = skip;
        self
    }

    pub fn with_progress(mut self, progress: Arc<MultiProgress>) -> Migration {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    fn transition(&mut self, next: MigrationState) {
        tracing::debug!("Migration state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn destination_reference(&self) -> DestinationReference {
        DestinationReference {
            registry: self.destination.registry_base(),
            repository: self.destination.repository().to_string(),
            tag: self.destination_tag.clone(),
            uri: self.destination.manifest_reference(&self.destination_tag),
        }
    }

    /// Runs the migration to a terminal state. The manifest is registered at
    /// the destination only once every referenced blob is confirmed there.
    pub async fn run(&mut self) -> Result<MigrationReport> {
        self.transition(MigrationState::Start);

        if self.skip_if_destination_exists {
            let exists = self.destination.manifest_exists(&self.destination_tag).await;
            if self.abort_on_err(exists)? {
                tracing::info!(
                    "{} already exists, skipping",
                    self.destination.manifest_reference(&self.destination_tag)
                );
                self.transition(MigrationState::Done);
                return Ok(MigrationReport {
                    destination: self.destination_reference(),
                    actions: ActionsTaken::default(),
                    skipped: true,
                });
            }
        }

        let source_exists = self.source.manifest_exists(&self.source_tag).await;
        if !self.abort_on_err(source_exists)? {
            self.transition(MigrationState::Aborted);
            return Err(ReplicationError::Precondition {
                reference: self.source.manifest_reference(&self.source_tag),
            });
        }
        self.transition(MigrationState::SourceExistsChecked);

        let fetched = self.source.fetch_manifest(&self.source_tag).await;
        let manifest = self.abort_on_err(fetched)?;
        self.transition(MigrationState::ManifestFetched);

        let staged = StagedManifest::stage(&manifest, self.staging_dir.as_deref());
        let staged = self.abort_on_err(staged)?;
        let result = self.transfer_and_register(&manifest, &staged).await;
        staged.close();
        let actions = self.abort_on_err(result)?;

        self.transition(MigrationState::Done);
        let destination = self.destination_reference();
        tracing::info!("Image migration complete! New image address: {}", destination.uri);
        Ok(MigrationReport {
            destination,
            actions,
            skipped: false,
        })
    }

    fn abort_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.transition(MigrationState::Aborted);
        }
        result
    }

    async fn transfer_and_register(
        &mut self,
        manifest: &Manifest,
        staged: &StagedManifest,
    ) -> Result<ActionsTaken> {
        let blobs = manifest.blob_work_set();
        tracing::info!(
            "Migrating {} blobs ({}) from {} to {}, {} at a time",
            blobs.len(),
            size_to_string(manifest.total_size()),
            self.source.manifest_reference(&self.source_tag),
            self.destination.manifest_reference(&self.destination_tag),
            self.max_concurrent_transfers
        );
        self.transition(MigrationState::BlobsInFlight);

        let gate = Arc::new(Semaphore::new(self.max_concurrent_transfers));
        let mut tokio_data = Vec::with_capacity(blobs.len());
        for blob in blobs.into_iter() {
            let gate = Arc::clone(&gate);
            let source = Arc::clone(&self.source);
            let destination = Arc::clone(&self.destination);
            let mp = Arc::clone(&self.progress);
            let task_blob = blob.clone();
            let handle = tokio::spawn(async move {
                // held until the task finishes, whichever way it finishes
                let _permit = gate.acquire_owned().await.map_err(|e| {
                    ReplicationError::TaskAborted {
                        digest: task_blob.digest.clone(),
                        reason: e.to_string(),
                    }
                })?;
                ensure_present(&task_blob, source, destination, mp).await
            });
            tokio_data.push((blob, handle));
        }

        let mut actions_taken = ActionsTaken::default();
        let mut failures = Vec::default();
        for (blob, join_handle) in tokio_data {
            let error = match join_handle.await {
                Ok(Ok(actions)) => {
                    actions_taken.merge(&actions);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join_error) => ReplicationError::TaskAborted {
                    digest: blob.digest.clone(),
                    reason: join_error.to_string(),
                },
            };
            tracing::debug!("{} {} failed: {}", blob.role, blob.digest, error);
            failures.push(BlobFailure {
                digest: blob.digest,
                role: blob.role,
                error,
            });
        }

        if !failures.is_empty() {
            return Err(ReplicationError::PartialFailure { failures });
        }
        self.transition(MigrationState::BlobsDone);
        tracing::info!("All referred to blobs are present, actions taken:\n{}", actions_taken);

        let manifest_bytes = staged.read_bytes()?;
        self.destination
            .upload_manifest(&self.destination_tag, manifest, &manifest_bytes)
            .await?;
        self.transition(MigrationState::ManifestRegistered);

        Ok(actions_taken)
    }
}

/// Copies the image described by `config.source` to `config.destination`.
pub async fn migrate(config: &MigrationConfig) -> Result<MigrationReport> {
    let mut migration = Migration::from_config(config)?;
    migration.run().await
}
