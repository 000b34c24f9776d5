//! Composition of the pipeline from configuration.

use crate::config::{AuditBackend, ServiceConfig, StagingBackend};
use queue_runtime::{QueueClient, QueueClientFactory, QueueError, ValidationError};
use queue_salvage_core::{
    AuditError, AuditWriter, BrokerClient, FilesystemStagingStore, InMemoryStagingStore,
    JsonLinesAuditWriter, MessageService, QueueNameRules, ServiceBusBrokerClient, SessionSweep,
    StagingStore, StoreError, SweepSettings, TracingAuditWriter, TriageQueries, UserSessionService,
    UserSessionStore,
};
use std::sync::Arc;
use tracing::info;

/// Failures while assembling the pipeline
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("Broker client could not be created: {0}")]
    Broker(#[from] QueueError),

    #[error("Queue name rules are invalid: {0}")]
    Rules(#[from] ValidationError),

    #[error("Staging store could not be opened: {0}")]
    Store(#[from] StoreError),

    #[error("Audit writer could not be opened: {0}")]
    Audit(#[from] AuditError),
}

/// Everything the operator commands and the scheduler run against
pub struct Components {
    pub queue_client: Arc<dyn QueueClient>,
    pub broker: Arc<dyn BrokerClient>,
    pub store: Arc<dyn StagingStore>,
    pub sessions: UserSessionService,
    pub messages: Arc<MessageService>,
    pub sweep: Arc<SessionSweep>,
    pub triage: TriageQueries,
}

impl Components {
    /// Build every component from the service configuration
    pub async fn build(config: &ServiceConfig) -> Result<Self, ComponentError> {
        let queue_client: Arc<dyn QueueClient> =
            Arc::from(QueueClientFactory::create_client(config.broker.queue.clone())?);

        let (store, session_store) = open_store(config).await?;
        let audit = open_audit(config).await?;

        let components = Self::assemble(config, queue_client, store, session_store, audit)?;
        info!(
            provider = %components.queue_client.provider_type(),
            staging = ?config.staging.backend,
            audit = ?config.audit.backend,
            "Components initialized"
        );
        Ok(components)
    }

    /// Wire the pipeline around already constructed collaborators
    pub fn assemble(
        config: &ServiceConfig,
        queue_client: Arc<dyn QueueClient>,
        store: Arc<dyn StagingStore>,
        session_store: Arc<dyn UserSessionStore>,
        audit: Arc<dyn AuditWriter>,
    ) -> Result<Self, ComponentError> {
        let rules = QueueNameRules::new(
            &config.broker.error_queue_pattern,
            &config.broker.error_queue_suffix_pattern,
        )?;

        let broker: Arc<dyn BrokerClient> = Arc::new(ServiceBusBrokerClient::new(
            queue_client.clone(),
            rules.clone(),
            config.broker.batch_size,
        ));

        let sessions = UserSessionService::new(session_store, config.sessions.expiry());

        let messages = Arc::new(MessageService::new(
            broker.clone(),
            store.clone(),
            sessions.clone(),
            audit,
            rules,
            config.staging.batch_size,
        ));

        let sweep = Arc::new(SessionSweep::new(
            sessions.clone(),
            store.clone(),
            messages.clone(),
            SweepSettings {
                page_size: config.sweep.page_size,
                max_pages_per_session: config.sweep.max_pages_per_session,
            },
        ));

        let triage = TriageQueries::new(broker.clone(), store.clone());

        Ok(Self {
            queue_client,
            broker,
            store,
            sessions,
            messages,
            sweep,
            triage,
        })
    }
}

async fn open_store(
    config: &ServiceConfig,
) -> Result<(Arc<dyn StagingStore>, Arc<dyn UserSessionStore>), StoreError> {
    match config.staging.backend {
        StagingBackend::Memory => {
            let store = Arc::new(InMemoryStagingStore::new());
            Ok((store.clone(), store))
        }
        StagingBackend::Filesystem => {
            let store =
                Arc::new(FilesystemStagingStore::new(config.staging.data_directory.clone()).await?);
            Ok((store.clone(), store))
        }
    }
}

async fn open_audit(config: &ServiceConfig) -> Result<Arc<dyn AuditWriter>, AuditError> {
    match config.audit.backend {
        AuditBackend::Tracing => Ok(Arc::new(TracingAuditWriter)),
        AuditBackend::File => Ok(Arc::new(
            JsonLinesAuditWriter::new(config.audit.path.clone()).await?,
        )),
    }
}

#[cfg(test)]
#[path = "components_tests.rs"]
mod tests;
