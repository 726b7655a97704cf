//! Presence records that tell controllers a camera is live.

use std::sync::Arc;

use protocol::{DocumentPath, PresenceRecord};
use tracing::{debug, info};

use crate::diagnostics::now_millis;
use crate::store::{DocumentStore, StoreError};

/// Publishes and retracts the presence record of one user.
#[derive(Clone)]
pub struct PresencePublisher {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl PresencePublisher {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    fn path(&self, user_id: &str) -> Result<DocumentPath, StoreError> {
        Ok(DocumentPath::new(&self.collection, user_id)?)
    }

    /// Upserts a live record for `user_id` stamped with the current time.
    pub async fn publish(
        &self,
        user_id: &str,
        display_name: &str,
        file_url: &str,
    ) -> Result<(), StoreError> {
        let path = self.path(user_id)?;
        let record = PresenceRecord::live(display_name, file_url, now_millis());
        self.store.set(&path, record.to_value()?).await?;
        info!(%user_id, %file_url, "Presence published");
        Ok(())
    }

    /// Deletes the record. A missing record is not an error.
    pub async fn retract(&self, user_id: &str) -> Result<(), StoreError> {
        let path = self.path(user_id)?;
        self.store.delete(&path).await?;
        debug!(%user_id, "Presence retracted");
        Ok(())
    }
}
