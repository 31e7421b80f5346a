//! Processing status lookups for polling clients.

use std::sync::Arc;

use tracing::debug;

use vproc_models::{JobId, ProcessingStatusResponse, VideoId};

use crate::error::QueueResult;
use crate::store::JobStore;

/// Answers "how far along is this video?".
///
/// A video that never went through the queue, or whose job was purged by
/// retention, reports `not_found`. That is an answer, not an error.
#[derive(Clone)]
pub struct StatusQuery {
    store: Arc<dyn JobStore>,
}

impl StatusQuery {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Single keyed lookup; cost does not grow with queue depth beyond the
    /// rank query for waiting jobs.
    pub async fn get_processing_status(
        &self,
        video_id: &VideoId,
    ) -> QueueResult<ProcessingStatusResponse> {
        let job_id = JobId::for_video(video_id);
        match self.store.get_status(&job_id).await? {
            Some(status) => Ok(status.into()),
            None => {
                debug!("No job for video {}", video_id);
                Ok(ProcessingStatusResponse::not_found())
            }
        }
    }
}
