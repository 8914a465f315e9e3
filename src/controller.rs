use futures::future::try_join;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ApiError, BackendClient, InferenceParams, InferenceRecord, RemoteId, RequestContext};
use crate::config::ViewerConfig;
use crate::enums::ViewerId;
use crate::frames::FrameTicket;
use crate::geometry::GeometryError;
use crate::loader::{FrameImage, ImageLoader, ImageRef, LoadError};
use crate::session::{Effect, SessionError, ViewerEvent, Workspace};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),
}

/// Drives a [`Workspace`] against an image loader.
///
/// Every operation awaits its loads before touching the workspace, so a
/// failed load leaves the viewers as they were.
pub struct ViewerController<L> {
    loader: L,
    workspace: Workspace,
}

impl<L: ImageLoader> ViewerController<L> {
    pub fn new(loader: L, config: &ViewerConfig) -> Self {
        Self {
            loader,
            workspace: Workspace::new(config),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Open `file_id` in viewer `id` and show its first frame.
    pub async fn select_file(&mut self, id: ViewerId, file_id: RemoteId) -> Result<(), ControllerError> {
        let image = self.loader.open(&file_id.to_string()).await?;
        let first = self.loader.load_frame(&image, 0).await?;
        self.workspace.select_file(id, file_id, image, first)?;
        Ok(())
    }

    pub fn clear_file(&mut self, id: ViewerId) -> Result<(), ControllerError> {
        Ok(self.workspace.clear_file(id)?)
    }

    /// Feed an input event and carry out any frame load it asks for.
    pub async fn handle(&mut self, id: ViewerId, event: ViewerEvent) -> Result<Effect, ControllerError> {
        let effect = self.workspace.handle(id, event)?;
        if let Effect::LoadFrame(ticket) = effect {
            self.load(id, ticket).await?;
        }
        Ok(effect)
    }

    async fn load(&mut self, id: ViewerId, ticket: FrameTicket) -> Result<bool, ControllerError> {
        let Some(image) = self.workspace.viewer(id).image().cloned() else {
            self.workspace.frame_failed(id, ticket);
            return Ok(false);
        };
        match self.loader.load_frame(&image, ticket.frame).await {
            Ok(frame) => Ok(self.workspace.frame_loaded(id, ticket, frame)?),
            Err(err) => {
                warn!(viewer = ?id, frame = ticket.frame, "Loading frame failed: {err}");
                self.workspace.frame_failed(id, ticket);
                Err(err.into())
            }
        }
    }

    /// Load both images of an inference record and switch to editing.
    pub async fn open_inference(&mut self, record: &InferenceRecord) -> Result<(), ControllerError> {
        let [first, second, ..] = record.params.as_slice() else {
            return Err(SessionError::IncompleteRecord {
                params: record.params.len(),
                results: record.results.len(),
            }
            .into());
        };
        let loaded = try_join(self.open_at(first), self.open_at(second)).await?;
        self.workspace.hydrate(record, [loaded.0, loaded.1])?;
        Ok(())
    }

    /// Fetch an inference record from the backend and open it.
    pub async fn open_remote_inference(
        &mut self,
        client: &BackendClient,
        ctx: &RequestContext,
        id: &RemoteId,
    ) -> Result<(), ControllerError> {
        let record = client.get_inference(ctx, id).await?;
        self.open_inference(&record).await
    }

    /// Submit both viewers' landmarks to `service`.
    pub async fn run_inference(
        &self,
        client: &BackendClient,
        ctx: &RequestContext,
        service: &str,
    ) -> Result<Value, ControllerError> {
        let instances = self.workspace.run_instances()?;
        let response = client.run_inference(ctx, service, &instances).await?;
        info!(service, "inference submitted");
        Ok(response)
    }

    async fn open_at(&self, params: &InferenceParams) -> Result<(ImageRef, FrameImage), LoadError> {
        let image = self.loader.open(&params.dicom_file_id.to_string()).await?;
        let frame = self.loader.load_frame(&image, params.frame_number).await?;
        Ok((image, frame))
    }

    /// Tear down a viewer.
    pub fn close(&mut self, id: ViewerId) {
        self.workspace.close(id);
    }
}
