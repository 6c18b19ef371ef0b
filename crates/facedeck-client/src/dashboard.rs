//! Request/render cycles for the dashboard views.
//!
//! Each load is one request whose response replaces the view's contents.
//! Loads take a sequencing ticket first, so a response that was overtaken
//! by a newer request for the same view is discarded instead of rendered.
//! Failed loads render an inline failure panel; failed user actions are
//! reported through the [`Notifier`] and leave the view as it was.

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::notify::{Notice, Notifier};
use facedeck_core::render::View;
use facedeck_core::{
    Camera, EventHandler, NewCamera, NewEventHandler, NewPerson, Person, RecognitionQuery,
    RecognitionResult, RequestSequencer,
};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Contents of a list view after a load.
#[derive(Debug, Clone, PartialEq)]
pub enum Panel<T> {
    Empty,
    Ready(Vec<T>),
    /// The load failed; the view shows its failure message.
    Failed,
}

impl<T> Panel<T> {
    fn from_items(items: Vec<T>) -> Self {
        if items.is_empty() {
            Self::Empty
        } else {
            Self::Ready(items)
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Self::Ready(items) => items,
            Self::Empty | Self::Failed => &[],
        }
    }

    /// Placeholder line for empty or failed panels.
    pub fn placeholder(&self, view: View) -> Option<&'static str> {
        match self {
            Self::Empty => Some(view.empty_message()),
            Self::Failed => Some(view.failed_message()),
            Self::Ready(_) => None,
        }
    }
}

/// API status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The API answered and reports its upstream as healthy.
    Connected,
    /// The API answered but reports a problem.
    Disconnected,
    /// The API could not be reached.
    Failed,
}

impl HealthStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connected => "Connected to recognition API",
            Self::Disconnected => "API Disconnected",
            Self::Failed => "Connection Failed",
        }
    }
}

pub struct Dashboard {
    api: ApiClient,
    notifier: Arc<dyn Notifier>,
    selected_camera: Mutex<Option<String>>,
    cameras_seq: RequestSequencer,
    persons_seq: RequestSequencer,
    events_seq: RequestSequencer,
    recognitions_seq: RequestSequencer,
}

impl Dashboard {
    pub fn new(api: ApiClient, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            selected_camera: Mutex::new(None),
            cameras_seq: RequestSequencer::new(),
            persons_seq: RequestSequencer::new(),
            events_seq: RequestSequencer::new(),
            recognitions_seq: RequestSequencer::new(),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub async fn check_health(&self) -> HealthStatus {
        match self.api.health().await {
            Ok(health) if health.is_healthy() => HealthStatus::Connected,
            Ok(health) => {
                tracing::warn!(status = %health.status, error = ?health.error, "API reports unhealthy");
                HealthStatus::Disconnected
            }
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
                HealthStatus::Failed
            }
        }
    }

    /// `None` means a newer load of the same view superseded this one.
    pub async fn load_cameras(&self) -> Option<Panel<Camera>> {
        load(View::Cameras, &self.cameras_seq, self.api.list_cameras()).await
    }

    pub async fn load_persons(&self) -> Option<Panel<Person>> {
        load(View::Persons, &self.persons_seq, self.api.list_persons()).await
    }

    pub async fn load_events(&self) -> Option<Panel<EventHandler>> {
        load(View::Events, &self.events_seq, self.api.list_events()).await
    }

    /// Historical query. An invalid range is reported and nothing is fetched.
    pub async fn query_recognitions(
        &self,
        query: &RecognitionQuery,
    ) -> Option<Panel<RecognitionResult>> {
        if let Err(e) = query.validate() {
            self.notifier.notify(Notice::Error, &e.to_string());
            return None;
        }
        load(
            View::Recognitions,
            &self.recognitions_seq,
            self.api.query_recognitions(query),
        )
        .await
    }

    pub async fn add_camera(&self, camera: &NewCamera) -> Result<Option<Panel<Camera>>> {
        self.submit(self.api.add_camera(camera), "Camera added successfully", "Failed to add camera")
            .await?;
        Ok(self.load_cameras().await)
    }

    pub async fn update_camera(&self, id: &str, camera: &NewCamera) -> Result<Option<Panel<Camera>>> {
        self.submit(
            self.api.update_camera(id, camera),
            "Camera updated successfully",
            "Failed to update camera",
        )
        .await?;
        Ok(self.load_cameras().await)
    }

    pub async fn add_person(&self, person: &NewPerson) -> Result<Option<Panel<Person>>> {
        self.submit(self.api.add_person(person), "Person added successfully", "Failed to add person")
            .await?;
        Ok(self.load_persons().await)
    }

    pub async fn update_person(&self, id: &str, person: &NewPerson) -> Result<Option<Panel<Person>>> {
        self.submit(
            self.api.update_person(id, person),
            "Person updated successfully",
            "Failed to update person",
        )
        .await?;
        Ok(self.load_persons().await)
    }

    pub async fn delete_person(&self, id: &str) -> Result<Option<Panel<Person>>> {
        self.submit(
            self.api.delete_person(id),
            "Person deleted successfully",
            "Failed to delete person",
        )
        .await?;
        Ok(self.load_persons().await)
    }

    pub async fn add_event(&self, handler: &NewEventHandler) -> Result<Option<Panel<EventHandler>>> {
        self.submit(
            self.api.add_event(handler),
            "Event handler created successfully",
            "Failed to create event",
        )
        .await?;
        Ok(self.load_events().await)
    }

    pub async fn update_event(
        &self,
        id: &str,
        handler: &NewEventHandler,
    ) -> Result<Option<Panel<EventHandler>>> {
        self.submit(
            self.api.update_event(id, handler),
            "Event handler updated successfully",
            "Failed to update event",
        )
        .await?;
        Ok(self.load_events().await)
    }

    pub async fn delete_event(&self, id: &str) -> Result<Option<Panel<EventHandler>>> {
        self.submit(
            self.api.delete_event(id),
            "Event deleted successfully",
            "Failed to delete event",
        )
        .await?;
        Ok(self.load_events().await)
    }

    /// Select the camera shown in the feed and return its stream URL.
    /// `None` clears the selection.
    pub fn select_camera(&self, id: Option<&str>) -> Result<Option<Url>> {
        let mut selected = self
            .selected_camera
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match id.filter(|id| !id.is_empty()) {
            Some(id) => {
                let url = self.api.camera_stream_url(id)?;
                *selected = Some(id.to_string());
                tracing::info!(camera = id, "camera selected");
                Ok(Some(url))
            }
            None => {
                *selected = None;
                Ok(None)
            }
        }
    }

    pub fn selected_camera(&self) -> Option<String> {
        self.selected_camera
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fresh still frame from the selected camera, `None` when nothing is selected.
    pub async fn selected_snapshot(&self) -> Result<Option<Vec<u8>>> {
        match self.selected_camera() {
            Some(id) => Ok(Some(self.api.fetch_snapshot(&id).await?)),
            None => Ok(None),
        }
    }

    async fn submit<T>(
        &self,
        action: impl Future<Output = Result<T>>,
        success: &str,
        failure: &str,
    ) -> Result<T> {
        match action.await {
            Ok(value) => {
                self.notifier.notify(Notice::Info, success);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, "{failure}");
                self.notifier.notify(Notice::Error, &failure_message(failure, &e));
                Err(e)
            }
        }
    }
}

/// Server rejections are shown verbatim; other failures get the action's generic message.
fn failure_message(failure: &str, e: &ClientError) -> String {
    match e {
        ClientError::Status { message, .. } => format!("Error: {message}"),
        ClientError::InvalidInput(_) | ClientError::UnsupportedImage(_) => format!("Error: {e}"),
        _ => failure.to_string(),
    }
}

async fn load<T>(
    view: View,
    sequencer: &RequestSequencer,
    fetch: impl Future<Output = Result<Vec<T>>>,
) -> Option<Panel<T>> {
    let ticket = sequencer.begin();
    let result = fetch.await;
    if !sequencer.accept(ticket) {
        tracing::debug!(view = view.name(), "discarding superseded response");
        return None;
    }
    Some(match result {
        Ok(items) => {
            tracing::debug!(view = view.name(), count = items.len(), "view loaded");
            Panel::from_items(items)
        }
        Err(e) => {
            tracing::warn!(view = view.name(), error = %e, "failed to load view");
            Panel::Failed
        }
    })
}
