//! REST client for the dashboard API.
//!
//! One method per endpoint. Every call is a single request with a timeout;
//! nothing is retried. Non-success responses become
//! [`ClientError::Status`] carrying the server's `error` message verbatim.

use crate::config::Config;
use crate::error::{ClientError, Result};
use facedeck_core::types::{
    CameraList, ErrorBody, EventList, PersonList, RecognitionList,
};
use facedeck_core::{
    Camera, EventHandler, Health, NewCamera, NewEventHandler, NewPerson, Person,
    RecognitionQuery, RecognitionResult, TokenInfo, WebsocketInfo,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base: Url,
    timeout_secs: u64,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            http,
            base: config.api_base.clone(),
            timeout_secs: config.timeout().as_secs(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Liveness of the API and its upstream appliance.
    ///
    /// An unhealthy API answers 500 with a regular health body, so the body
    /// is decoded regardless of status.
    pub async fn health(&self) -> Result<Health> {
        let url = self.endpoint(&["api", "health"])?;
        let (status, body) = self.execute(self.http.get(url)).await?;
        match serde_json::from_slice::<Health>(&body) {
            Ok(health) => Ok(health),
            Err(_) if !status.is_success() => Err(status_error(status, &body)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let url = self.endpoint(&["api", "cameras"])?;
        let list: CameraList = self.send(self.http.get(url)).await?;
        Ok(list.cameras)
    }

    pub async fn add_camera(&self, camera: &NewCamera) -> Result<serde_json::Value> {
        camera.validate()?;
        let url = self.endpoint(&["api", "cameras"])?;
        tracing::info!(name = %camera.name, ip = %camera.ip, port = camera.port, "registering camera");
        self.send(self.http.post(url).json(&camera.payload())).await
    }

    pub async fn update_camera(&self, id: &str, camera: &NewCamera) -> Result<serde_json::Value> {
        camera.validate()?;
        let url = self.endpoint(&["api", "cameras", id])?;
        self.send(self.http.put(url).json(&camera.payload())).await
    }

    /// Live video URL for a camera.
    pub fn camera_stream_url(&self, id: &str) -> Result<Url> {
        self.endpoint(&["api", "camera", id, "stream"])
    }

    /// Still-frame URL with a `t` cache buster (epoch milliseconds).
    pub fn camera_snapshot_url(&self, id: &str, at_millis: i64) -> Result<Url> {
        let mut url = self.endpoint(&["api", "camera", id, "snapshot"])?;
        url.query_pairs_mut().append_pair("t", &at_millis.to_string());
        Ok(url)
    }

    /// Fetch one still frame from a camera.
    pub async fn fetch_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        let url = self.camera_snapshot_url(id, chrono::Utc::now().timestamp_millis())?;
        let (status, body) = self.execute(self.http.get(url)).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(body)
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>> {
        let url = self.endpoint(&["api", "persons"])?;
        let list: PersonList = self.send(self.http.get(url)).await?;
        Ok(list.persons)
    }

    pub async fn add_person(&self, person: &NewPerson) -> Result<serde_json::Value> {
        person.validate()?;
        check_photo(person)?;
        let url = self.endpoint(&["api", "persons"])?;
        tracing::info!(fullname = %person.fullname, with_photo = person.photo.is_some(), "enrolling person");
        self.send(self.http.post(url).json(&person.payload())).await
    }

    pub async fn update_person(&self, id: &str, person: &NewPerson) -> Result<serde_json::Value> {
        person.validate()?;
        check_photo(person)?;
        let url = self.endpoint(&["api", "persons", id])?;
        self.send(self.http.put(url).json(&person.payload())).await
    }

    pub async fn delete_person(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "persons", id])?;
        tracing::info!(id, "deleting person");
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn list_events(&self) -> Result<Vec<EventHandler>> {
        let url = self.endpoint(&["api", "events"])?;
        let list: EventList = self.send(self.http.get(url)).await?;
        Ok(list.events)
    }

    pub async fn add_event(&self, handler: &NewEventHandler) -> Result<serde_json::Value> {
        handler.validate()?;
        let url = self.endpoint(&["api", "events"])?;
        tracing::info!(name = %handler.name, method = %handler.method, "creating event handler");
        self.send(self.http.post(url).json(handler)).await
    }

    pub async fn update_event(&self, id: &str, handler: &NewEventHandler) -> Result<serde_json::Value> {
        handler.validate()?;
        let url = self.endpoint(&["api", "events", id])?;
        self.send(self.http.put(url).json(handler)).await
    }

    pub async fn delete_event(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "events", id])?;
        tracing::info!(id, "deleting event handler");
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn query_recognitions(&self, query: &RecognitionQuery) -> Result<Vec<RecognitionResult>> {
        query.validate()?;
        let url = self.endpoint(&["api", "recognitions"])?;
        let list: RecognitionList = self.send(self.http.get(url).query(&query.params())).await?;
        Ok(list.results)
    }

    /// Where to open the live recognition subscription.
    pub async fn websocket_info(&self) -> Result<WebsocketInfo> {
        let url = self.endpoint(&["api", "websocket", "info"])?;
        self.send(self.http.get(url)).await
    }

    /// Ask the API to renew its upstream appliance token.
    pub async fn refresh_token(&self) -> Result<TokenInfo> {
        let url = self.endpoint(&["api", "token", "refresh"])?;
        self.send(self.http.post(url)).await
    }

    /// Resolve API path segments against the base, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>)> {
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        tracing::debug!(url = %response.url(), status = status.as_u16(), "API response");
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok((status, body.to_vec()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Like `send`, for endpoints whose success body is irrelevant.
    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(())
    }

    fn classify(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout_secs)
        } else {
            ClientError::Transport(e)
        }
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Reject photos that are not a recognisable image before uploading them.
fn check_photo(person: &NewPerson) -> Result<()> {
    let Some(photo) = person.photo.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let format = image::guess_format(photo)
        .map_err(|e| ClientError::UnsupportedImage(e.to_string()))?;
    tracing::debug!(?format, bytes = photo.len(), "enrollment photo accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAppliance;
    use facedeck_core::types::{parse_query_time, HttpMethod};

    fn client_for(base: &str) -> ApiClient {
        let config = Config::default().with_api_base(base).unwrap();
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let api = client_for("http://appliance:5000/dash/");
        let url = api.camera_stream_url("cam 1/a").unwrap();
        assert_eq!(url.as_str(), "http://appliance:5000/dash/api/camera/cam%201%2Fa/stream");
    }

    #[test]
    fn test_snapshot_url_cache_buster() {
        let api = client_for("http://appliance:5000");
        let url = api.camera_snapshot_url("camera1", 1714623611025).unwrap();
        assert_eq!(
            url.as_str(),
            "http://appliance:5000/api/camera/camera1/snapshot?t=1714623611025"
        );
    }

    #[test]
    fn test_status_error_uses_server_message() {
        let err = status_error(StatusCode::BAD_REQUEST, br#"{"error": "fullname is required"}"#);
        assert_eq!(err.to_string(), "fullname is required");
        assert_eq!(err.status(), Some(400));

        let err = status_error(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(err.to_string(), "request failed with status 502");
    }

    #[test]
    fn test_check_photo() {
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
        let ok = NewPerson {
            fullname: "A".into(),
            employeeno: None,
            photo: Some(png.to_vec()),
        };
        assert!(check_photo(&ok).is_ok());

        let bad = NewPerson {
            photo: Some(b"plain text".to_vec()),
            ..ok
        };
        assert!(matches!(check_photo(&bad), Err(ClientError::UnsupportedImage(_))));
    }

    #[tokio::test]
    async fn test_health_unhealthy_body_on_500() {
        let fake = FakeAppliance::start().await;
        fake.set_healthy(false);
        let health = fake.client().health().await.unwrap();
        assert!(!health.is_healthy());
        assert_eq!(health.aira_api.as_deref(), Some("disconnected"));
    }

    #[tokio::test]
    async fn test_add_person_then_list() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        assert!(api.list_persons().await.unwrap().is_empty());

        api.add_person(&NewPerson {
            fullname: "John Doe".into(),
            employeeno: Some("EMP001".into()),
            photo: None,
        })
        .await
        .unwrap();

        let persons = api.list_persons().await.unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].fullname, "John Doe");
    }

    #[tokio::test]
    async fn test_rejected_person_keeps_server_message() {
        let fake = FakeAppliance::start().await;
        fake.reject_next("employee number already enrolled");
        let err = fake
            .client()
            .add_person(&NewPerson {
                fullname: "John Doe".into(),
                ..NewPerson::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "employee number already enrolled");
        assert!(fake.client().list_persons().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_fullname_never_sent() {
        let fake = FakeAppliance::start().await;
        let err = fake.client().add_person(&NewPerson::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput(_)));
        assert_eq!(fake.request_count(), 0);
    }

    #[tokio::test]
    async fn test_camera_registration_sends_rtsp_url() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        api.add_camera(&NewCamera {
            name: "Main Entrance".into(),
            ip: "192.168.1.101".into(),
            port: 554,
            username: "admin".into(),
            password: "admin".into(),
        })
        .await
        .unwrap();

        let cameras = api.list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].name.as_deref(), Some("Main Entrance"));
        assert_eq!(
            fake.last_body().unwrap()["url"],
            "rtsp://192.168.1.101:554/stream"
        );
    }

    #[tokio::test]
    async fn test_event_create_and_delete() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        api.add_event(&NewEventHandler {
            name: "Recognition Alert".into(),
            url: "http://localhost:3000/webhook".into(),
            method: HttpMethod::Post,
            enable: true,
        })
        .await
        .unwrap();

        let events = api.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].enable);

        api.delete_event(&events[0].id).await.unwrap();
        assert!(api.list_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_camera_visible_after_relist() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        let mut camera = NewCamera {
            name: "Main Entrance".into(),
            ip: "192.168.1.101".into(),
            port: 554,
            username: "admin".into(),
            password: "admin".into(),
        };
        api.add_camera(&camera).await.unwrap();
        let id = api.list_cameras().await.unwrap()[0].id.clone();

        camera.name = "Lobby".into();
        camera.ip = "192.168.1.120".into();
        api.update_camera(&id, &camera).await.unwrap();

        let cameras = api.list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].id, id);
        assert_eq!(cameras[0].name.as_deref(), Some("Lobby"));
        assert_eq!(fake.last_body().unwrap()["url"], "rtsp://192.168.1.120:554/stream");
    }

    #[tokio::test]
    async fn test_update_person_with_photo() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        api.add_person(&NewPerson {
            fullname: "John Doe".into(),
            ..NewPerson::default()
        })
        .await
        .unwrap();
        let id = api.list_persons().await.unwrap()[0].id.clone();

        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        api.update_person(
            &id,
            &NewPerson {
                fullname: "John A. Doe".into(),
                employeeno: Some("EMP001".into()),
                photo: Some(png),
            },
        )
        .await
        .unwrap();

        let persons = api.list_persons().await.unwrap();
        assert_eq!(persons[0].fullname, "John A. Doe");
        assert_eq!(persons[0].employeeno.as_deref(), Some("EMP001"));
        assert!(fake.last_body().unwrap()["photo"].as_str().unwrap().starts_with("iVBORw0KGgo"));
    }

    #[tokio::test]
    async fn test_update_event_visible_after_relist() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        let mut handler = NewEventHandler {
            name: "Recognition Alert".into(),
            url: "http://localhost:3000/webhook".into(),
            method: HttpMethod::Post,
            enable: true,
        };
        api.add_event(&handler).await.unwrap();
        let id = api.list_events().await.unwrap()[0].id.clone();

        handler.method = HttpMethod::Put;
        handler.enable = false;
        api.update_event(&id, &handler).await.unwrap();

        let events = api.list_events().await.unwrap();
        assert_eq!(events[0].method.as_deref(), Some("PUT"));
        assert!(!events[0].enable);
    }

    #[tokio::test]
    async fn test_rejected_update_keeps_server_message() {
        let fake = FakeAppliance::start().await;
        let api = fake.client();
        api.add_person(&NewPerson {
            fullname: "John Doe".into(),
            ..NewPerson::default()
        })
        .await
        .unwrap();
        let id = api.list_persons().await.unwrap()[0].id.clone();

        fake.reject_next("photo contains no face");
        let err = api
            .update_person(
                &id,
                &NewPerson {
                    fullname: "Someone Else".into(),
                    ..NewPerson::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "photo contains no face");
        assert_eq!(api.list_persons().await.unwrap()[0].fullname, "John Doe");
    }

    #[tokio::test]
    async fn test_update_missing_event_is_status_error() {
        let fake = FakeAppliance::start().await;
        let err = fake
            .client()
            .update_event(
                "42",
                &NewEventHandler {
                    name: "Alert".into(),
                    url: "http://localhost:3000/webhook".into(),
                    method: HttpMethod::Post,
                    enable: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_bytes() {
        let fake = FakeAppliance::start().await;
        let frame = fake.client().fetch_snapshot("camera1").await.unwrap();
        assert_eq!(frame, vec![0xff, 0xd8, 0xff, 0xe0]);
        assert_eq!(image::guess_format(&frame).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_stream_url_served() {
        let fake = FakeAppliance::start().await;
        let url = fake.client().camera_stream_url("camera1").unwrap();
        let response = reqwest::get(url).await.unwrap();
        assert!(response.status().is_success());
        let content_type = response.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/x-mixed-replace"));
    }

    #[tokio::test]
    async fn test_delete_missing_person_is_status_error() {
        let fake = FakeAppliance::start().await;
        let err = fake.client().delete_person("nobody").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_recognition_query_params_forwarded() {
        let fake = FakeAppliance::start().await;
        let query = RecognitionQuery {
            start_time: Some(parse_query_time("2024-05-01T00:00").unwrap()),
            end_time: Some(parse_query_time("2024-05-02T00:00").unwrap()),
            person_id: None,
            camera_id: Some("cam1".into()),
        };
        let results = fake.client().query_recognitions(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            fake.last_query().as_deref(),
            Some("start_time=2024-05-01T00%3A00&end_time=2024-05-02T00%3A00&camera_id=cam1")
        );
    }

    #[tokio::test]
    async fn test_websocket_info() {
        let fake = FakeAppliance::start().await;
        let info = fake.client().websocket_info().await.unwrap();
        assert!(info.websocket_url.starts_with("ws://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let api = client_for("http://127.0.0.1:9");
        let err = api.list_cameras().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_) | ClientError::Timeout(_)));
    }
}
