//! Client for a worker machine's HTTP surface.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::instrument;

use examcheck_core::command::TakeExamCommand;
use examcheck_core::error::{DomainError, ErrorDomain};
use examcheck_core::orchestration::Orchestration;
use examcheck_core::result::{ExamResult, Origin};
use examcheck_core::traits::{Machine, ProgressReporter};
use examcheck_runner::SessionRecord;

use crate::error::MachineError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// A worker machine reached over HTTP.
pub struct HttpMachine {
    name: String,
    base_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_retries: u32,
    retry_delay: Duration,
    last_screenshot: Mutex<Option<Vec<u8>>>,
}

#[derive(Deserialize)]
struct StartReply {
    status: String,
}

#[derive(Deserialize)]
struct ScreenshotReply {
    screenshot: Option<String>,
}

impl std::fmt::Debug for HttpMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMachine")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl HttpMachine {
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            last_screenshot: Mutex::new(None),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Retry unreachable workers `max_retries` times, doubling `delay` up to
    /// a minute.
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The last screenshot a session of this machine sent.
    pub fn last_screenshot(&self) -> Option<Vec<u8>> {
        self.last_screenshot.lock().clone()
    }

    async fn send<F>(&self, url: &str, make: F) -> Result<reqwest::Response, MachineError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut delay = self.retry_delay;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match make().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(MachineError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempts <= self.max_retries => {
                    tracing::warn!("{}: {url} not reachable ({e}), retrying in {delay:?}", self.name);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => {
                    return Err(MachineError::Connection {
                        url: url.to_string(),
                        attempts,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    #[instrument(skip(self, command), fields(machine = %self.name))]
    async fn start(&self, batch_id: &str, command: &TakeExamCommand) -> Result<(), MachineError> {
        let url = format!("{}/start/{batch_id}", self.base_url);
        let body = command
            .to_json()
            .map_err(|e| MachineError::Protocol(format!("cannot encode command: {e:#}")))?;
        let response = self
            .send(&url, || {
                self.client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        let reply: StartReply = response
            .json()
            .await
            .map_err(|e| MachineError::Protocol(format!("bad start reply: {e}")))?;
        match reply.status.as_str() {
            "started" => Ok(()),
            "already_started" => {
                tracing::debug!("{}: batch {batch_id} was already started", self.name);
                Ok(())
            }
            "running" => Err(MachineError::Protocol(format!(
                "{} is busy with another session",
                self.name
            ))),
            other => Err(MachineError::Protocol(format!("unknown start status '{other}'"))),
        }
    }

    /// Records of the batch's session from `index` on.
    #[instrument(skip(self), fields(machine = %self.name))]
    pub async fn monitor(&self, batch_id: &str, index: usize) -> Result<Vec<SessionRecord>, MachineError> {
        let url = format!("{}/monitor/{batch_id}/{index}", self.base_url);
        let response = self.send(&url, || self.client.get(&url)).await?;
        let raw: Vec<(String, String)> = response
            .json()
            .await
            .map_err(|e| MachineError::Protocol(format!("bad monitor reply: {e}")))?;
        raw.into_iter()
            .map(|pair| SessionRecord::try_from(pair).map_err(|e| MachineError::Protocol(e.to_string())))
            .collect()
    }

    #[instrument(skip(self), fields(machine = %self.name))]
    pub async fn screenshot(&self, batch_id: &str) -> Result<Option<Vec<u8>>, MachineError> {
        let url = format!("{}/screenshot/{batch_id}", self.base_url);
        let response = self.send(&url, || self.client.get(&url)).await?;
        let reply: ScreenshotReply = response
            .json()
            .await
            .map_err(|e| MachineError::Protocol(format!("bad screenshot reply: {e}")))?;
        reply
            .screenshot
            .map(|data| {
                STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| MachineError::Protocol(format!("undecodable screenshot: {e}")))
            })
            .transpose()
    }

    /// Start a session and poll it until it reports a result.
    async fn drive(
        &self,
        batch_id: &str,
        command: &TakeExamCommand,
        orchestration: &Orchestration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExamResult, MachineError> {
        self.start(batch_id, command).await?;

        let limiter = orchestration.poll_limiter();
        let mut index = 0;
        loop {
            if orchestration.is_cancelled() {
                return Err(MachineError::Cancelled);
            }
            let records = {
                let _permit = limiter.acquire().await.map_err(|_| MachineError::Cancelled)?;
                tokio::select! {
                    _ = orchestration.cancelled() => return Err(MachineError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                self.monitor(batch_id, index).await?
            };
            index += records.len();

            for record in records {
                match record {
                    SessionRecord::Echo(message) => progress.report(&self.name, &message),
                    SessionRecord::Screenshot(data) => match STANDARD.decode(data.as_bytes()) {
                        Ok(png) => {
                            progress.on_screenshot(&self.name, &png);
                            *self.last_screenshot.lock() = Some(png);
                        }
                        Err(e) => tracing::warn!("{}: undecodable screenshot: {e}", self.name),
                    },
                    SessionRecord::Done(json) => {
                        return ExamResult::from_json(&json)
                            .map_err(|e| MachineError::Protocol(format!("unreadable result: {e:#}")))
                    }
                    SessionRecord::Error(message) => {
                        return Ok(ExamResult::from_error(
                            Origin::Recorded,
                            ErrorDomain::Unexpected,
                            format!("session on {} died: {message}", self.name),
                            BTreeMap::new(),
                        ))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Machine for HttpMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_exam(
        &self,
        batch_id: &str,
        command: &TakeExamCommand,
        orchestration: &Orchestration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExamResult> {
        self.drive(batch_id, command, orchestration, progress)
            .await
            .map_err(|e| {
                tracing::error!("{}: {e}", self.name);
                DomainError::from(e).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use examcheck_core::command::TAKE_EXAM;
    use examcheck_core::error::classify;
    use examcheck_core::question::QuestionSet;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        screenshots: Mutex<usize>,
    }

    impl ProgressReporter for Recorder {
        fn report(&self, origin: &str, message: &str) {
            self.lines.lock().push(format!("[{origin}] {message}"));
        }

        fn on_screenshot(&self, _origin: &str, _png: &[u8]) {
            *self.screenshots.lock() += 1;
        }
    }

    fn command() -> TakeExamCommand {
        TakeExamCommand {
            command: TAKE_EXAM.to_string(),
            machine: "machine1".into(),
            machine_index: 1,
            username: "tu_1".into(),
            password: "pw".into(),
            test_id: "1".into(),
            test_url: "sim://exam/test/1".into(),
            server_url: "sim://exam".into(),
            wait_time: 0.0,
            admin_lang: Default::default(),
            questions: QuestionSet::demo(),
            exam_configuration: Default::default(),
            settings: Default::default(),
            workarounds: Default::default(),
        }
    }

    fn done_json() -> String {
        ExamResult::new(Origin::Recorded).to_json().unwrap()
    }

    async fn mount_start(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/start/[^/]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "started"})))
            .mount(server)
            .await;
    }

    fn machine(server: &MockServer) -> HttpMachine {
        HttpMachine::new("machine1", &server.uri())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
            .with_retries(1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn monitor_index_advances() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/[^/]+/0$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                ["ECHO", "one"],
                ["SCREENSHOT", "cG5n"],
                ["ECHO", "two"]
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/[^/]+/3$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([["DONE", done_json()]])))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Recorder::default();
        let m = machine(&server);
        let result = m
            .take_exam("b1", &command(), &Orchestration::new(), &recorder)
            .await
            .unwrap();
        assert!(!result.has_errors());
        assert_eq!(*recorder.lines.lock(), ["[machine1] one", "[machine1] two"]);
        assert_eq!(*recorder.screenshots.lock(), 1);
        assert_eq!(m.last_screenshot().as_deref(), Some(&b"png"[..]));
    }

    #[tokio::test]
    async fn error_record_becomes_error_result() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([["ERROR", "segfault"]])))
            .mount(&server)
            .await;

        let result = machine(&server)
            .take_exam("b1", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap();
        assert_eq!(result.most_severe_error_domain(), ErrorDomain::Unexpected);
        assert!(result
            .error_message(ErrorDomain::Unexpected)
            .is_some_and(|m| m.contains("segfault")));
    }

    #[tokio::test]
    async fn unknown_record_is_interaction_error() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([["BEEP", ""]])))
            .mount(&server)
            .await;

        let err = machine(&server)
            .take_exam("b1", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorDomain::Interaction);
        assert!(err.to_string().contains("BEEP"));
    }

    #[tokio::test]
    async fn failed_start_is_interaction_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = machine(&server)
            .take_exam("b1", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorDomain::Interaction);
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn busy_machine_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})))
            .mount(&server)
            .await;

        let err = machine(&server)
            .take_exam("b1", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn repeated_start_goes_on_to_monitor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/start/20261016-b7$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "already_started"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/20261016-b7/0$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([["DONE", done_json()]])))
            .expect(1)
            .mount(&server)
            .await;

        let result = machine(&server)
            .take_exam("20261016-b7", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap();
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn unreachable_machine_gives_up() {
        let m = HttpMachine::new("gone", "http://127.0.0.1:9")
            .unwrap()
            .with_retries(2, Duration::from_millis(1));
        let err = m
            .take_exam("b1", &command(), &Orchestration::new(), &Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorDomain::Interaction);
        assert!(err.to_string().contains("cannot reach"));
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let orchestration = Orchestration::new();
        let canceller = orchestration.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = machine(&server)
            .take_exam("b1", &command(), &orchestration, &Recorder::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn screenshot_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/screenshot/b1$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"screenshot": "cG5n"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/screenshot/b2$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"screenshot": null})))
            .mount(&server)
            .await;

        let m = machine(&server);
        assert_eq!(m.screenshot("b1").await.unwrap().as_deref(), Some(&b"png"[..]));
        assert_eq!(m.screenshot("b2").await.unwrap(), None);
    }

    /// Answers `[]` twice per path, then `DONE`, and records when each
    /// monitor request arrived.
    struct Probe {
        arrivals: Mutex<Vec<Instant>>,
        calls: Mutex<HashMap<String, usize>>,
        done: String,
    }

    struct ProbeHandle(Arc<Probe>);

    const PROBE_DELAY: Duration = Duration::from_millis(30);

    impl Respond for ProbeHandle {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            self.0.arrivals.lock().push(Instant::now());
            let mut calls = self.0.calls.lock();
            let n = calls.entry(request.url.path().to_string()).or_default();
            *n += 1;
            let body = if *n >= 3 {
                serde_json::json!([["DONE", self.0.done]])
            } else {
                serde_json::json!([])
            };
            ResponseTemplate::new(200)
                .set_body_json(body)
                .set_delay(PROBE_DELAY)
        }
    }

    #[tokio::test]
    async fn monitor_polls_never_overlap() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        let probe = Arc::new(Probe {
            arrivals: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            done: done_json(),
        });
        Mock::given(method("GET"))
            .and(path_regex(r"^/monitor/"))
            .respond_with(ProbeHandle(Arc::clone(&probe)))
            .mount(&server)
            .await;

        let orchestration = Orchestration::new();
        let recorder = Recorder::default();
        let machines: Vec<HttpMachine> = (0..3).map(|_| machine(&server)).collect();
        let cmd = command();
        let outcomes = take_all(&machines, &cmd, &orchestration, &recorder).await;
        assert!(outcomes.iter().all(|r| r.is_ok()));

        let mut arrivals = probe.arrivals.lock().clone();
        arrivals.sort();
        assert_eq!(arrivals.len(), 9);
        for pair in arrivals.windows(2) {
            assert!(pair[1] - pair[0] >= PROBE_DELAY, "monitor requests overlapped");
        }
    }

    async fn take_all(
        machines: &[HttpMachine],
        command: &TakeExamCommand,
        orchestration: &Orchestration,
        recorder: &Recorder,
    ) -> Vec<Result<ExamResult>> {
        let (a, b, c) = tokio::join!(
            machines[0].take_exam("b1", command, orchestration, recorder),
            machines[1].take_exam("b2", command, orchestration, recorder),
            machines[2].take_exam("b3", command, orchestration, recorder),
        );
        vec![a, b, c]
    }
}
