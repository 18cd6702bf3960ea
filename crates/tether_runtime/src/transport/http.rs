use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::config::{EngineConfig, RunMode};
use crate::errors::EngineError;
use crate::model::{Checkpoint, CreatedThread, HistoryPage, ThreadSnapshot};

use super::{
    request_failure_message, EngineTransport, RunBody, RunReply, RunRequest, TransportFuture,
};

#[derive(Serialize)]
struct CreateThreadBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Serialize)]
struct StartRunBody<'a> {
    thread_id: &'a str,
    message: &'a str,
    use_hitl: bool,
}

#[derive(Serialize)]
struct ResumeRunBody<'a> {
    thread_id: &'a str,
    approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_args: Option<&'a Map<String, Value>>,
}

#[derive(Serialize)]
struct UpdateStateBody<'a> {
    thread_id: &'a str,
    updates: &'a Map<String, Value>,
}

/// `reqwest`-backed transport for the engine's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let base_url = config.resolve_base_url()?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            base_url,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append percent-encoded path segments under the base URL.
    /// Allocation: one Url. Complexity: O(url length).
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| EngineError::InvalidConfig("base url cannot carry paths".to_owned()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn rest(&self, request: RequestBuilder) -> RequestBuilder {
        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, EngineError> {
        let response = self.rest(self.http.get(url)).send().await?;
        read_json(ensure_success(response).await?).await
    }

    async fn post_run_reply<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<RunBody, EngineError> {
        let response = self.http.post(url).json(body).send().await?;
        let reply: RunReply = read_json(ensure_success(response).await?).await?;
        Ok(RunBody::Reply(reply))
    }

    async fn post_run_stream<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<RunBody, EngineError> {
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(EngineError::from))
            .boxed();
        Ok(RunBody::Events(stream))
    }
}

impl EngineTransport for HttpTransport {
    fn create_thread<'a>(
        &'a self,
        thread_id: Option<&'a str>,
    ) -> TransportFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads"])?;
            let response = self
                .rest(self.http.post(url))
                .json(&CreateThreadBody { thread_id })
                .send()
                .await?;
            let created: CreatedThread = read_json(ensure_success(response).await?).await?;
            Ok(created.thread_id)
        })
    }

    fn thread_state<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads", thread_id, "state"])?;
            self.get_json(url).await
        })
    }

    fn thread_history<'a>(
        &'a self,
        thread_id: &'a str,
        limit: usize,
    ) -> TransportFuture<'a, Result<Vec<Checkpoint>, EngineError>> {
        Box::pin(async move {
            let mut url = self.endpoint(&["threads", thread_id, "history"])?;
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
            let page: HistoryPage = self.get_json(url).await?;
            Ok(page.checkpoints)
        })
    }

    fn checkpoint_state<'a>(
        &'a self,
        thread_id: &'a str,
        checkpoint_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>> {
        Box::pin(async move {
            let url =
                self.endpoint(&["threads", thread_id, "checkpoints", checkpoint_id, "state"])?;
            self.get_json(url).await
        })
    }

    fn update_state<'a>(
        &'a self,
        thread_id: &'a str,
        updates: Map<String, Value>,
    ) -> TransportFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads", thread_id, "update"])?;
            let response = self
                .rest(self.http.post(url))
                .json(&UpdateStateBody {
                    thread_id,
                    updates: &updates,
                })
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn open_run<'a>(
        &'a self,
        request: RunRequest,
    ) -> TransportFuture<'a, Result<RunBody, EngineError>> {
        Box::pin(async move {
            match &request {
                RunRequest::Start {
                    thread_id,
                    message,
                    use_hitl,
                    mode,
                } => {
                    let body = StartRunBody {
                        thread_id,
                        message,
                        use_hitl: *use_hitl,
                    };
                    match mode {
                        RunMode::Streaming => {
                            let url = self.endpoint(&["runs", "stream"])?;
                            self.post_run_stream(url, &body).await
                        }
                        RunMode::Blocking => {
                            let url = self.endpoint(&["runs", "invoke"])?;
                            self.post_run_reply(url, &body).await
                        }
                    }
                }
                RunRequest::Resume {
                    thread_id,
                    approved,
                    modified_args,
                } => {
                    let url = self.endpoint(&["runs", "resume"])?;
                    let body = ResumeRunBody {
                        thread_id,
                        approved: *approved,
                        modified_args: modified_args.as_ref(),
                    };
                    self.post_run_reply(url, &body).await
                }
                RunRequest::ResumeFromCheckpoint {
                    thread_id,
                    checkpoint_id,
                    new_input,
                } => {
                    let url = self.endpoint(&[
                        "threads",
                        thread_id.as_str(),
                        "checkpoints",
                        checkpoint_id.as_str(),
                        "resume",
                    ])?;
                    let body = new_input.clone().unwrap_or(Value::Null);
                    self.post_run_reply(url, &body).await
                }
            }
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response, EngineError> {
    let status = response.status().as_u16();
    if status < 400 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::Server {
        status: Some(status),
        message: request_failure_message(status, &body),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, EngineError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|err| EngineError::Protocol(format!("invalid response body: {err}")))
}
