use std::sync::Arc;

use tether_runtime::{
    EngineConfig, EngineError, EngineTransport, HttpTransport, RunController, RunState,
    ThreadView,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no active thread; call new_thread or open_thread first")]
    NoActiveThread,
}

/// Entry point: owns the transport and the one controller bound to the active thread.
///
/// Switching threads abandons whatever run the previous controller had open. Nothing
/// is sent to the engine for the abandoned run.
pub struct Client {
    transport: Arc<dyn EngineTransport>,
    config: EngineConfig,
    active: Option<RunController>,
}

impl Client {
    /// Build the HTTP transport. No request is made until the first thread call.
    pub fn connect(config: EngineConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Connect with env/default engine URL.
    pub fn connect_default() -> Result<Self, ClientError> {
        Self::connect(EngineConfig::new())
    }

    pub fn with_transport(transport: Arc<dyn EngineTransport>, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ask the engine for a fresh thread and make it active.
    pub async fn new_thread(&mut self) -> Result<&mut RunController, ClientError> {
        let thread_id = self.transport.create_thread(None).await?;
        tracing::info!(thread_id = %thread_id, "created thread");
        Ok(self.switch_thread(thread_id))
    }

    /// Make an existing thread active and load its head state and history.
    pub async fn open_thread(
        &mut self,
        thread_id: impl Into<String>,
    ) -> Result<&mut RunController, ClientError> {
        let controller = self.switch_thread(thread_id);
        controller.refresh().await?;
        Ok(controller)
    }

    /// Replace the active controller without any request.
    pub fn switch_thread(&mut self, thread_id: impl Into<String>) -> &mut RunController {
        if let Some(mut previous) = self.active.take() {
            previous.abandon();
        }
        let controller = RunController::new(
            Arc::clone(&self.transport),
            thread_id,
            self.config.clone(),
        );
        self.active.insert(controller)
    }

    pub fn active(&self) -> Option<&RunController> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Result<&mut RunController, ClientError> {
        self.active.as_mut().ok_or(ClientError::NoActiveThread)
    }

    /// Current view of the active thread.
    pub fn view(&self) -> Option<Arc<ThreadView>> {
        self.active.as_ref().map(|controller| controller.store().snapshot())
    }

    /// Send one message on the active thread and wait for the run to settle.
    pub async fn send(&mut self, message: impl Into<String>) -> Result<RunState, ClientError> {
        let controller = self.active_mut()?;
        controller.invoke(message).await?;
        Ok(controller.drive().await?)
    }

    /// Answer the pending approval and wait for the resumed run to settle.
    pub async fn approve(&mut self, approved: bool) -> Result<RunState, ClientError> {
        let controller = self.active_mut()?;
        controller.decide(approved).await?;
        Ok(controller.drive().await?)
    }

    /// Edit the active thread's head state, e.g. a pending tool call before approving it.
    pub async fn edit_state(
        &mut self,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ClientError> {
        Ok(self.active_mut()?.update_state(updates).await?)
    }

    /// Fork the active thread at `checkpoint_id` and wait for the new run to settle.
    pub async fn fork(
        &mut self,
        checkpoint_id: &str,
        new_input: Option<serde_json::Value>,
    ) -> Result<RunState, ClientError> {
        let controller = self.active_mut()?;
        controller.resume_from(checkpoint_id, new_input).await?;
        Ok(controller.drive().await?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("active", &self.active)
            .finish()
    }
}

/// One-shot convenience: new thread, one message, settled view.
pub async fn ask(message: impl Into<String>) -> Result<Arc<ThreadView>, ClientError> {
    ask_with_config(EngineConfig::new(), message).await
}

pub async fn ask_with_config(
    config: EngineConfig,
    message: impl Into<String>,
) -> Result<Arc<ThreadView>, ClientError> {
    let mut client = Client::connect(config)?;
    client.new_thread().await?;
    client.send(message).await?;
    client.view().ok_or(ClientError::NoActiveThread)
}
