use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use common::{EngineCommand, EngineState};

/// Cloneable handle for controlling a running live driver from other tasks
/// (signal handlers, operators).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!("Engine command channel closed");
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }
}

/// Receiving side of the command channel, owned by the live driver.
pub struct EngineControl {
    pub(crate) command_rx: mpsc::Receiver<EngineCommand>,
    pub(crate) state: Arc<RwLock<EngineState>>,
}

impl EngineControl {
    pub(crate) async fn set_state(&self, state: EngineState) {
        *self.state.write().await = state;
    }
}

/// Create a connected handle/control pair. The engine starts `Stopped`.
pub fn control_channel() -> (EngineHandle, EngineControl) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let state = Arc::new(RwLock::new(EngineState::Stopped));
    (
        EngineHandle {
            command_tx,
            state: state.clone(),
        },
        EngineControl { command_rx, state },
    )
}
