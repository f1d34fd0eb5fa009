//! Local typing indicator with a debounce timer.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};

use crate::domain::UserId;
use crate::infrastructure::dto::websocket::ClientEvent;
use crate::sync::lock;
use crate::transport::ConnectionManager;

#[derive(Default)]
struct TypingState {
    is_typing: bool,
    last_keystroke: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is re-armed or cancelled
    timer_generation: u64,
}

impl TypingState {
    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Emits typing start once per episode and typing stop after a quiet period
pub struct TypingIndicator {
    manager: Arc<ConnectionManager>,
    peer: UserId,
    debounce: Duration,
    state: Arc<Mutex<TypingState>>,
}

impl TypingIndicator {
    pub fn new(manager: Arc<ConnectionManager>, peer: UserId, debounce: Duration) -> Self {
        Self {
            manager,
            peer,
            debounce,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    /// Record a change of the input field.
    pub fn on_input(&self, has_content: bool) {
        let mut state = lock(&self.state);
        if !has_content {
            if state.is_typing {
                self.stop_locked(&mut state);
            }
            return;
        }

        state.last_keystroke = Some(Instant::now());
        if !state.is_typing {
            state.is_typing = true;
            emit_typing(&self.manager, &self.peer, true);
        }

        state.cancel_timer();
        let generation = state.timer_generation;
        let shared = Arc::clone(&self.state);
        let manager = Arc::clone(&self.manager);
        let peer = self.peer.clone();
        let debounce = self.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut state = lock(&shared);
            if state.timer_generation != generation || !state.is_typing {
                return;
            }
            state.is_typing = false;
            state.timer = None;
            emit_typing(&manager, &peer, false);
        }));
    }

    /// End the current typing episode, if any.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if state.is_typing {
            self.stop_locked(&mut state);
        } else {
            state.cancel_timer();
        }
    }

    pub fn is_typing(&self) -> bool {
        lock(&self.state).is_typing
    }

    pub fn last_keystroke(&self) -> Option<Instant> {
        lock(&self.state).last_keystroke
    }

    fn stop_locked(&self, state: &mut TypingState) {
        state.cancel_timer();
        state.is_typing = false;
        emit_typing(&self.manager, &self.peer, false);
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        lock(&self.state).cancel_timer();
    }
}

fn emit_typing(manager: &ConnectionManager, peer: &UserId, is_typing: bool) {
    if let Err(e) = manager.emit(ClientEvent::typing(peer.as_str(), is_typing)) {
        tracing::debug!("Typing indicator not sent: {}", e);
    }
}
