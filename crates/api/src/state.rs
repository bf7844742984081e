use std::sync::Arc;

use services::{BufferService, RealtimeService, SessionService};

/// Shared handles injected into every route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub buffers: Arc<BufferService>,
    pub realtime: Arc<RealtimeService>,
}
