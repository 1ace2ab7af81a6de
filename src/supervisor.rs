//! Startup and shutdown ordering: spins up every route's broadcast pump with
//! a shared dead-connection callback, and tears all of it back down in
//! reverse on shutdown.

use crate::ids::ConnectionId;
use crate::state::AppState;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the background tasks started at boot: one drain task per route's
/// [`crate::pump::BroadcastPump`]. Dropping a `Supervisor` does not stop
/// anything. Call [`Supervisor::shutdown`] explicitly so cancellation is
/// ordered and awaited.
pub struct Supervisor {
    pump_handles: Vec<JoinHandle<()>>,
    state: Arc<AppState>,
}

impl Supervisor {
    /// Spawns every route's pump drain task. A dead connection discovered by
    /// any pump is torn down across *every* route, not just the one that
    /// noticed, since a closed send channel means the whole connection is
    /// gone.
    pub fn start(state: Arc<AppState>) -> Self {
        let on_send_failure: Arc<dyn Fn(ConnectionId) + Send + Sync> = {
            let state = Arc::clone(&state);
            Arc::new(move |connection: ConnectionId| {
                for route in state.routes.values() {
                    route.teardown_connection(&state.connections, connection);
                }
                state.connections.deregister(connection);
            })
        };

        let pump_handles = state
            .routes
            .values()
            .map(|route| route.pump().spawn(Arc::clone(&on_send_failure)))
            .collect();

        Self { pump_handles, state }
    }

    /// Aborts every pump drain task and every engine's background generators.
    /// Order doesn't matter for correctness here (nothing left running can
    /// observe a partially torn down engine) but pumps go first so no engine
    /// callback races a drain task that is already gone.
    pub async fn shutdown(self) {
        for handle in self.pump_handles {
            handle.abort();
        }
        self.state.datafeed.shutdown();
        self.state.broker.shutdown();
    }
}
