//! Supervises daemon launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::info;

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::SessionConnectionHandler;
use crate::health::HealthReporter;
use crate::simulation::{BuiltinEngine, SimulationEngine};
use crate::transport::SocketListener;

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) engine: Arc<dyn SimulationEngine>,
    pub(crate) shutdown: S,
}

/// Runs the daemon using the production collaborators.
///
/// Blocks until a termination signal arrives.
///
/// # Errors
///
/// Returns a [`LaunchError`] when bootstrap, the listener, or the signal
/// handlers fail.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        engine: Arc::new(BuiltinEngine::new()),
        shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        engine,
        shutdown,
    } = plan;

    let daemon = bootstrap_with(&loader, reporter, engine)?;
    let config = daemon.config();
    info!(
        target: PROCESS_TARGET,
        socket = %config.listen_socket(),
        "starting daemon runtime"
    );

    let listener = SocketListener::bind(config.listen_socket())?;
    let handler = Arc::new(SessionConnectionHandler::new(
        Arc::clone(daemon.dispatcher()),
        config,
    ));
    let listener_handle = listener.start(handler)?;
    daemon.reporter().listener_ready(config.listen_socket());

    let waited = shutdown.wait();
    listener_handle.shutdown();
    let joined = listener_handle.join();
    daemon.reap_instances();
    waited?;
    joined?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}
