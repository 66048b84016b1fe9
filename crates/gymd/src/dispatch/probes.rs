//! Ordered command probes.
//!
//! A request object may carry several commands at once. They are evaluated
//! in a fixed order: the first probe whose key is present and that produces a
//! reply usually finishes the record, while configuration-style probes
//! (compression, seed, export, monitor) let evaluation continue.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::registry::{InstanceId, Registry, RegistryError};
use crate::simulation::{
    EngineError, EpisodeRecorder, RecordingOptions, Simulation, start_recording,
};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::export::RecordingExporter;
use super::request::{Request, flag};
use super::response::{Outbound, Reply};
use super::session::{SessionEnd, SessionState};

/// Whether evaluation continues with the next probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Finish,
}

type ProbeFn = fn(&Dispatcher, &Request, &mut ProbeScope<'_>) -> Result<Flow, DispatchError>;

/// One recognised command shape.
pub(crate) struct Probe {
    pub(crate) name: &'static str,
    run: ProbeFn,
}

/// Probes in evaluation order.
pub(crate) const PROBES: &[Probe] = &[
    Probe {
        name: "empty",
        run: empty_payload,
    },
    Probe {
        name: "env.name",
        run: select_environment,
    },
    Probe {
        name: "server.compression",
        run: negotiate_compression,
    },
    Probe {
        name: "env.actionspace",
        run: sample_action,
    },
    Probe {
        name: "env.action",
        run: environment_action,
    },
    Probe {
        name: "step",
        run: step,
    },
    Probe {
        name: "env.seed",
        run: seed,
    },
    Probe {
        name: "url",
        run: export_recording,
    },
    Probe {
        name: "monitor",
        run: monitor,
    },
];

/// Result of dispatching one record.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Messages to send, in order.
    pub outbound: Vec<Outbound>,
    /// Set when the session must end after sending `outbound`.
    pub end: Option<SessionEnd>,
}

struct ProbeScope<'a> {
    state: &'a mut SessionState,
    outcome: DispatchOutcome,
}

impl ProbeScope<'_> {
    fn reply(&mut self, reply: Reply) {
        self.outcome.outbound.push(reply.into());
    }

    fn end(&mut self, end: SessionEnd) {
        self.outcome.end = Some(end);
    }
}

/// Evaluates request records against the probe table.
pub struct Dispatcher {
    registry: Arc<Registry>,
    exporter: Arc<dyn RecordingExporter>,
    recording_root: Utf8PathBuf,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("recording_root", &self.recording_root)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over shared services.
    pub fn new(
        registry: Arc<Registry>,
        exporter: Arc<dyn RecordingExporter>,
        recording_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            registry,
            exporter,
            recording_root: recording_root.into(),
        }
    }

    /// Registry shared by every session.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handles one record, mutating `state` and collecting replies.
    ///
    /// Faults abort the remaining probes. They are logged and answered with
    /// an empty acknowledgement unless a reply was already produced.
    pub fn dispatch(&self, record: &str, state: &mut SessionState) -> DispatchOutcome {
        let mut scope = ProbeScope {
            state,
            outcome: DispatchOutcome::default(),
        };

        match Request::parse(record) {
            Ok(request) => self.run_probes(&request, &mut scope),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, kind = %error.kind(), %error, "rejected record");
            }
        }

        let mut outcome = scope.outcome;
        if outcome.outbound.is_empty() && outcome.end.is_none() {
            outcome.outbound.push(Reply::Ack {}.into());
        }
        outcome
    }

    fn run_probes(&self, request: &Request, scope: &mut ProbeScope<'_>) {
        for probe in PROBES {
            match (probe.run)(self, request, scope) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finish) => {
                    debug!(target: DISPATCH_TARGET, probe = probe.name, "record handled");
                    return;
                }
                Err(error) => {
                    warn!(
                        target: DISPATCH_TARGET,
                        probe = probe.name,
                        kind = %error.kind(),
                        %error,
                        "command failed"
                    );
                    if error.closes_connection() {
                        scope.end(SessionEnd::TeardownFault);
                    }
                    return;
                }
            }
        }
    }

    fn close_instance(&self, id: &InstanceId) -> Result<(), DispatchError> {
        match self.registry.close(id) {
            Ok(()) | Err(RegistryError::UnknownInstance { .. }) => Ok(()),
            Err(error) => Err(DispatchError::teardown(id, error)),
        }
    }

    fn with_active<F, T>(&self, state: &SessionState, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut dyn Simulation) -> Result<T, EngineError>,
    {
        let id = state.require_active()?;
        Ok(self.registry.with_instance(id, f)??)
    }
}

fn empty_payload(
    _dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    if !request.is_empty() {
        return Ok(Flow::Continue);
    }
    let closed = scope.state.release_all();
    debug!(target: DISPATCH_TARGET, closed, "empty record released session instances");
    scope.outcome.outbound.push(Outbound::ErrorToken);
    scope.end(SessionEnd::EmptyRecord);
    Ok(Flow::Finish)
}

fn select_environment(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let Some(name) = request.nested_str("env", "name") else {
        return Ok(Flow::Continue);
    };
    scope.state.set_compression_level(0);
    if let Some(previous) = scope.state.deactivate() {
        dispatcher.close_instance(&previous)?;
    }
    let id = dispatcher.registry.create(name)?;
    scope.state.activate(id.clone());
    scope.reply(Reply::Instance { instance: id });
    Ok(Flow::Finish)
}

fn negotiate_compression(
    _dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let Some(text) = request.nested_str("server", "compression") else {
        return Ok(Flow::Continue);
    };
    match text.trim().parse::<u32>() {
        Ok(level) => scope.state.set_compression_level(level),
        Err(error) => {
            warn!(
                target: DISPATCH_TARGET,
                value = text,
                %error,
                "unparseable compression level, closing after reply"
            );
            scope.state.set_compression_level(0);
            scope.state.mark_pending_close();
        }
    }
    Ok(Flow::Continue)
}

fn sample_action(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    if request.nested_str("env", "actionspace") != Some("sample") {
        return Ok(Flow::Continue);
    }
    let sample = dispatcher.with_active(scope.state, |simulation| Ok(simulation.sample_action()))?;
    scope.reply(Reply::Sample { sample });
    Ok(Flow::Finish)
}

fn environment_action(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let reply = match request.nested_str("env", "action") {
        Some("close") => {
            if let Some(id) = scope.state.deactivate() {
                dispatcher.close_instance(&id)?;
            }
            scope.end(SessionEnd::ClientClose);
            return Ok(Flow::Finish);
        }
        Some("reset") => Reply::Observation {
            observation: dispatcher.with_active(scope.state, |simulation| simulation.reset())?,
        },
        Some("actionspace") => Reply::Space {
            info: dispatcher
                .with_active(scope.state, |simulation| Ok(simulation.action_space().describe()))?,
        },
        Some("observationspace") => Reply::Space {
            info: dispatcher.with_active(scope.state, |simulation| {
                Ok(simulation.observation_space().describe())
            })?,
        },
        _ => return Ok(Flow::Continue),
    };
    scope.reply(reply);
    Ok(Flow::Finish)
}

fn step(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let Some(step) = request.field("step") else {
        return Ok(Flow::Continue);
    };
    let step = step
        .as_object()
        .ok_or_else(|| DispatchError::malformed("step must be an object"))?;
    let action = step
        .get("action")
        .ok_or_else(|| DispatchError::malformed("step is missing its action"))?;
    let render = flag(step.get("render"));
    let transition =
        dispatcher.with_active(scope.state, |simulation| simulation.step(action, render))?;
    scope.reply(Reply::step(transition));
    Ok(Flow::Finish)
}

fn seed(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let Some(text) = request.nested_str("env", "seed") else {
        return Ok(Flow::Continue);
    };
    let value = text
        .trim()
        .parse::<u64>()
        .map_err(|error| DispatchError::malformed(format!("invalid seed '{text}': {error}")))?;
    dispatcher.with_active(scope.state, |simulation| simulation.seed(value))?;
    Ok(Flow::Continue)
}

fn export_recording(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    if request.field("url").is_none() {
        return Ok(Flow::Continue);
    }
    let id = scope.state.require_active()?.clone();
    dispatcher.registry.lookup(&id)?;
    let url = dispatcher.exporter.export(&id)?;
    scope.reply(Reply::Url {
        url: url.to_string(),
    });
    Ok(Flow::Continue)
}

fn monitor(
    dispatcher: &Dispatcher,
    request: &Request,
    scope: &mut ProbeScope<'_>,
) -> Result<Flow, DispatchError> {
    let Some(monitor) = request.field("monitor") else {
        return Ok(Flow::Continue);
    };
    let monitor = monitor
        .as_object()
        .ok_or_else(|| DispatchError::malformed("monitor must be an object"))?;

    match monitor.get("action").and_then(|action| action.as_str()) {
        Some("start") => {
            let id = scope.state.require_active()?.clone();
            if let Some(requested) = monitor.get("directory").and_then(|dir| dir.as_str()) {
                debug!(target: DISPATCH_TARGET, %id, requested, "client directory ignored");
            }
            let recording = dispatcher
                .registry
                .with_instance(&id, |simulation| {
                    simulation
                        .is_recording()
                        .then(|| simulation.recording_directory().map(ToOwned::to_owned))
                })?;
            if let Some(directory) = recording {
                return Err(EngineError::AlreadyRecording {
                    directory: directory.unwrap_or_default(),
                }
                .into());
            }

            let recorder = EpisodeRecorder::open(RecordingOptions {
                directory: dispatcher.recording_root.join(id.as_str()),
                force: flag(monitor.get("force")),
                resume: flag(monitor.get("resume")),
            })?;
            dispatcher.registry.rebind(&id, |mut simulation| {
                match simulation.adopt_recorder(recorder) {
                    None => simulation,
                    Some(recorder) => start_recording(simulation, recorder),
                }
            })?;
            debug!(target: DISPATCH_TARGET, %id, "recording started");
        }
        Some("close") => {
            dispatcher.with_active(scope.state, |simulation| simulation.stop_recording())?;
        }
        _ => {}
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
#[path = "probes_tests.rs"]
mod tests;
