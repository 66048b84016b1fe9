//! Trajectory recording around a live simulation.
//!
//! Opening a recorder is the only fallible stage: it validates the target
//! directory before any instance is touched. Wrapping a handle afterwards
//! cannot fail, so the registry can rebind a slot without risking the
//! instance.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::video::{FrameVideo, VIDEO_EXTENSION};
use super::{EngineError, Simulation, Space, Transition};

const EPISODE_PREFIX: &str = "episode-";
const STEPS_SUFFIX: &str = ".jsonl";
const FRAMES_SUFFIX: &str = ".frames.txt";
const MANIFEST_FILE: &str = "manifest.json";

/// Where and how to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOptions {
    /// Directory receiving episode files.
    pub directory: Utf8PathBuf,
    /// Clear existing recordings first.
    pub force: bool,
    /// Continue numbering after existing recordings.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct EpisodeSummary {
    episode: u32,
    length: u64,
    total_reward: f64,
}

#[derive(Serialize)]
struct Manifest<'a> {
    simulation: &'a str,
    episodes: &'a [EpisodeSummary],
}

struct EpisodeFiles {
    index: u32,
    steps: BufWriter<File>,
    frames: Option<BufWriter<File>>,
    video: Option<FrameVideo>,
    length: u64,
    total_reward: f64,
}

/// Validated recording target, ready to wrap a simulation.
pub struct EpisodeRecorder {
    directory: Utf8PathBuf,
    next_episode: u32,
    current: Option<EpisodeFiles>,
    summaries: Vec<EpisodeSummary>,
}

impl std::fmt::Debug for EpisodeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeRecorder")
            .field("directory", &self.directory)
            .field("next_episode", &self.next_episode)
            .field("episodes", &self.summaries.len())
            .finish()
    }
}

impl EpisodeRecorder {
    /// Prepares `options.directory` for recording.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RecordingExists`] when the directory already
    /// holds recordings and neither `force` nor `resume` is set, and
    /// [`EngineError::RecordingIo`] when the directory cannot be prepared.
    pub fn open(options: RecordingOptions) -> Result<Self, EngineError> {
        let RecordingOptions {
            directory,
            force,
            resume,
        } = options;
        fs::create_dir_all(&directory)
            .map_err(|source| EngineError::recording_io(&directory, source))?;

        let existing = existing_episodes(&directory)?;
        let next_episode = match existing.iter().max() {
            None => 0,
            Some(_) if force => {
                clear_recordings(&directory)?;
                0
            }
            Some(last) if resume => last.saturating_add(1),
            Some(_) => return Err(EngineError::RecordingExists { directory }),
        };

        debug!(%directory, next_episode, force, resume, "recording directory prepared");
        Ok(Self {
            directory,
            next_episode,
            current: None,
            summaries: Vec::new(),
        })
    }

    /// Directory receiving episode files.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    fn begin_episode(&mut self, observation: Option<&Value>) -> Result<(), EngineError> {
        self.end_episode()?;
        let index = self.next_episode;
        self.next_episode = self.next_episode.saturating_add(1);
        let path = self.episode_path(index, STEPS_SUFFIX);
        let file =
            File::create(&path).map_err(|source| EngineError::recording_io(&path, source))?;
        let mut episode = EpisodeFiles {
            index,
            steps: BufWriter::new(file),
            frames: None,
            video: None,
            length: 0,
            total_reward: 0.0,
        };
        if let Some(observation) = observation {
            write_line(&mut episode.steps, &path, &json!({ "observation": observation }))?;
        }
        self.current = Some(episode);
        Ok(())
    }

    fn record_step(
        &mut self,
        action: &Value,
        transition: &Transition,
        frame: Option<String>,
    ) -> Result<(), EngineError> {
        if self.current.is_none() {
            self.begin_episode(None)?;
        }
        let steps_path = self.current_path(STEPS_SUFFIX);
        let frames_path = self.current_path(FRAMES_SUFFIX);
        let video_path = self.current_path(&format!(".{VIDEO_EXTENSION}"));
        let Some(episode) = self.current.as_mut() else {
            return Ok(());
        };
        episode.length += 1;
        episode.total_reward += transition.reward;
        let line = json!({
            "action": action,
            "observation": transition.observation,
            "reward": super::wire_float(transition.reward),
            "done": transition.done,
            "info": transition.info,
        });
        write_line(&mut episode.steps, &steps_path, &line)?;

        if let Some(frame) = frame {
            if episode.frames.is_none() {
                let file = File::create(&frames_path)
                    .map_err(|source| EngineError::recording_io(&frames_path, source))?;
                episode.frames = Some(BufWriter::new(file));
            }
            if let Some(frames) = episode.frames.as_mut() {
                writeln!(frames, "{frame}")
                    .map_err(|source| EngineError::recording_io(&frames_path, source))?;
            }
            if episode.video.is_none() {
                episode.video = Some(FrameVideo::create(video_path)?);
            }
            if let Some(video) = episode.video.as_mut() {
                video.push(&frame)?;
            }
        }

        if transition.done {
            self.end_episode()?;
        }
        Ok(())
    }

    fn end_episode(&mut self) -> Result<(), EngineError> {
        let Some(mut episode) = self.current.take() else {
            return Ok(());
        };
        let path = self.episode_path(episode.index, STEPS_SUFFIX);
        episode
            .steps
            .flush()
            .map_err(|source| EngineError::recording_io(&path, source))?;
        if let Some(frames) = episode.frames.as_mut() {
            frames
                .flush()
                .map_err(|source| EngineError::recording_io(&path, source))?;
        }
        if let Some(video) = episode.video.as_mut() {
            video.flush()?;
        }
        self.summaries.push(EpisodeSummary {
            episode: episode.index,
            length: episode.length,
            total_reward: episode.total_reward,
        });
        Ok(())
    }

    fn finish(&mut self, simulation: &str) -> Result<(), EngineError> {
        self.end_episode()?;
        let path = self.directory.join(MANIFEST_FILE);
        let manifest = Manifest {
            simulation,
            episodes: &self.summaries,
        };
        let text = serde_json::to_string_pretty(&manifest)?;
        fs::write(&path, text).map_err(|source| EngineError::recording_io(&path, source))
    }

    fn episode_path(&self, index: u32, suffix: &str) -> Utf8PathBuf {
        self.directory
            .join(format!("{EPISODE_PREFIX}{index:06}{suffix}"))
    }

    fn current_path(&self, suffix: &str) -> Utf8PathBuf {
        let index = self.current.as_ref().map_or(0, |episode| episode.index);
        self.episode_path(index, suffix)
    }
}

fn write_line(
    writer: &mut BufWriter<File>,
    path: &Utf8Path,
    value: &Value,
) -> Result<(), EngineError> {
    serde_json::to_writer(&mut *writer, value)?;
    writer
        .write_all(b"\n")
        .map_err(|source| EngineError::recording_io(path, source))
}

fn episode_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(EPISODE_PREFIX)?
        .strip_suffix(STEPS_SUFFIX)?
        .parse()
        .ok()
}

fn existing_episodes(directory: &Utf8Path) -> Result<Vec<u32>, EngineError> {
    let entries =
        directory.read_dir_utf8().map_err(|source| EngineError::recording_io(directory, source))?;
    let mut indices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::recording_io(directory, source))?;
        if let Some(index) = episode_index(entry.file_name()) {
            indices.push(index);
        }
    }
    Ok(indices)
}

fn clear_recordings(directory: &Utf8Path) -> Result<(), EngineError> {
    let entries =
        directory.read_dir_utf8().map_err(|source| EngineError::recording_io(directory, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::recording_io(directory, source))?;
        let name = entry.file_name();
        if name.starts_with(EPISODE_PREFIX) || name == MANIFEST_FILE {
            fs::remove_file(entry.path())
                .map_err(|source| EngineError::recording_io(entry.path(), source))?;
        }
    }
    Ok(())
}

/// A simulation whose trajectories are persisted by an [`EpisodeRecorder`].
pub struct RecordingSimulation {
    inner: Box<dyn Simulation>,
    directory: Utf8PathBuf,
    recorder: Option<EpisodeRecorder>,
}

/// Wraps `simulation` so that every episode is written through `recorder`.
#[must_use]
pub fn start_recording(
    simulation: Box<dyn Simulation>,
    recorder: EpisodeRecorder,
) -> Box<dyn Simulation> {
    Box::new(RecordingSimulation {
        inner: simulation,
        directory: recorder.directory.clone(),
        recorder: Some(recorder),
    })
}

impl RecordingSimulation {
    /// Stops recording after a write failure. The simulation has already
    /// advanced, so its result still reaches the client.
    fn abandon_on_failure(&mut self, recorded: Result<(), EngineError>) {
        if let Err(error) = recorded {
            warn!(directory = %self.directory, %error, "recording abandoned");
            self.recorder = None;
        }
    }
}

impl Simulation for RecordingSimulation {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reset(&mut self) -> Result<Value, EngineError> {
        let observation = self.inner.reset()?;
        if let Some(recorder) = self.recorder.as_mut() {
            let recorded = recorder.begin_episode(Some(&observation));
            self.abandon_on_failure(recorded);
        }
        Ok(observation)
    }

    fn step(&mut self, action: &Value, render: bool) -> Result<Transition, EngineError> {
        let transition = self.inner.step(action, render)?;
        if let Some(recorder) = self.recorder.as_mut() {
            let frame = if render { self.inner.render() } else { None };
            let recorded = recorder.record_step(action, &transition, frame);
            self.abandon_on_failure(recorded);
        }
        Ok(transition)
    }

    fn seed(&mut self, seed: u64) -> Result<(), EngineError> {
        self.inner.seed(seed)
    }

    fn sample_action(&mut self) -> Value {
        self.inner.sample_action()
    }

    fn action_space(&self) -> Space {
        self.inner.action_space()
    }

    fn observation_space(&self) -> Space {
        self.inner.observation_space()
    }

    fn render(&self) -> Option<String> {
        self.inner.render()
    }

    fn stop_recording(&mut self) -> Result<(), EngineError> {
        let mut recorder = self.recorder.take().ok_or(EngineError::NotRecording)?;
        recorder.finish(self.inner.name())
    }

    fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    fn recording_directory(&self) -> Option<&Utf8Path> {
        Some(&self.directory)
    }

    fn adopt_recorder(&mut self, recorder: EpisodeRecorder) -> Option<EpisodeRecorder> {
        if self.recorder.is_some() {
            return Some(recorder);
        }
        self.directory = recorder.directory.clone();
        self.recorder = Some(recorder);
        None
    }

    fn close(&mut self) {
        if self.recorder.is_some()
            && let Err(error) = self.stop_recording()
        {
            warn!(directory = %self.directory, %error, "failed to finalise recording");
        }
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::simulation::video::stream_len;
    use crate::simulation::{BuiltinEngine, SimulationEngine};

    #[fixture]
    fn workspace() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    fn options(root: &TempDir, force: bool, resume: bool) -> RecordingOptions {
        let directory =
            Utf8PathBuf::from_path_buf(root.path().join("recording")).expect("utf8 path");
        RecordingOptions {
            directory,
            force,
            resume,
        }
    }

    fn recorded_cart_pole(options: RecordingOptions) -> Box<dyn Simulation> {
        let mut simulation = BuiltinEngine::new().make("CartPole-v0").expect("cart-pole");
        simulation.seed(3).expect("seed");
        let recorder = EpisodeRecorder::open(options).expect("open recorder");
        start_recording(simulation, recorder)
    }

    fn run_episode(simulation: &mut dyn Simulation, render: bool) -> u64 {
        simulation.reset().expect("reset");
        let mut steps = 0;
        loop {
            let transition = simulation.step(&json!(steps % 2), render).expect("step");
            steps += 1;
            if transition.done {
                return steps;
            }
        }
    }

    #[rstest]
    fn episodes_are_written_as_json_lines(workspace: TempDir) {
        let options = options(&workspace, false, false);
        let directory = options.directory.clone();
        let mut simulation = recorded_cart_pole(options);
        let steps = run_episode(simulation.as_mut(), false);

        let text =
            fs::read_to_string(directory.join("episode-000000.jsonl")).expect("episode file");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len() as u64, steps + 1);
        let first: Value = serde_json::from_str(lines[0]).expect("json line");
        assert!(first.get("observation").is_some());
    }

    #[rstest]
    fn rendered_steps_capture_frames(workspace: TempDir) {
        let options = options(&workspace, false, false);
        let directory = options.directory.clone();
        let mut simulation = recorded_cart_pole(options);
        let steps = run_episode(simulation.as_mut(), true);

        let frames =
            fs::read_to_string(directory.join("episode-000000.frames.txt")).expect("frames");
        assert_eq!(frames.lines().count() as u64, steps);

        let video = fs::read(directory.join("episode-000000.y4m")).expect("video");
        assert!(video.starts_with(b"YUV4MPEG2 "));
        assert_eq!(video.len(), stream_len(steps as usize));
    }

    #[rstest]
    fn unrendered_episodes_have_no_video(workspace: TempDir) {
        let options = options(&workspace, false, false);
        let directory = options.directory.clone();
        let mut simulation = recorded_cart_pole(options);
        run_episode(simulation.as_mut(), false);

        assert!(!directory.join("episode-000000.y4m").exists());
    }

    #[rstest]
    fn write_failures_keep_the_step_result(workspace: TempDir) {
        let options = options(&workspace, false, false);
        let directory = options.directory.clone();
        let mut simulation = recorded_cart_pole(options);
        simulation.reset().expect("reset");
        fs::remove_dir_all(&directory).expect("remove recording directory");

        let transition = simulation
            .step(&json!(0), true)
            .expect("step survives a recording failure");
        assert_eq!(transition.observation.as_array().map(Vec::len), Some(4));
        assert!(!simulation.is_recording());
    }

    #[rstest]
    fn stopping_writes_the_manifest(workspace: TempDir) {
        let options = options(&workspace, false, false);
        let directory = options.directory.clone();
        let mut simulation = recorded_cart_pole(options);
        run_episode(simulation.as_mut(), false);
        run_episode(simulation.as_mut(), false);
        simulation.stop_recording().expect("stop");

        let manifest: Value = serde_json::from_str(
            &fs::read_to_string(directory.join(MANIFEST_FILE)).expect("manifest"),
        )
        .expect("manifest json");
        assert_eq!(manifest["simulation"], json!("CartPole-v0"));
        assert_eq!(manifest["episodes"].as_array().map(Vec::len), Some(2));
        assert!(matches!(
            simulation.stop_recording(),
            Err(EngineError::NotRecording)
        ));
        assert_eq!(simulation.recording_directory(), Some(directory.as_path()));
    }

    #[rstest]
    fn existing_recordings_block_a_plain_open(workspace: TempDir) {
        let mut simulation = recorded_cart_pole(options(&workspace, false, false));
        run_episode(simulation.as_mut(), false);
        simulation.close();

        let error = EpisodeRecorder::open(options(&workspace, false, false))
            .expect_err("directory holds recordings");
        assert!(matches!(error, EngineError::RecordingExists { .. }));
    }

    #[rstest]
    fn force_clears_and_resume_continues(workspace: TempDir) {
        let mut simulation = recorded_cart_pole(options(&workspace, false, false));
        run_episode(simulation.as_mut(), false);
        simulation.close();

        let resumed = EpisodeRecorder::open(options(&workspace, false, true)).expect("resume");
        assert_eq!(resumed.next_episode, 1);

        let forced = EpisodeRecorder::open(options(&workspace, true, false)).expect("force");
        assert_eq!(forced.next_episode, 0);
        assert!(
            existing_episodes(forced.directory())
                .expect("scan")
                .is_empty()
        );
    }

    #[rstest]
    fn stopped_wrappers_adopt_a_new_recorder(workspace: TempDir) {
        let mut simulation = recorded_cart_pole(options(&workspace, false, false));
        assert!(simulation.is_recording());
        let fresh = EpisodeRecorder::open(options(&workspace, false, true)).expect("resume");
        let fresh = simulation
            .adopt_recorder(fresh)
            .expect("active wrappers refuse a second recorder");

        simulation.stop_recording().expect("stop");
        assert!(!simulation.is_recording());
        assert!(simulation.adopt_recorder(fresh).is_none());
        assert!(simulation.is_recording());
    }

    #[test]
    fn episode_names_parse_back_to_indices() {
        assert_eq!(episode_index("episode-000042.jsonl"), Some(42));
        assert_eq!(episode_index("episode-000042.frames.txt"), None);
        assert_eq!(episode_index(MANIFEST_FILE), None);
    }
}
