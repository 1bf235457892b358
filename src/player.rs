//! Playing the sweep stimulus for a channel.
//!
//! A [`Player`] is a thin handle on something that can play a file and be
//! asked how it is doing. [`SweepExecutor`] finds the file for a stimulus id,
//! starts it and waits for it to finish, stop, or time out.

use crate::{channel, control::ExecutionControl, control::Stopped, observer::Observer};
use log::{debug, info, warn};
use std::{
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Stimulus file extensions, in order of preference.
pub const EXTENSIONS: &[&str] = &["mlp", "wav", "flac", "thd", "ac3"];

/// Used when the stimulus length is unknown.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Added to a known stimulus length before giving up on playback.
pub const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// How often the player is asked for its state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Coarse playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded, or not started yet.
    Idle,
    /// Still playing.
    Playing,
    /// Reached the end of the file.
    Ended,
    /// The player gave up.
    Error,
}

/// Failures starting playback.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The player program could not be launched.
    #[error("could not launch {program}: {source}")]
    Spawn {
        /// Player program.
        program: String,
        /// Why it failed to start.
        source: io::Error,
    },
    /// The file to play does not exist.
    #[error("no such file {0}")]
    NotFound(PathBuf),
}

/// Something that plays one file at a time.
pub trait Player {
    /// Start playing `file`, replacing anything already playing.
    fn start(&mut self, file: &Path) -> Result<(), PlayerError>;

    /// Current state. Takes `&mut self` since it may reap a child process.
    fn state(&mut self) -> PlayerState;

    /// Stop playback. Harmless when idle.
    fn stop(&mut self);

    /// Whether [`Player::start`] needs a real file on disk.
    fn needs_file(&self) -> bool {
        true
    }
}

impl<P: Player + ?Sized> Player for Box<P> {
    fn start(&mut self, file: &Path) -> Result<(), PlayerError> {
        (**self).start(file)
    }
    fn state(&mut self) -> PlayerState {
        (**self).state()
    }
    fn stop(&mut self) {
        (**self).stop()
    }
    fn needs_file(&self) -> bool {
        (**self).needs_file()
    }
}

/// Plays through VLC's console interface, one process per file.
#[derive(Debug)]
pub struct VlcPlayer {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl Default for VlcPlayer {
    fn default() -> Self {
        Self::new("cvlc")
    }
}

impl VlcPlayer {
    /// Use `program` as the VLC executable.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: ["--play-and-exit", "--quiet", "--no-video"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            child: None,
        }
    }
}

impl Player for VlcPlayer {
    fn start(&mut self, file: &Path) -> Result<(), PlayerError> {
        if !file.exists() {
            return Err(PlayerError::NotFound(file.to_owned()));
        }
        self.stop();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PlayerError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!("{} playing {} (pid {})", self.program, file.display(), child.id());
        self.child = Some(child);
        Ok(())
    }

    fn state(&mut self) -> PlayerState {
        let Some(child) = self.child.as_mut() else {
            return PlayerState::Idle;
        };
        match child.try_wait() {
            Ok(None) => PlayerState::Playing,
            Ok(Some(status)) if status.success() => PlayerState::Ended,
            Ok(Some(status)) => {
                warn!("{} exited with {status}", self.program);
                PlayerState::Error
            }
            Err(e) => {
                warn!("Could not poll {}: {e}", self.program);
                PlayerState::Error
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

impl Drop for VlcPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pretends to play for a fixed time. Needs no audio files.
#[derive(Debug, Clone)]
pub struct SilentPlayer {
    length: Duration,
    started: Option<Instant>,
}

impl SilentPlayer {
    /// Each "playback" lasts `length`.
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            started: None,
        }
    }
}

impl Player for SilentPlayer {
    fn start(&mut self, file: &Path) -> Result<(), PlayerError> {
        debug!("Silently playing {}", file.display());
        self.started = Some(Instant::now());
        Ok(())
    }

    fn state(&mut self) -> PlayerState {
        match self.started {
            None => PlayerState::Idle,
            Some(t) if t.elapsed() < self.length => PlayerState::Playing,
            Some(_) => PlayerState::Ended,
        }
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn needs_file(&self) -> bool {
        false
    }
}

/// Finds and plays the stimulus for a channel.
#[derive(Debug)]
pub struct SweepExecutor<P> {
    player: P,
    audio_dir: PathBuf,
    default_timeout: Duration,
    poll_interval: Duration,
}

impl<P: Player> SweepExecutor<P> {
    /// Play stimuli from `audio_dir` with `player`.
    pub fn new(player: P, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            player,
            audio_dir: audio_dir.into(),
            default_timeout: DEFAULT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Timeout for stimuli of unknown length.
    pub fn with_default_timeout(self, default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            ..self
        }
    }

    /// How often to poll the player.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    /// Where stimuli are looked up.
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// The underlying player.
    pub fn player(&self) -> &P {
        &self.player
    }

    /// The first existing stimulus file for `audio_id`.
    pub fn resolve(&self, audio_id: &str) -> Option<PathBuf> {
        let stem = channel::stimulus_stem(audio_id);
        EXTENSIONS
            .iter()
            .map(|ext| self.audio_dir.join(format!("{stem}.{ext}")))
            .find(|path| path.is_file())
    }

    /// Length of a WAV stimulus. Other formats are not inspected.
    pub fn stimulus_duration(path: &Path) -> Option<Duration> {
        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return None;
        }
        match hound::WavReader::open(path) {
            Ok(reader) => {
                let rate = reader.spec().sample_rate;
                (rate > 0).then(|| Duration::from_secs_f64(reader.duration() as f64 / rate as f64))
            }
            Err(e) => {
                warn!("Could not read {}: {e}", path.display());
                None
            }
        }
    }

    /// Play the stimulus for `audio_id` and wait for it to end.
    ///
    /// Problems with playback are reported to `observer` and otherwise
    /// ignored, the sweep check afterwards catches the consequences. Only a
    /// stop is returned.
    pub fn play(
        &mut self,
        audio_id: &str,
        observer: &dyn Observer,
        control: &ExecutionControl,
    ) -> Result<(), Stopped> {
        let file = match self.resolve(audio_id) {
            Some(file) => file,
            None if !self.player.needs_file() => {
                PathBuf::from(channel::stimulus_stem(audio_id))
            }
            None => {
                observer.info(&format!(
                    "No stimulus for {audio_id} in {}",
                    self.audio_dir.display()
                ));
                return Ok(());
            }
        };

        let timeout = Self::stimulus_duration(&file)
            .map(|d| d + TIMEOUT_MARGIN)
            .unwrap_or(self.default_timeout);

        if let Err(e) = self.player.start(&file) {
            observer.info(&format!("Could not play {}: {e}", file.display()));
            return Ok(());
        }
        info!("Playing {} (timeout {:?})", file.display(), timeout);

        let started = Instant::now();
        loop {
            if let Err(stopped) = control.sleep(self.poll_interval) {
                self.player.stop();
                return Err(stopped);
            }
            match self.player.state() {
                PlayerState::Ended => return Ok(()),
                PlayerState::Error => {
                    observer.info(&format!("Playback of {} failed", file.display()));
                    return Ok(());
                }
                PlayerState::Idle | PlayerState::Playing => {}
            }
            if started.elapsed() >= timeout {
                observer.info(&format!(
                    "Playback of {} did not finish within {:?}",
                    file.display(),
                    timeout
                ));
                self.player.stop();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::LogObserver;
    use std::{
        fs,
        sync::{Arc, Mutex},
        thread,
    };

    /// Ends after a fixed number of polls and logs what it was asked to do.
    #[derive(Clone, Default)]
    struct StubPlayer {
        polls_until_end: Option<u32>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Player for StubPlayer {
        fn start(&mut self, file: &Path) -> Result<(), PlayerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("start {}", file.file_name().unwrap().to_string_lossy()));
            Ok(())
        }
        fn state(&mut self) -> PlayerState {
            match self.polls_until_end.as_mut() {
                Some(0) => PlayerState::Ended,
                Some(n) => {
                    *n -= 1;
                    PlayerState::Playing
                }
                None => PlayerState::Playing,
            }
        }
        fn stop(&mut self) {
            self.calls.lock().unwrap().push("stop".to_owned());
        }
    }

    #[derive(Default)]
    struct Infos(Mutex<Vec<String>>);

    impl Observer for Infos {
        fn info(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_owned());
        }
        fn update(&self) {}
        fn input(&self, _: &str) {}
        fn complete(&self) {}
    }

    fn audio_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            fs::write(dir.path().join(f), b"").unwrap();
        }
        dir
    }

    fn fast<P: Player>(executor: SweepExecutor<P>) -> SweepExecutor<P> {
        executor.with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn subwoofers_share_one_stimulus() {
        let dir = audio_dir(&["SWx.wav", "FL.mlp", "FL.wav"]);
        let executor = SweepExecutor::new(StubPlayer::default(), dir.path());
        assert_eq!(executor.resolve("SW3"), Some(dir.path().join("SWx.wav")));
        assert_eq!(executor.resolve("FL"), Some(dir.path().join("FL.mlp")));
        assert_eq!(executor.resolve("C"), None);
    }

    #[test]
    fn plays_until_ended() {
        let dir = audio_dir(&["FL.flac"]);
        let player = StubPlayer {
            polls_until_end: Some(3),
            ..Default::default()
        };
        let calls = Arc::clone(&player.calls);
        let mut executor = fast(SweepExecutor::new(player, dir.path()));
        let control = ExecutionControl::new();
        assert_eq!(executor.play("FL", &LogObserver, &control), Ok(()));
        assert_eq!(*calls.lock().unwrap(), vec!["start FL.flac"]);
    }

    #[test]
    fn missing_stimulus_is_reported() {
        let dir = audio_dir(&[]);
        let mut executor = fast(SweepExecutor::new(StubPlayer::default(), dir.path()));
        let infos = Infos::default();
        let control = ExecutionControl::new();
        assert_eq!(executor.play("C", &infos, &control), Ok(()));
        assert!(infos.0.lock().unwrap()[0].starts_with("No stimulus for C"));
    }

    #[test]
    fn timeout_stops_the_player() {
        let dir = audio_dir(&["C.ac3"]);
        let player = StubPlayer::default();
        let calls = Arc::clone(&player.calls);
        let mut executor = fast(SweepExecutor::new(player, dir.path()))
            .with_default_timeout(Duration::from_millis(40));
        let infos = Infos::default();
        let control = ExecutionControl::new();
        assert_eq!(executor.play("C", &infos, &control), Ok(()));
        assert_eq!(calls.lock().unwrap().last().unwrap(), "stop");
        assert!(infos.0.lock().unwrap()[0].contains("did not finish"));
    }

    #[test]
    fn stop_interrupts_playback() {
        let dir = audio_dir(&["C.wav"]);
        let player = StubPlayer::default();
        let calls = Arc::clone(&player.calls);
        let mut executor = fast(SweepExecutor::new(player, dir.path()));
        let control = Arc::new(ExecutionControl::new());

        let th_control = Arc::clone(&control);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            th_control.stop();
        });
        assert_eq!(executor.play("C", &LogObserver, &control), Err(Stopped));
        stopper.join().unwrap();
        assert_eq!(calls.lock().unwrap().last().unwrap(), "stop");
    }

    #[test]
    fn wav_length_sets_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FL.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let duration = SweepExecutor::<StubPlayer>::stimulus_duration(&path).unwrap();
        assert_eq!(duration, Duration::from_millis(500));
        assert_eq!(
            SweepExecutor::<StubPlayer>::stimulus_duration(&dir.path().join("FL.mlp")),
            None
        );
    }

    #[test]
    fn silent_player_needs_no_files() {
        let dir = audio_dir(&[]);
        let mut executor = fast(SweepExecutor::new(
            SilentPlayer::new(Duration::from_millis(20)),
            dir.path(),
        ));
        let control = ExecutionControl::new();
        let infos = Infos::default();
        assert_eq!(executor.play("SW2", &infos, &control), Ok(()));
        assert!(infos.0.lock().unwrap().is_empty());
    }

    #[test]
    fn vlc_rejects_missing_file() {
        let mut player = VlcPlayer::default();
        assert!(matches!(
            player.start(Path::new("/definitely/not/here.wav")),
            Err(PlayerError::NotFound(_))
        ));
        assert_eq!(player.state(), PlayerState::Idle);
    }
}
