//! Pipeline lifecycle
//!
//! The receiver graph looks like this:
//!
//! ```text
//!                 +--> decoder queue --> [decoder --> video sink]
//!                 |
//! source --> tee -+
//!                 |
//!                 +--> recorder queue --> [file sink]
//! ```
//!
//! The source and the two queues are permanent while a pipeline exists;
//! the bracketed parts are branches that attach and detach on demand while
//! the stream keeps running. All topology changes and state transitions
//! happen on one control thread, which pops commands in FIFO order from
//! public calls, pad callbacks, bus messages, probes, and timers.

pub mod branch;
pub mod bus;
pub mod state;
pub mod stats;
pub mod watchdog;

use crate::error::Error;
use crate::events::{EventBus, ReceiverEvent};
use crate::factory::{self, ContainerFormat};
use crate::url::SourceUrl;
use branch::Graph;
use gstreamer as gst;
use gstreamer::prelude::*;
use log::{debug, error, warn};
use state::{BranchState, ReceiverState};
use stats::ReceiverStats;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Work items consumed by the control thread. Everything that wants to
/// touch the graph - public calls, pad callbacks, bus messages, probes,
/// timers - goes through this queue.
#[derive(Debug)]
pub(crate) enum Command {
    Start { url: SourceUrl, timeout: Duration },
    Stop,
    StartDecoding { sink: gst::Element },
    StopDecoding,
    StartRecording { path: PathBuf, format: ContainerFormat },
    StopRecording,
    GrabImage { path: PathBuf },
    SourcePadAdded,
    DecoderPadAdded { pad: gst::Pad },
    BusError { message: String },
    BusEos,
    KeyframeSeen,
    WatchdogTick,
    RestartTimeout { generation: u64 },
    Shutdown,
}

#[derive(Default)]
struct MediaPaths {
    video_file: Option<PathBuf>,
    image_file: Option<PathBuf>,
}

/// Handle to a running receiver.
///
/// All methods post work to the control thread and return immediately;
/// outcomes are observable through [`ReceiverEvent`]s and the getters.
/// Dropping the handle stops the stream and joins the control thread.
pub struct VideoReceiver {
    commands: UnboundedSender<Command>,
    events: EventBus,
    stats: Arc<ReceiverStats>,
    paths: Arc<Mutex<MediaPaths>>,
    control: Option<thread::JoinHandle<()>>,
}

impl VideoReceiver {
    pub fn new() -> Result<Self, Error> {
        crate::ensure_initialized()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let events = EventBus::new();
        let stats = Arc::new(ReceiverStats::new());
        let paths = Arc::new(Mutex::new(MediaPaths::default()));

        let control = ControlLoop {
            commands: command_rx,
            command_tx: command_tx.clone(),
            events: events.clone(),
            stats: Arc::clone(&stats),
            paths: Arc::clone(&paths),
            state: ReceiverState::Idle,
            decoder_branch: BranchState::Absent,
            recorder_branch: BranchState::Absent,
            graph: None,
            bus_gate: None,
            pending_sink: None,
            source_linked: false,
            url: None,
            timeout: Duration::from_secs(5),
            shutdown_flag: false,
            restart_generation: 0,
        };

        let handle = thread::Builder::new()
            .name("videorx-control".into())
            .spawn(move || control.run())
            .expect("failed to spawn control thread");

        watchdog::spawn_watchdog(command_tx.clone());

        Ok(VideoReceiver {
            commands: command_tx,
            events,
            stats,
            paths,
            control: Some(handle),
        })
    }

    /// Begin streaming from `url`. The URL must carry one of the supported
    /// scheme prefixes; anything else is rejected here, before any
    /// pipeline work. `timeout` bounds how long the stream may go without
    /// frames before the watchdog restarts it.
    pub fn start(&self, url: &str, timeout: Duration) -> Result<(), Error> {
        let url = SourceUrl::parse(url)?;
        self.post(Command::Start { url, timeout })
    }

    /// Drain and tear the pipeline down. Safe to call in any state.
    pub fn stop(&self) {
        let _ = self.post(Command::Stop);
    }

    /// Attach the decoding branch, terminating in `sink`. If no source pad
    /// has appeared yet the sink is retained and attached once one does.
    /// A second call while a sink is held is a no-op.
    pub fn start_decoding(&self, sink: gst::Element) {
        let _ = self.post(Command::StartDecoding { sink });
    }

    /// Detach the decoding branch in-band; the stream keeps running.
    pub fn stop_decoding(&self) {
        let _ = self.post(Command::StopDecoding);
    }

    /// Attach the recording branch, writing the compressed stream to
    /// `path` in the given container. The file starts at the first
    /// keyframe, with its timestamp shifted to zero.
    pub fn start_recording(&self, path: impl Into<PathBuf>, format: ContainerFormat) {
        let _ = self.post(Command::StartRecording {
            path: path.into(),
            format,
        });
    }

    /// Detach the recording branch in-band and finalize the file.
    pub fn stop_recording(&self) {
        let _ = self.post(Command::StopRecording);
    }

    /// Reserved: records the path and reports it, capture is not
    /// performed.
    pub fn grab_image(&self, path: impl Into<PathBuf>) {
        let _ = self.post(Command::GrabImage { path: path.into() });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.events.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.stats.streaming()
    }

    pub fn is_decoding(&self) -> bool {
        self.stats.decoding()
    }

    pub fn is_recording(&self) -> bool {
        self.stats.recording()
    }

    pub fn video_size(&self) -> Option<(i32, i32)> {
        self.stats.video_size()
    }

    pub fn video_file(&self) -> Option<PathBuf> {
        self.paths.lock().unwrap().video_file.clone()
    }

    pub fn image_file(&self) -> Option<PathBuf> {
        self.paths.lock().unwrap().image_file.clone()
    }

    pub fn stats(&self) -> &Arc<ReceiverStats> {
        &self.stats
    }

    /// Stop the stream and shut the control thread down. Called from
    /// `Drop` as well; calling it twice is harmless.
    pub fn close(&mut self) {
        if let Some(handle) = self.control.take() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = handle.join();
        }
    }

    fn post(&self, command: Command) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::ControllerGone)
    }
}

impl Drop for VideoReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

/// The state machine proper. Owns the graph and every piece of mutable
/// lifecycle state; runs on its own thread and applies commands one at a
/// time.
struct ControlLoop {
    commands: UnboundedReceiver<Command>,
    command_tx: UnboundedSender<Command>,
    events: EventBus,
    stats: Arc<ReceiverStats>,
    paths: Arc<Mutex<MediaPaths>>,

    state: ReceiverState,
    decoder_branch: BranchState,
    recorder_branch: BranchState,

    graph: Option<Graph>,
    bus_gate: Option<Arc<AtomicBool>>,
    /// Video sink retained before a source pad has appeared.
    pending_sink: Option<gst::Element>,
    source_linked: bool,

    url: Option<SourceUrl>,
    timeout: Duration,
    /// Set by a user `stop`; suppresses every automatic restart path.
    shutdown_flag: bool,
    /// Invalidates restart timers armed before the latest stop/start.
    restart_generation: u64,
}

impl ControlLoop {
    fn run(mut self) {
        while let Some(command) = self.commands.blocking_recv() {
            if matches!(command, Command::Shutdown) {
                self.handle_stop(true);
                break;
            }
            self.dispatch(command);
        }
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Start { url, timeout } => self.handle_start(url, timeout),
            Command::Stop => self.handle_stop(true),
            Command::StartDecoding { sink } => self.handle_start_decoding(sink),
            Command::StopDecoding => self.handle_stop_decoding(),
            Command::StartRecording { path, format } => self.handle_start_recording(path, format),
            Command::StopRecording => self.handle_stop_recording(),
            Command::GrabImage { path } => self.handle_grab_image(path),
            Command::SourcePadAdded => self.handle_source_pad(),
            Command::DecoderPadAdded { pad } => self.handle_decoder_pad(&pad),
            Command::BusError { message } => self.handle_error(&message),
            Command::BusEos => self.handle_eos(),
            Command::KeyframeSeen => self.handle_keyframe(),
            Command::WatchdogTick => self.handle_watchdog_tick(),
            Command::RestartTimeout { generation } => self.handle_restart_timeout(generation),
            Command::Shutdown => unreachable!("handled in run"),
        }
    }

    fn transition(&mut self, target: ReceiverState) {
        if !self.state.can_transition_to(&target) {
            warn!("illegal state transition {} -> {}", self.state, target);
        }
        if self.state != target {
            debug!("state {} -> {}", self.state, target);
        }
        self.state = target;
    }

    fn set_decoder_branch(&mut self, target: BranchState) {
        if !self.decoder_branch.can_transition_to(&target) {
            warn!(
                "illegal decoding branch transition {} -> {}",
                self.decoder_branch, target
            );
        }
        self.decoder_branch = target;
    }

    fn set_recorder_branch(&mut self, target: BranchState) {
        if !self.recorder_branch.can_transition_to(&target) {
            warn!(
                "illegal recording branch transition {} -> {}",
                self.recorder_branch, target
            );
        }
        self.recorder_branch = target;
    }

    fn handle_start(&mut self, url: SourceUrl, timeout: Duration) {
        self.shutdown_flag = false;

        if self.state.is_running() {
            debug!("already running");
            return;
        }

        // Cancel a pending fault restart; this start supersedes it
        self.restart_generation += 1;

        self.url = Some(url.clone());
        self.timeout = timeout;
        self.transition(ReceiverState::Starting);

        if let Err(err) = self.build_pipeline(&url) {
            error!("failed to start `{}`: {}", url, err);
            self.graph = None;
            self.bus_gate = None;
            self.transition(ReceiverState::Idle);
            return;
        }

        debug!("running");
    }

    fn build_pipeline(&mut self, url: &SourceUrl) -> Result<(), Error> {
        let pipeline = gst::Pipeline::builder().name("video-receiver").build();
        // Branch EOS must surface as forwarded element messages
        pipeline.set_property("message-forward", true);

        match self.populate_pipeline(&pipeline, url) {
            Ok(graph) => {
                self.graph = Some(graph);
                Ok(())
            }
            Err(err) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(err)
            }
        }
    }

    fn populate_pipeline(
        &mut self,
        pipeline: &gst::Pipeline,
        url: &SourceUrl,
    ) -> Result<Graph, Error> {
        let tee = gst::ElementFactory::make("tee")
            .build()
            .map_err(|_| Error::ElementCreate("tee"))?;
        let decoder_queue = gst::ElementFactory::make("queue")
            .name("decoder-queue")
            .build()
            .map_err(|_| Error::ElementCreate("queue"))?;
        let recorder_queue = gst::ElementFactory::make("queue")
            .name("recorder-queue")
            .build()
            .map_err(|_| Error::ElementCreate("queue"))?;

        let source = factory::build_source(url)?;

        let commands = self.command_tx.clone();
        source.connect_pad_added(move |_source, pad| {
            debug!("new source pad `{}`", pad.name());
            let _ = commands.send(Command::SourcePadAdded);
        });

        pipeline
            .add_many([&source, &tee, &decoder_queue, &recorder_queue])
            .map_err(|_| Error::Link("pipeline children"))?;

        tee.link(&decoder_queue)
            .map_err(|_| Error::Link("tee -> decoder queue"))?;
        tee.link(&recorder_queue)
            .map_err(|_| Error::Link("tee -> recorder queue"))?;

        let bus = pipeline.bus().expect("pipeline has a bus");
        self.bus_gate = Some(bus::install_sync_handler(&bus, self.command_tx.clone()));

        pipeline.set_state(gst::State::Playing)?;

        Ok(Graph {
            pipeline: pipeline.clone(),
            source,
            tee,
            decoder_queue,
            recorder_queue,
            decoder: None,
            video_sink: None,
            file_sink: None,
        })
    }

    /// The source exposed a pad: link it to the tee (once) and bring up
    /// whatever was waiting for data to exist.
    fn handle_source_pad(&mut self) {
        let Some(graph) = self.graph.as_ref() else {
            return;
        };

        if !self.source_linked {
            if graph.source.link(&graph.tee).is_err() {
                error!("unable to link source to tee");
                return;
            }
            self.source_linked = true;
        }

        if self.state == ReceiverState::Starting {
            self.transition(ReceiverState::Streaming);
            self.stats.set_streaming(true);
            self.events.emit(ReceiverEvent::StreamingChanged(true));
        }

        if self.pending_sink.is_some() && self.decoder_branch == BranchState::Absent {
            self.attach_decoding();
        }
    }

    fn handle_start_decoding(&mut self, sink: gst::Element) {
        debug!("starting decoding");

        // With no pipeline around, a previously retained sink is stale
        if self.graph.is_none() {
            self.pending_sink = None;
        }

        if self.pending_sink.is_some() || self.decoder_branch != BranchState::Absent {
            debug!("already decoding");
            return;
        }

        if let Err(err) = branch::install_frame_probe(&sink, &self.stats) {
            error!("failed to probe video sink: {}", err);
            return;
        }
        self.stats.reset_frame_clock();

        self.pending_sink = Some(sink);

        if self.state == ReceiverState::Streaming {
            self.attach_decoding();
        } else {
            debug!("decoding deferred until a source pad appears");
        }
    }

    fn attach_decoding(&mut self) {
        let Some(sink) = self.pending_sink.take() else {
            return;
        };
        if self.graph.is_none() {
            self.pending_sink = Some(sink);
            return;
        }

        self.set_decoder_branch(BranchState::Attaching);

        let graph = self.graph.as_mut().expect("graph checked above");
        if let Err(err) = graph.attach_decoder(sink, &self.command_tx) {
            error!("failed to attach decoder: {}", err);
            self.set_decoder_branch(BranchState::Absent);
        }
    }

    /// The decoder exposed its output pad: finish the branch by linking
    /// the video sink and report the encoded size.
    fn handle_decoder_pad(&mut self, pad: &gst::Pad) {
        let Some(graph) = self.graph.as_mut() else {
            return;
        };

        if self.decoder_branch != BranchState::Attaching {
            debug!("ignoring decoder pad `{}` in state {}", pad.name(), self.decoder_branch);
            return;
        }

        match graph.complete_decoder(pad) {
            Ok(size) => {
                let (width, height) = size.unwrap_or((0, 0));
                self.stats.set_video_size(width, height);
                self.events
                    .emit(ReceiverEvent::VideoSizeChanged { width, height });

                self.set_decoder_branch(BranchState::Active);
                self.stats.set_decoding(true);
                self.events.emit(ReceiverEvent::DecodingChanged(true));
                debug!("decoding started");
            }
            Err(err) => {
                error!("failed to link video sink: {}", err);
                self.set_decoder_branch(BranchState::Absent);
            }
        }
    }

    fn handle_stop_decoding(&mut self) {
        debug!("stopping decoding");

        if self.graph.is_none() || self.decoder_branch != BranchState::Active {
            debug!("not decoding");
            return;
        }

        self.set_decoder_branch(BranchState::Detaching);

        let queue = self.graph.as_ref().map(|g| g.decoder_queue.clone());
        if let Some(queue) = queue {
            if let Err(err) = branch::schedule_detach(&queue) {
                error!("failed to schedule decoder detach: {}", err);
                self.set_decoder_branch(BranchState::Active);
            }
        }
    }

    fn handle_start_recording(&mut self, path: PathBuf, format: ContainerFormat) {
        debug!("starting recording into {}", path.display());

        if self.graph.is_none() {
            debug!("cannot record, receiver is not running");
            return;
        }
        if self.recorder_branch != BranchState::Absent {
            debug!("already recording");
            return;
        }

        self.paths.lock().unwrap().video_file = Some(path.clone());
        self.events
            .emit(ReceiverEvent::VideoFileChanged(path.clone()));

        self.set_recorder_branch(BranchState::Attaching);

        let result = self
            .graph
            .as_mut()
            .map(|g| g.attach_recorder(&path, format, &self.command_tx));

        match result {
            Some(Ok(())) => {
                self.set_recorder_branch(BranchState::Active);
                self.stats.set_recording(true);
                self.events.emit(ReceiverEvent::RecordingChanged(true));
                debug!("recording started");
            }
            _ => {
                error!("failed to attach recorder");
                self.set_recorder_branch(BranchState::Absent);
            }
        }
    }

    fn handle_stop_recording(&mut self) {
        debug!("stopping recording");

        if self.graph.is_none() || self.recorder_branch != BranchState::Active {
            debug!("not recording");
            return;
        }

        self.set_recorder_branch(BranchState::Detaching);

        let queue = self.graph.as_ref().map(|g| g.recorder_queue.clone());
        if let Some(queue) = queue {
            if let Err(err) = branch::schedule_detach(&queue) {
                error!("failed to schedule recorder detach: {}", err);
                self.set_recorder_branch(BranchState::Active);
            }
        }
    }

    fn handle_grab_image(&mut self, path: PathBuf) {
        // Reserved: report the path, capture is not implemented
        self.paths.lock().unwrap().image_file = Some(path.clone());
        self.events.emit(ReceiverEvent::ImageFileChanged(path));
    }

    fn handle_keyframe(&mut self) {
        if self.recorder_branch.is_attached() {
            self.events.emit(ReceiverEvent::GotFirstRecordingKeyFrame);
        }
    }

    /// EOS observed while the pipeline keeps running: some branch finished
    /// draining. EOS with nothing draining means the stream died.
    fn handle_eos(&mut self) {
        if self.state == ReceiverState::Stopping {
            // The drain in handle_stop owns the bus at this point
            return;
        }

        if self.decoder_branch == BranchState::Detaching {
            self.demolish_decoding();
        } else if self.recorder_branch == BranchState::Detaching {
            self.demolish_recording();
        } else {
            warn!("unexpected EOS");
            self.handle_error("unexpected end of stream");
        }
    }

    fn demolish_decoding(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            graph.demolish_decoder();
        }
        self.set_decoder_branch(BranchState::Absent);
        self.stats.set_decoding(false);
        self.events.emit(ReceiverEvent::DecodingChanged(false));
        debug!("decoding stopped");
    }

    fn demolish_recording(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            graph.demolish_recorder();
        }
        self.set_recorder_branch(BranchState::Absent);
        self.stats.set_recording(false);
        self.events.emit(ReceiverEvent::RecordingChanged(false));
        debug!("recording stopped");
    }

    fn handle_error(&mut self, message: &str) {
        if self.state == ReceiverState::Idle && self.graph.is_none() {
            // Stale message from a pipeline that is already gone
            debug!("ignoring error while idle: {}", message);
            return;
        }

        error!("pipeline fault: {}", message);

        self.shutdown_pipeline();

        if self.shutdown_flag {
            self.transition(ReceiverState::Idle);
            return;
        }

        self.transition(ReceiverState::Fault);
        self.restart_generation += 1;
        watchdog::schedule_restart(self.command_tx.clone(), self.restart_generation);
    }

    fn handle_restart_timeout(&mut self, generation: u64) {
        if generation != self.restart_generation
            || self.state != ReceiverState::Fault
            || self.shutdown_flag
        {
            return;
        }

        self.events.emit(ReceiverEvent::RestartTimeout);

        let Some(url) = self.url.clone() else {
            self.transition(ReceiverState::Idle);
            return;
        };
        let timeout = self.timeout;

        debug!("restarting `{}`", url);
        self.handle_start(url, timeout);
    }

    fn handle_watchdog_tick(&mut self) {
        if self.state != ReceiverState::Streaming || self.decoder_branch != BranchState::Active {
            return;
        }

        if self.stats.is_stalled(self.timeout) {
            warn!("no frames for {:?}, restarting stream", self.timeout);
            self.handle_stop(false);

            if !self.shutdown_flag {
                if let Some(url) = self.url.clone() {
                    let timeout = self.timeout;
                    self.handle_start(url, timeout);
                }
            }
        }
    }

    /// Drain and tear down. `user` distinguishes a caller's `stop` (which
    /// also suppresses restarts) from the watchdog's internal stop-restart
    /// cycle.
    fn handle_stop(&mut self, user: bool) {
        if user {
            self.shutdown_flag = true;
            self.restart_generation += 1;
        }

        debug!("stopping");

        if self.graph.is_none() {
            if self.state != ReceiverState::Idle {
                self.transition(ReceiverState::Idle);
            }
            return;
        }

        if self.state != ReceiverState::Streaming {
            // No data is flowing; there is nothing to drain
            self.shutdown_pipeline();
            self.transition(ReceiverState::Idle);
            return;
        }

        self.transition(ReceiverState::Stopping);

        // Take over the bus: gate off async dispatch and pop directly
        if let Some(gate) = &self.bus_gate {
            gate.store(false, Ordering::Relaxed);
        }

        let bus = {
            let graph = self.graph.as_ref().expect("graph checked above");
            graph.pipeline.send_event(gst::event::Eos::new());
            graph.pipeline.bus()
        };

        match bus.and_then(|bus| {
            bus.timed_pop_filtered(
                gst::ClockTime::NONE,
                &[gst::MessageType::Eos, gst::MessageType::Error],
            )
        }) {
            Some(message) => {
                if let gst::MessageView::Error(err) = message.view() {
                    error!("error while draining pipeline: {}", err.error());
                } else {
                    debug!("pipeline drained");
                }
            }
            None => warn!("bus vanished while draining"),
        }

        // Every branch has drained by now; demolish before teardown
        if self.decoder_branch.is_attached() {
            self.demolish_decoding();
        }
        if self.recorder_branch.is_attached() {
            self.demolish_recording();
        }

        self.shutdown_pipeline();
        self.transition(ReceiverState::Idle);
        debug!("stopped");
    }

    /// Drop the whole graph. The pipeline goes to null before any element
    /// reference is released; the caller's video sink is pulled out first
    /// so it survives the pipeline.
    fn shutdown_pipeline(&mut self) {
        if let Some(gate) = self.bus_gate.take() {
            gate.store(false, Ordering::Relaxed);
        }

        let Some(mut graph) = self.graph.take() else {
            return;
        };

        let _ = graph.pipeline.set_state(gst::State::Null);

        if let Some(sink) = graph.video_sink.take() {
            let _ = graph.pipeline.remove(&sink);
            let _ = sink.set_state(gst::State::Null);
        }

        drop(graph);

        self.source_linked = false;
        self.set_decoder_branch(BranchState::Absent);
        self.set_recorder_branch(BranchState::Absent);

        if self.stats.streaming() {
            self.stats.set_streaming(false);
            self.events.emit(ReceiverEvent::StreamingChanged(false));
        }
        if self.stats.decoding() {
            self.stats.set_decoding(false);
            self.events.emit(ReceiverEvent::DecodingChanged(false));
        }
        if self.stats.recording() {
            self.stats.set_recording(false);
            self.events.emit(ReceiverEvent::RecordingChanged(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    fn test_rejects_bad_url_before_starting() {
        let receiver = VideoReceiver::new().unwrap();
        assert!(receiver
            .start("http://example.com/stream", Duration::from_secs(5))
            .is_err());
        assert!(!receiver.is_streaming());
    }

    #[test]
    fn test_start_stop_without_data() {
        let receiver = VideoReceiver::new().unwrap();

        receiver
            .start("udp://127.0.0.1:5611", Duration::from_secs(5))
            .unwrap();

        // No sender on that port: the pipeline starts but never streams
        std::thread::sleep(Duration::from_millis(200));
        assert!(!receiver.is_streaming());

        receiver.stop();
        assert!(wait_for(|| !receiver.is_streaming(), Duration::from_secs(2)));

        // stop(); stop() must equal stop()
        receiver.stop();
    }

    #[test]
    fn test_start_decoding_twice_retains_first_sink() {
        crate::ensure_initialized().unwrap();

        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let mut control = ControlLoop {
            commands: mpsc::unbounded_channel().1,
            command_tx,
            events: EventBus::new(),
            stats: Arc::new(ReceiverStats::new()),
            paths: Arc::new(Mutex::new(MediaPaths::default())),
            state: ReceiverState::Idle,
            decoder_branch: BranchState::Absent,
            recorder_branch: BranchState::Absent,
            graph: None,
            bus_gate: None,
            pending_sink: None,
            source_linked: false,
            url: None,
            timeout: Duration::from_secs(5),
            shutdown_flag: false,
            restart_generation: 0,
        };

        let url = SourceUrl::parse("udp://127.0.0.1:5612").unwrap();
        control.handle_start(url, Duration::from_secs(5));
        assert!(control.graph.is_some());

        let first = gst::ElementFactory::make("fakesink")
            .name("first-sink")
            .build()
            .unwrap();
        let second = gst::ElementFactory::make("fakesink")
            .name("second-sink")
            .build()
            .unwrap();

        // No source pad yet: the first sink is retained and attachment
        // deferred; the second call must be a no-op
        control.handle_start_decoding(first);
        control.handle_start_decoding(second);

        assert_eq!(control.decoder_branch, BranchState::Absent);
        assert_eq!(
            control
                .pending_sink
                .as_ref()
                .map(|sink| sink.name().to_string()),
            Some("first-sink".to_string())
        );

        control.handle_stop(true);
        assert!(control.graph.is_none());
    }

    #[test]
    fn test_recording_request_while_idle_is_noop() {
        let receiver = VideoReceiver::new().unwrap();
        receiver.start_recording("/tmp/videorx-noop.mkv", ContainerFormat::Mkv);

        std::thread::sleep(Duration::from_millis(100));
        assert!(!receiver.is_recording());
    }

    #[test]
    fn test_grab_image_is_reserved() {
        let receiver = VideoReceiver::new().unwrap();
        let mut events = receiver.subscribe();

        receiver.grab_image("/tmp/videorx-grab.png");

        assert!(wait_for(
            || receiver.image_file().is_some(),
            Duration::from_secs(1)
        ));
        assert_eq!(
            receiver.image_file(),
            Some(PathBuf::from("/tmp/videorx-grab.png"))
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ReceiverEvent::ImageFileChanged(PathBuf::from("/tmp/videorx-grab.png"))
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut receiver = VideoReceiver::new().unwrap();
        receiver.close();
        receiver.close();
    }
}
