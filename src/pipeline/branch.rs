//! Branch management
//!
//! The running pipeline is a source bin feeding a tee, with two permanent
//! queues hanging off the tee. A decoding or recording branch is attached
//! by linking elements after its queue, and detached in-band: an idle
//! probe waits for a data-free instant, severs the link, and injects EOS
//! so the branch drains before its elements are torn down.

use crate::error::Error;
use crate::factory::{self, ContainerFormat};
use crate::pipeline::stats::ReceiverStats;
use crate::pipeline::Command;
use gstreamer as gst;
use gstreamer::prelude::*;
use log::{debug, error, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// All elements owned by the live pipeline. Only the control thread
/// touches this; streaming threads reach it exclusively through probes.
pub struct Graph {
    pub pipeline: gst::Pipeline,
    pub source: gst::Element,
    pub tee: gst::Element,
    pub decoder_queue: gst::Element,
    pub recorder_queue: gst::Element,
    pub decoder: Option<gst::Element>,
    pub video_sink: Option<gst::Element>,
    pub file_sink: Option<gst::Element>,
}

impl Graph {
    /// First half of decoding attachment: build a decoder matched to the
    /// queue's caps and the sink's capabilities, and link the queue to it.
    /// The sink itself is linked once the decoder exposes its output pad.
    pub fn attach_decoder(
        &mut self,
        sink: gst::Element,
        commands: &UnboundedSender<Command>,
    ) -> Result<(), Error> {
        let queue_src = self
            .decoder_queue
            .static_pad("src")
            .ok_or(Error::NoPad("src"))?;
        let caps = queue_src.query_caps(None);

        let decoder = factory::build_decoder(&caps, &sink)?;

        let commands = commands.clone();
        decoder.connect_pad_added(move |_decoder, pad| {
            let _ = commands.send(Command::DecoderPadAdded { pad: pad.clone() });
        });

        self.pipeline
            .add(&decoder)
            .map_err(|_| Error::Link("decoder"))?;
        decoder.sync_state_with_parent()?;
        self.decoder_queue
            .link(&decoder)
            .map_err(|_| Error::Link("decoder queue -> decoder"))?;

        self.decoder = Some(decoder);
        self.video_sink = Some(sink);

        Ok(())
    }

    /// Second half of decoding attachment, on the decoder's `pad-added`:
    /// put the sink into the pipeline and link it, then report the encoded
    /// video size read from the new pad.
    pub fn complete_decoder(&mut self, pad: &gst::Pad) -> Result<Option<(i32, i32)>, Error> {
        let decoder = self.decoder.as_ref().ok_or(Error::NoPad("decoder"))?;
        let sink = self.video_sink.as_ref().ok_or(Error::NoPad("video sink"))?;

        self.pipeline
            .add(sink)
            .map_err(|_| Error::Link("video sink"))?;
        sink.sync_state_with_parent()?;

        if decoder.link(sink).is_err() {
            // Leave the sink owned by us, not the pipeline
            let _ = self.pipeline.remove(sink);
            return Err(Error::Link("decoder -> video sink"));
        }

        Ok(video_size_from_pad(pad))
    }

    /// Attach the recording branch: muxer + file writer after the recorder
    /// queue, plus the keyframe gate that aligns the file's first buffer.
    pub fn attach_recorder(
        &mut self,
        path: &Path,
        format: ContainerFormat,
        commands: &UnboundedSender<Command>,
    ) -> Result<(), Error> {
        let file_sink = factory::build_file_sink(path, format)?;

        self.pipeline
            .add(&file_sink)
            .map_err(|_| Error::Link("file sink"))?;

        if self.recorder_queue.link(&file_sink).is_err() {
            // Already owned by the pipeline; removal is the only cleanup
            let _ = self.pipeline.remove(&file_sink);
            return Err(Error::Link("recorder queue -> file sink"));
        }

        file_sink.sync_state_with_parent()?;

        install_keyframe_probe(&self.recorder_queue, commands)?;

        self.file_sink = Some(file_sink);

        Ok(())
    }

    /// Tear down a fully drained decoding branch.
    pub fn demolish_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            let _ = self.pipeline.remove(&decoder);
            let _ = decoder.set_state(gst::State::Null);
        }

        if let Some(sink) = self.video_sink.take() {
            let _ = self.pipeline.remove(&sink);
            let _ = sink.set_state(gst::State::Null);
        }

        debug!("decoding branch demolished");
    }

    /// Tear down a fully drained recording branch.
    pub fn demolish_recorder(&mut self) {
        if let Some(file_sink) = self.file_sink.take() {
            let _ = self.pipeline.remove(&file_sink);
            let _ = file_sink.set_state(gst::State::Null);
        }

        debug!("recording branch demolished");
    }
}

/// Read `width`/`height` from the pad's negotiated caps.
fn video_size_from_pad(pad: &gst::Pad) -> Option<(i32, i32)> {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    let s = caps.structure(0)?;

    match (s.get::<i32>("width"), s.get::<i32>("height")) {
        (Ok(width), Ok(height)) => Some((width, height)),
        _ => None,
    }
}

/// Note every buffer that reaches the video sink, for the liveness
/// watchdog. Runs on a streaming thread; only touches atomics.
pub fn install_frame_probe(sink: &gst::Element, stats: &Arc<ReceiverStats>) -> Result<(), Error> {
    let pad = sink.static_pad("sink").ok_or(Error::NoPad("sink"))?;

    let stats = Arc::clone(stats);
    pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
        if let Some(gst::PadProbeData::Buffer(ref buffer)) = info.data {
            stats.note_frame(buffer.size());
        }
        gst::PadProbeReturn::Ok
    })
    .ok_or(Error::Probe("video sink frame"))?;

    Ok(())
}

/// Drop everything up to the first keyframe, then shift the recording
/// timeline so that keyframe lands at presentation time zero, and remove
/// the probe. The recorded stream starts clean and decodable.
fn install_keyframe_probe(
    queue: &gst::Element,
    commands: &UnboundedSender<Command>,
) -> Result<(), Error> {
    let pad = queue.static_pad("src").ok_or(Error::NoPad("src"))?;

    let commands = commands.clone();
    pad.add_probe(gst::PadProbeType::BUFFER, move |pad, info| {
        let Some(gst::PadProbeData::Buffer(ref buffer)) = info.data else {
            return gst::PadProbeReturn::Ok;
        };

        if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            return gst::PadProbeReturn::Drop;
        }

        if let Some(pts) = buffer.pts() {
            // Only downstream elements see the shifted timeline
            pad.set_offset(-(pts.nseconds() as i64));
        }

        debug!("got keyframe, stop dropping buffers");
        let _ = commands.send(Command::KeyframeSeen);

        gst::PadProbeReturn::Remove
    })
    .ok_or(Error::Probe("keyframe"))?;

    Ok(())
}

/// Begin an in-band detach of the branch fed by `queue`. An idle probe
/// fires at the next data-free instant, unlinks the branch and injects EOS
/// into it; the branch's EOS then surfaces on the bus as a forwarded
/// message and teardown proceeds from there.
pub fn schedule_detach(queue: &gst::Element) -> Result<(), Error> {
    let pad = queue.static_pad("src").ok_or(Error::NoPad("src"))?;

    pad.add_probe(gst::PadProbeType::IDLE, move |pad, _info| {
        let Some(peer) = pad.peer() else {
            warn!("detach probe fired on an unlinked pad");
            return gst::PadProbeReturn::Remove;
        };

        if pad.unlink(&peer).is_err() {
            error!("failed to unlink branch");
            return gst::PadProbeReturn::Remove;
        }

        peer.send_event(gst::event::Eos::new());
        debug!("branch EOS sent");

        gst::PadProbeReturn::Remove
    })
    .ok_or(Error::Probe("branch idle"))?;

    Ok(())
}
