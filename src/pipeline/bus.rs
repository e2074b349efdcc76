//! Bus dispatch
//!
//! A synchronous bus handler turns pipeline messages into control-thread
//! commands. The pipeline runs with `message-forward=true`, so an EOS
//! produced inside a child bin (a draining branch) arrives wrapped in a
//! `GstBinForwarded` element message and is treated exactly like top-level
//! EOS. While `stop()` drains the pipeline itself, the handler is gated
//! off and the control thread pops the bus directly.

use crate::pipeline::Command;
use gstreamer as gst;
use gstreamer::prelude::*;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Install the sync handler. The returned flag gates dispatch: clearing it
/// silences the handler without racing message delivery, mirroring how the
/// drain path takes over the bus.
pub fn install_sync_handler(
    bus: &gst::Bus,
    commands: UnboundedSender<Command>,
) -> Arc<AtomicBool> {
    let enabled = Arc::new(AtomicBool::new(true));

    let gate = Arc::clone(&enabled);
    bus.set_sync_handler(move |_bus, message| {
        if gate.load(Ordering::Relaxed) {
            dispatch(message, &commands);
        }
        gst::BusSyncReply::Pass
    });

    enabled
}

fn dispatch(message: &gst::MessageRef, commands: &UnboundedSender<Command>) {
    use gst::MessageView;

    match message.view() {
        MessageView::Error(err) => {
            error!(
                "pipeline error from {:?}: {} ({:?})",
                err.src().map(|s| s.path_string()),
                err.error(),
                err.debug()
            );
            let _ = commands.send(Command::BusError {
                message: err.error().to_string(),
            });
        }
        MessageView::Eos(..) => {
            let _ = commands.send(Command::BusEos);
        }
        MessageView::Element(element) => {
            if let Some(forwarded) = forwarded_message(message) {
                if let MessageView::Eos(..) = forwarded.view() {
                    debug!(
                        "forwarded EOS from {:?}",
                        element.src().map(|s| s.path_string())
                    );
                    let _ = commands.send(Command::BusEos);
                }
            }
        }
        MessageView::StateChanged(change) => {
            debug!(
                "state changed on {:?}: {:?} -> {:?}",
                message.src().map(|s| s.path_string()),
                change.old(),
                change.current()
            );
        }
        _ => {}
    }
}

/// Unwrap the inner message of a `GstBinForwarded` element message.
pub fn forwarded_message(message: &gst::MessageRef) -> Option<gst::Message> {
    let s = message.structure()?;
    if s.name() != "GstBinForwarded" {
        return None;
    }
    s.get::<gst::Message>("message").ok()
}
