//! The port through which a running measurement talks to whoever is
//! presenting it.

use crate::control::ExecutionControl;
use log::{info, warn};
use std::sync::{
    mpsc::{self, Sender},
    Arc,
};

/// How the workflow reports progress and asks for the user's attention.
pub trait Observer {
    /// A log line. Must not block.
    fn info(&self, message: &str);

    /// The schedule changed, refresh any view of it.
    fn update(&self);

    /// Show `message` and block until the user acknowledges it. The
    /// measurement is paused while waiting.
    fn input(&self, message: &str);

    /// The whole schedule ran to the end.
    fn complete(&self);
}

impl<O: Observer + ?Sized> Observer for &O {
    fn info(&self, message: &str) {
        (**self).info(message)
    }
    fn update(&self) {
        (**self).update()
    }
    fn input(&self, message: &str) {
        (**self).input(message)
    }
    fn complete(&self) {
        (**self).complete()
    }
}

/// What a [`ChannelObserver`] sends to the host.
#[derive(Debug)]
pub enum WorkflowEvent {
    /// See [`Observer::info`].
    Info(String),
    /// See [`Observer::update`].
    Update,
    /// See [`Observer::input`]. Send on `ack` once the user has read it.
    Input {
        /// Text to show.
        message: String,
        /// Acknowledgement, send once read.
        ack: Sender<()>,
    },
    /// See [`Observer::complete`].
    Complete,
    /// The worker thread returned. Sent by the session, not the controller.
    Finished(crate::workflow::WorkflowState),
}

/// An [`Observer`] living on the worker thread that forwards everything to
/// the host over a channel.
///
/// `E` lets a host fold workflow events into its own event type.
pub struct ChannelObserver<E = WorkflowEvent> {
    tx: Sender<E>,
    control: Arc<ExecutionControl>,
}

impl<E> ChannelObserver<E>
where
    E: From<WorkflowEvent> + Send,
{
    /// Forward to `tx`. `control` is held while a prompt is pending.
    pub fn new(tx: Sender<E>, control: Arc<ExecutionControl>) -> Self {
        Self { tx, control }
    }

    fn send(&self, event: WorkflowEvent) -> bool {
        self.tx.send(E::from(event)).is_ok()
    }
}

impl<E> Clone for ChannelObserver<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            control: Arc::clone(&self.control),
        }
    }
}

impl<E> Observer for ChannelObserver<E>
where
    E: From<WorkflowEvent> + Send,
{
    fn info(&self, message: &str) {
        info!("{message}");
        self.send(WorkflowEvent::Info(message.to_owned()));
    }

    fn update(&self) {
        self.send(WorkflowEvent::Update);
    }

    fn input(&self, message: &str) {
        info!("Waiting for user: {message}");
        self.control.hold();

        let (ack, acked) = mpsc::channel();
        let sent = self.send(WorkflowEvent::Input {
            message: message.to_owned(),
            ack,
        });
        if !sent || acked.recv().is_err() {
            // Nobody is left to answer, so nobody can resume either.
            warn!("Prompt could not be answered, stopping");
            self.control.stop();
            return;
        }
        self.control.release();
    }

    fn complete(&self) {
        self.send(WorkflowEvent::Complete);
    }
}

/// An [`Observer`] that only logs. Prompts are acknowledged immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn info(&self, message: &str) {
        info!("{message}");
    }
    fn update(&self) {}
    fn input(&self, message: &str) {
        warn!("{message}");
    }
    fn complete(&self) {
        info!("Measurement complete");
    }
}
