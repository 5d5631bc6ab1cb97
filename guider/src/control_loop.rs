//! Background guide loop.
//!
//! The control thread owns the `Guider`. Once a frame has been processed,
//! including any mount move it triggered, it asks the capture thread for the
//! next exposure with a fresh subframe hint. Commands sent through
//! `GuideLoopHandle` are applied between frames and a `GuiderSnapshot` is
//! published after each one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::callback::CallbackRegistry;
use crate::camera::{Camera, CameraError, Frame, Subframe};
use crate::cancel::{CancellationToken, POLL_INTERVAL};
use crate::dither::DitherResult;
use crate::error::GuiderError;
use crate::lock_shift::LockShiftParams;
use crate::position::Position;
use crate::settle::SettleParams;
use crate::snapshot::GuiderSnapshot;
use crate::state::PauseType;
use crate::Guider;

type Reply<T> = Sender<Result<T, GuiderError>>;

/// Requests executed on the control thread between frames
pub enum GuiderCommand {
    StartGuiding {
        settle: Option<SettleParams>,
        reply: Reply<()>,
    },
    StopGuiding {
        reply: Reply<()>,
    },
    Dither {
        amount: f64,
        ra_only: bool,
        settle: Option<SettleParams>,
        reply: Reply<DitherResult>,
    },
    SetPaused {
        pause: PauseType,
        reply: Reply<PauseType>,
    },
    /// Lock at `position`, or on the star nearest it unless `exact`
    SetLockPosition {
        position: Position,
        exact: bool,
        reply: Reply<Position>,
    },
    SetLockShift {
        params: LockShiftParams,
        reply: Reply<()>,
    },
    Reset {
        full: bool,
        reply: Reply<()>,
    },
}

#[derive(Debug, Clone)]
pub struct GuideLoopOptions {
    pub exposure: Duration,
}

impl Default for GuideLoopOptions {
    fn default() -> Self {
        Self {
            exposure: Duration::from_secs(1),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Control-thread side of the loop
pub struct GuideLoop {
    guider: Guider,
    exposure: Duration,
    captures: Sender<Option<Subframe>>,
    frames: Receiver<Result<Frame, CameraError>>,
    commands: Receiver<GuiderCommand>,
    snapshot: Arc<Mutex<GuiderSnapshot>>,
    cancel: CancellationToken,
}

impl GuideLoop {
    /// Start capturing with `camera` and guiding with `guider` on background threads.
    pub fn spawn<C>(guider: Guider, camera: C, options: GuideLoopOptions) -> GuideLoopHandle
    where
        C: Camera + 'static,
    {
        let cancel = CancellationToken::new();
        // At most one capture is requested and one frame delivered at a time
        let (capture_tx, capture_rx) = bounded(1);
        let (frame_tx, frame_rx) = bounded(1);
        let (command_tx, command_rx) = unbounded();
        let snapshot = Arc::new(Mutex::new(guider.snapshot()));
        let callbacks = guider.callbacks();

        let capture_cancel = cancel.clone();
        let exposure = options.exposure;
        let capture = thread::spawn(move || {
            capture_worker(camera, exposure, capture_rx, frame_tx, capture_cancel);
        });

        let control = GuideLoop {
            guider,
            exposure,
            captures: capture_tx,
            frames: frame_rx,
            commands: command_rx,
            snapshot: snapshot.clone(),
            cancel: cancel.clone(),
        };
        let control = thread::spawn(move || control.run());

        GuideLoopHandle {
            commands: command_tx,
            snapshot,
            callbacks,
            cancel,
            control: Some(control),
            capture: Some(capture),
        }
    }

    fn run(mut self) -> Guider {
        info!("guide loop started");
        self.guider.set_capture_active(true);
        self.publish();

        let mut capture_pending = false;
        loop {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }
            if self.cancel.is_cancelled() {
                break;
            }

            if !capture_pending {
                if self.captures.send(self.guider.subframe_hint()).is_err() {
                    warn!("capture thread exited");
                    break;
                }
                capture_pending = true;
            }

            let received = self.frames.recv_timeout(POLL_INTERVAL);
            if received.is_ok() {
                capture_pending = false;
            }
            match received {
                Ok(Ok(frame)) => {
                    let frame_number = frame.frame_number;
                    match self
                        .guider
                        .update_guide_state(Some(frame), false, &self.cancel)
                    {
                        Ok(decision) => debug!("frame {frame_number}: {decision:?}"),
                        Err(GuiderError::Cancelled) => break,
                        Err(e) => warn!("frame {frame_number} not processed: {e}"),
                    }
                }
                Ok(Err(CameraError::Cancelled)) => break,
                Ok(Err(e)) => self.guider.frame_capture_failed(&e, self.exposure),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("capture thread exited");
                    break;
                }
            }
            self.publish();
        }

        // A frame captured after cancellation is discarded unprocessed
        if let Err(e) = self.guider.update_guide_state(None, true, &self.cancel) {
            error!("error stopping guider: {e}");
        }
        self.guider.set_capture_active(false);
        self.publish();
        info!("guide loop stopped");
        self.guider
    }

    fn publish(&self) {
        *lock(&self.snapshot) = self.guider.snapshot();
    }

    fn handle_command(&mut self, command: GuiderCommand) {
        // A dropped reply receiver means the caller gave up waiting
        match command {
            GuiderCommand::StartGuiding { settle, reply } => {
                let _ = reply.send(self.guider.start_guiding(settle));
            }
            GuiderCommand::StopGuiding { reply } => {
                let _ = reply.send(self.guider.stop_guiding());
            }
            GuiderCommand::Dither {
                amount,
                ra_only,
                settle,
                reply,
            } => {
                let mut rng = rand::rng();
                let _ = reply.send(self.guider.dither(amount, ra_only, settle, &mut rng));
            }
            GuiderCommand::SetPaused { pause, reply } => {
                let _ = reply.send(Ok(self.guider.set_paused(pause)));
            }
            GuiderCommand::SetLockPosition {
                position,
                exact,
                reply,
            } => {
                let result = if exact {
                    self.guider.set_lock_position(position).map(|()| position)
                } else {
                    self.guider.set_lock_position_to_star_at(position)
                };
                let _ = reply.send(result);
            }
            GuiderCommand::SetLockShift { params, reply } => {
                let _ = reply.send(self.guider.set_lock_shift_params(params));
            }
            GuiderCommand::Reset { full, reply } => {
                let _ = reply.send(self.guider.reset(full));
            }
        }
        self.publish();
    }
}

/// Expose one frame per request from the control thread.
fn capture_worker<C: Camera>(
    mut camera: C,
    exposure: Duration,
    requests: Receiver<Option<Subframe>>,
    frames: Sender<Result<Frame, CameraError>>,
    cancel: CancellationToken,
) {
    debug!("capture worker started");
    while !cancel.is_cancelled() {
        let hint = match requests.recv_timeout(POLL_INTERVAL) {
            Ok(hint) => hint,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let result = camera.capture_frame(exposure, hint, &cancel);
        let cancelled = matches!(result, Err(CameraError::Cancelled));
        if frames.send(result).is_err() || cancelled {
            break;
        }
    }
    debug!("capture worker shutting down");
}

/// Owner's handle on a running guide loop.
///
/// Dropping the handle cancels the loop and joins its threads.
pub struct GuideLoopHandle {
    commands: Sender<GuiderCommand>,
    snapshot: Arc<Mutex<GuiderSnapshot>>,
    callbacks: CallbackRegistry,
    cancel: CancellationToken,
    control: Option<JoinHandle<Guider>>,
    capture: Option<JoinHandle<()>>,
}

impl GuideLoopHandle {
    /// Latest published guider state
    pub fn snapshot(&self) -> GuiderSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn callbacks(&self) -> CallbackRegistry {
        self.callbacks.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.control.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> GuiderCommand,
    ) -> Result<T, GuiderError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(build(reply))
            .map_err(|_| GuiderError::LoopStopped)?;
        response.recv().map_err(|_| GuiderError::LoopStopped)?
    }

    pub fn start_guiding(&self, settle: Option<SettleParams>) -> Result<(), GuiderError> {
        self.request(|reply| GuiderCommand::StartGuiding { settle, reply })
    }

    pub fn stop_guiding(&self) -> Result<(), GuiderError> {
        self.request(|reply| GuiderCommand::StopGuiding { reply })
    }

    pub fn dither(
        &self,
        amount: f64,
        ra_only: bool,
        settle: Option<SettleParams>,
    ) -> Result<DitherResult, GuiderError> {
        self.request(|reply| GuiderCommand::Dither {
            amount,
            ra_only,
            settle,
            reply,
        })
    }

    /// Returns the previous pause mode.
    pub fn set_paused(&self, pause: PauseType) -> Result<PauseType, GuiderError> {
        self.request(|reply| GuiderCommand::SetPaused { pause, reply })
    }

    pub fn set_lock_position(&self, position: Position, exact: bool) -> Result<Position, GuiderError> {
        self.request(|reply| GuiderCommand::SetLockPosition {
            position,
            exact,
            reply,
        })
    }

    pub fn set_lock_shift(&self, params: LockShiftParams) -> Result<(), GuiderError> {
        self.request(|reply| GuiderCommand::SetLockShift { params, reply })
    }

    pub fn reset(&self, full: bool) -> Result<(), GuiderError> {
        self.request(|reply| GuiderCommand::Reset { full, reply })
    }

    fn join(&mut self) -> Option<Guider> {
        self.cancel.cancel();
        let guider = match self.control.take().map(JoinHandle::join) {
            Some(Ok(guider)) => Some(guider),
            Some(Err(e)) => {
                error!("guide loop thread panicked: {e:?}");
                None
            }
            None => None,
        };
        if let Some(Err(e)) = self.capture.take().map(JoinHandle::join) {
            error!("capture thread panicked: {e:?}");
        }
        guider
    }

    /// Stop guiding, end the loop and hand the guider back.
    pub fn shutdown(mut self) -> Result<Guider, GuiderError> {
        self.join().ok_or(GuiderError::LoopStopped)
    }
}

impl Drop for GuideLoopHandle {
    fn drop(&mut self) {
        if self.control.is_some() {
            self.join();
        }
    }
}
