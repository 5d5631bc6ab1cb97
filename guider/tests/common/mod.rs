#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use guider::mock::{MockCamera, MockMount, ScriptedLocator};
use guider::{
    CancellationToken, FrameDecision, Guider, GuiderCallbackEvent, GuiderConfig, GuiderState,
    ImageSize, LostReason,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Guider wired to mock collaborators, driven one frame at a time
pub struct TestRig {
    pub guider: Guider,
    pub mount: MockMount,
    pub locator: ScriptedLocator,
    pub camera: MockCamera,
    pub cancel: CancellationToken,
    events: Arc<Mutex<Vec<GuiderCallbackEvent>>>,
}

impl TestRig {
    pub fn new(mount: MockMount) -> Self {
        Self::with_config(mount, GuiderConfig::default(), ImageSize::from_width_height(640, 480))
    }

    pub fn with_config(mount: MockMount, config: GuiderConfig, size: ImageSize) -> Self {
        init_logging();
        let locator = ScriptedLocator::new();
        let guider = Guider::new(config, Box::new(mount.clone()), Box::new(locator.clone()))
            .expect("valid config");
        Self::from_guider(guider, mount, locator, size, Duration::from_secs(1))
    }

    pub fn from_guider(
        guider: Guider,
        mount: MockMount,
        locator: ScriptedLocator,
        size: ImageSize,
        frame_interval: Duration,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        guider.register_callback(move |e| sink.lock().unwrap().push(e.clone()));
        Self {
            guider,
            mount,
            locator,
            camera: MockCamera::new(size, frame_interval),
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub fn found(&mut self, x: f64, y: f64) -> FrameDecision {
        self.locator.push_found(x, y);
        self.advance()
    }

    pub fn lost(&mut self) -> FrameDecision {
        self.locator.push_lost(LostReason::LowSnr);
        self.advance()
    }

    /// Process the next frame with whatever the locator has queued.
    pub fn advance(&mut self) -> FrameDecision {
        let frame = self.camera.next_frame();
        self.guider
            .update_guide_state(Some(frame), false, &self.cancel)
            .expect("frame processed")
    }

    /// Select a star at `(x, y)` and bring the guider to `Guiding`.
    pub fn start_guiding_at(&mut self, x: f64, y: f64) {
        self.found(x, y);
        assert_eq!(self.guider.state(), GuiderState::Selected);
        self.guider.start_guiding(None).expect("start guiding");
        while self.guider.state() != GuiderState::Guiding {
            let before = self.guider.state();
            self.found(x, y);
            assert!(
                self.guider.state() >= before,
                "guider regressed from {before} to {}",
                self.guider.state()
            );
        }
    }

    pub fn events(&self) -> Vec<GuiderCallbackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count_events(&self, pred: impl Fn(&GuiderCallbackEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn state_changes(&self) -> Vec<(GuiderState, GuiderState)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                GuiderCallbackEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}
