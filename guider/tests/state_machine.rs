mod common;

use common::TestRig;
use guider::mock::{MockMount, ScriptedLocator};
use guider::{
    FrameDecision, Guider, GuiderCallbackEvent, GuiderConfig, GuiderState, ImageSize, LostReason,
    MountRole, Position,
};
use std::time::Duration;

fn is_alert(e: &GuiderCallbackEvent) -> bool {
    matches!(e, GuiderCallbackEvent::Alert { .. })
}

#[test]
fn test_calibration_then_guiding_in_one_update() {
    let mut rig = TestRig::new(MockMount::new("mount", 5));
    rig.found(100.0, 100.0);
    assert_eq!(rig.guider.state(), GuiderState::Selected);

    rig.guider.start_guiding(None).unwrap();
    assert_eq!(rig.guider.state(), GuiderState::CalibratingPrimary);

    for _ in 0..4 {
        assert_eq!(rig.found(100.0, 100.0), FrameDecision::Continue);
        assert_eq!(rig.guider.state(), GuiderState::CalibratingPrimary);
    }

    rig.clear_events();
    let decision = rig.found(100.0, 100.0);
    assert_eq!(
        decision,
        FrameDecision::AdvanceState {
            from: GuiderState::CalibratingPrimary,
            to: GuiderState::Guiding
        }
    );
    assert_eq!(rig.mount.calibration_steps(), 5);
    assert_eq!(
        rig.state_changes(),
        vec![
            (GuiderState::CalibratingPrimary, GuiderState::Calibrated),
            (GuiderState::Calibrated, GuiderState::Guiding),
        ]
    );
    let events = rig.events();
    assert!(events.contains(&GuiderCallbackEvent::CalibrationComplete {
        role: MountRole::Primary,
        mount: "mount".to_string()
    }));
    assert!(events.contains(&GuiderCallbackEvent::StartGuiding));
    assert_eq!(rig.guider.lock_position(), Some(Position::new(100.0, 100.0)));
}

#[test]
fn test_calibration_failure_falls_back_to_uninitialized() {
    let mut rig = TestRig::new(MockMount::new("mount", 5));
    rig.found(100.0, 100.0);
    rig.guider.start_guiding(None).unwrap();
    rig.found(100.0, 100.0);
    rig.found(100.0, 100.0);

    rig.clear_events();
    rig.mount.fail_calibration("star did not move enough");
    let decision = rig.found(100.0, 100.0);

    match decision {
        FrameDecision::CalibrationFailed { role, reason } => {
            assert_eq!(role, MountRole::Primary);
            assert!(reason.contains("star did not move enough"));
        }
        other => panic!("expected calibration failure, got {other:?}"),
    }
    assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
    assert!(rig.guider.lock_position().is_none());
    assert_eq!(rig.count_events(is_alert), 1);
    assert_eq!(
        rig.count_events(|e| matches!(e, GuiderCallbackEvent::CalibrationFailed { .. })),
        1
    );
    assert!(!rig.guider.is_settling());
}

#[test]
fn test_secondary_mount_calibrates_after_primary() {
    common::init_logging();
    let mount = MockMount::new("mount", 1);
    let ao = MockMount::new("ao", 2);
    let locator = ScriptedLocator::new();
    let guider = Guider::new(
        GuiderConfig::default(),
        Box::new(mount.clone()),
        Box::new(locator.clone()),
    )
    .unwrap()
    .with_secondary_mount(Box::new(ao.clone()));
    let mut rig = TestRig::from_guider(
        guider,
        mount,
        locator,
        ImageSize::from_width_height(640, 480),
        Duration::from_secs(1),
    );

    rig.found(200.0, 200.0);
    rig.guider.start_guiding(None).unwrap();
    assert_eq!(
        rig.found(200.0, 200.0),
        FrameDecision::AdvanceState {
            from: GuiderState::CalibratingPrimary,
            to: GuiderState::CalibratingSecondary
        }
    );
    assert!(rig.events().contains(&GuiderCallbackEvent::StartCalibration {
        role: MountRole::Secondary,
        mount: "ao".to_string()
    }));

    assert_eq!(rig.found(200.0, 200.0), FrameDecision::Continue);
    assert_eq!(
        rig.found(200.0, 200.0),
        FrameDecision::AdvanceState {
            from: GuiderState::CalibratingSecondary,
            to: GuiderState::Guiding
        }
    );
    assert_eq!(ao.calibration_steps(), 2);
    assert_eq!(ao.adjust_calls(), 1);
}

#[test]
fn test_stop_during_calibration() {
    let mut rig = TestRig::new(MockMount::new("mount", 5));
    rig.found(100.0, 100.0);
    rig.guider.start_guiding(None).unwrap();
    rig.found(100.0, 100.0);

    let decision = rig
        .guider
        .update_guide_state(None, true, &rig.cancel)
        .unwrap();
    assert_eq!(
        decision,
        FrameDecision::Stopped {
            state: GuiderState::Uninitialized
        }
    );
    let events = rig.events();
    assert!(events.contains(&GuiderCallbackEvent::CalibrationFailed {
        role: MountRole::Primary,
        mount: "mount".to_string(),
        reason: "Calibration manually stopped".to_string()
    }));
    assert!(events.contains(&GuiderCallbackEvent::GuidingStopped));
}

#[test]
fn test_stop_while_selected_is_a_no_op() {
    let mut rig = TestRig::new(MockMount::calibrated_identity());
    rig.found(100.0, 100.0);
    let decision = rig
        .guider
        .update_guide_state(None, true, &rig.cancel)
        .unwrap();
    assert_eq!(
        decision,
        FrameDecision::Stopped {
            state: GuiderState::Selected
        }
    );
    assert_eq!(rig.guider.lock_position(), Some(Position::new(100.0, 100.0)));
}

#[test]
fn test_sticky_lock_survives_guiding_start() {
    let config = GuiderConfig {
        sticky_lock: true,
        ..GuiderConfig::default()
    };
    let mut rig = TestRig::with_config(
        MockMount::calibrated_identity(),
        config,
        ImageSize::from_width_height(640, 480),
    );
    rig.found(100.0, 100.0);
    rig.guider
        .set_lock_position(Position::new(110.0, 105.0))
        .unwrap();
    rig.start_guiding_at(100.0, 100.0);
    assert_eq!(rig.guider.lock_position(), Some(Position::new(110.0, 105.0)));
}

#[test]
fn test_lock_moves_to_star_without_sticky_lock() {
    let mut rig = TestRig::new(MockMount::calibrated_identity());
    rig.found(100.0, 100.0);
    rig.guider
        .set_lock_position(Position::new(110.0, 105.0))
        .unwrap();
    rig.start_guiding_at(100.0, 100.0);
    assert_eq!(rig.guider.lock_position(), Some(Position::new(100.0, 100.0)));
}

#[test]
fn test_ignore_lost_star_keeps_selection() {
    let config = GuiderConfig {
        ignore_lost_star_looping: true,
        ..GuiderConfig::default()
    };
    let mut rig = TestRig::with_config(
        MockMount::calibrated_identity(),
        config,
        ImageSize::from_width_height(640, 480),
    );
    rig.found(100.0, 100.0);
    assert_eq!(
        rig.lost(),
        FrameDecision::FrameDropped {
            reason: LostReason::LowSnr
        }
    );
    assert_eq!(rig.guider.state(), GuiderState::Selected);
    assert_eq!(rig.guider.lock_position(), Some(Position::new(100.0, 100.0)));
}

#[test]
fn test_lost_star_while_selected_reports_star_lost() {
    let mut rig = TestRig::new(MockMount::calibrated_identity());
    rig.found(100.0, 100.0);
    rig.clear_events();
    assert_eq!(
        rig.lost(),
        FrameDecision::StarLost {
            reason: LostReason::LowSnr
        }
    );
    assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
    assert_eq!(
        rig.count_events(|e| matches!(e, GuiderCallbackEvent::StarLost(_))),
        1
    );
    assert!(rig.events().contains(&GuiderCallbackEvent::LockPositionLost));
}

#[test]
fn test_lost_star_during_calibration_blunders_on() {
    let mut rig = TestRig::new(MockMount::new("mount", 3));
    rig.found(100.0, 100.0);
    rig.guider.start_guiding(None).unwrap();
    assert_eq!(
        rig.lost(),
        FrameDecision::FrameDropped {
            reason: LostReason::LowSnr
        }
    );
    assert_eq!(rig.guider.state(), GuiderState::CalibratingPrimary);
    assert_eq!(rig.mount.calibration_steps(), 0);
}
