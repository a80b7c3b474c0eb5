use std::time::Duration;

use nalgebra::Vector3;

use gate_fc::command::Transmitter;
use gate_fc::flight::{FlightController, TickAction};
use gate_fc::state::FlightState;
use gate_fc::FlightConfig;
use gate_vision::calibration::CalibrationData;
use gate_vision::geometry::GateGeometry;
use gate_vision::pnp::PlanarPnp;
use gate_vision::pose::PoseSolver;
use gate_vision::{DetectedMarker, Point2};

const ID: i32 = 2;

fn calibration() -> CalibrationData {
    CalibrationData::pinhole(280.7, 280.7, 320.0, 240.0)
}

fn controller() -> FlightController<Vec<u8>> {
    let pose = PoseSolver::new(calibration(), GateGeometry::new(12.3, 32.2), Box::new(PlanarPnp::default()));
    let tx = Transmitter::new(Vec::new()).unwrap().with_bind_settle(Duration::ZERO);
    FlightController::new(tx, pose, &FlightConfig::default())
}

/// Both gate markers seen straight on from `depth` cm.
fn frontal_gate(depth: f64) -> Vec<DetectedMarker> {
    let cal = calibration();
    let geo = GateGeometry::new(12.3, 32.2);
    let px: Vec<Point2> = geo
        .points()
        .iter()
        .map(|p| cal.project(&(Vector3::from(*p) + Vector3::new(0.0, 0.0, depth))).unwrap())
        .collect();
    // Right marker first: the solver orders by image position.
    vec![
        DetectedMarker::new(ID, [px[4], px[5], px[6], px[7]]),
        DetectedMarker::new(ID, [px[0], px[1], px[2], px[3]]),
    ]
}

fn written(fc: &FlightController<Vec<u8>>) -> String {
    String::from_utf8(fc.transmitter().get_ref().clone()).unwrap()
}

#[test]
fn tracked_gate_drives_throttle_from_height() {
    let mut fc = controller();
    fc.bind().unwrap();
    fc.arm().unwrap();
    assert!(fc.start_flying(0.0));
    assert_eq!(written(&fc), "\ndqda");

    let r = fc.process(0.1, &frontal_gate(40.0)).unwrap();
    assert!(r.pose.found);
    assert!((r.pose.height().unwrap() - 40.0).abs() < 1e-4);
    // kp 0.02, hold 0 cm: 40 cm up gives throttle -0.8.
    match r.action {
        TickAction::Commanded(cmd) => assert!((cmd.throttle + 0.8).abs() < 1e-5),
        other => panic!("expected a command, got {:?}", other),
    }
    assert_eq!(written(&fc), "\ndqda!368 1024 1024 1024\n");
}

#[test]
fn one_command_per_found_frame() {
    let mut fc = controller();
    fc.arm().unwrap();
    fc.start_flying(0.0);
    let gate = frontal_gate(60.0);
    for i in 1..=5 {
        fc.process(i as f64 * 0.1, &gate).unwrap();
    }
    assert_eq!(written(&fc).matches('!').count(), 5);
    assert_eq!(fc.missed_frames(), 0);
}

#[test]
fn reacquiring_the_gate_resets_the_miss_count() {
    let mut fc = controller();
    fc.arm().unwrap();
    fc.start_flying(0.0);
    let gate = frontal_gate(50.0);
    let mut now = 0.0;
    for _ in 0..3 {
        for _ in 0..10 {
            now += 0.1;
            fc.process(now, &[]).unwrap();
        }
        now += 0.1;
        fc.process(now, &gate).unwrap();
        assert_eq!(fc.missed_frames(), 0);
    }
    assert_eq!(fc.state(), FlightState::Flying);
}

#[test]
fn lost_gate_disarms_after_eleven_frames() {
    let mut fc = controller();
    fc.arm().unwrap();
    fc.start_flying(0.0);
    fc.process(0.1, &frontal_gate(40.0)).unwrap();
    let before = written(&fc);

    let mut last = None;
    for i in 0..11 {
        last = Some(fc.process(0.2 + i as f64 * 0.1, &[]).unwrap());
    }
    let report = last.unwrap();
    assert_eq!(report.action, TickAction::FailSafe(11));
    assert_eq!(fc.state(), FlightState::Unarmed);
    assert_eq!(written(&fc), format!("{}d", before));

    // Disarmed: further frames, found or not, send nothing.
    fc.process(2.0, &frontal_gate(40.0)).unwrap();
    fc.process(2.1, &[]).unwrap();
    assert_eq!(written(&fc), format!("{}d", before));
}
