//! Integration tests for robot dispatch
//!
//! Uses the default class table (base plate, gearbox, motor, axle, cover and
//! two wheels, with the cover guarded behind the last wheel) against task
//! records on disk and a simulated robot.

use cobot_cell::app::config::DispatchConfig;
use cobot_cell::cell::context::CellContext;
use cobot_cell::robot::dispatch::{DispatchSettings, DispatchState, RobotDispatchLoop};
use cobot_cell::robot::executor::{ScriptedPrompt, TaskExecutor};
use cobot_cell::robot::link::{CommandLog, RobotCommand, RobotLink, SimulatedRobotLink};
use cobot_cell::tasks::model::Position;
use cobot_cell::tasks::{Operation, TaskRegistry};
use cobot_cell::Error;
use crossbeam::channel::unbounded;
use std::time::Duration;
use tempfile::TempDir;

const BASE_PLATE: usize = 0;
const MOTOR: usize = 2;
const COVER: usize = 4;
const WHEEL: usize = 5;

const TASKS: [&str; 7] = [
    "base plate",
    "gearbox",
    "motor",
    "axle",
    "cover",
    "wheel1",
    "wheel2",
];

type Robot = RobotDispatchLoop<SimulatedRobotLink, ScriptedPrompt>;

/// Every task moves to its own position and closes the gripper
fn write_tasks(temp_dir: &TempDir) {
    let mut registry = open_registry(temp_dir);
    for (i, task) in TASKS.iter().enumerate() {
        registry.add_task(task).unwrap();
        registry
            .add_position(
                task,
                "approach",
                Position {
                    cartesian: [i as f64 * 100.0, 0.0, 250.0, 0.0, 0.0, 0.0],
                    joints: [0.0; 7],
                },
            )
            .unwrap();
        registry
            .add_operation(task, Operation::move_line("approach", 50.0).with_delay(0.0))
            .unwrap();
        registry
            .add_operation(task, Operation::close_gripper().with_delay(0.0))
            .unwrap();
        registry.save_task(task).unwrap();
    }
}

fn open_registry(temp_dir: &TempDir) -> TaskRegistry {
    TaskRegistry::open(
        &temp_dir.path().join("tasks"),
        &temp_dir.path().join("tools.json"),
    )
    .unwrap()
}

fn settings() -> DispatchSettings {
    DispatchSettings {
        address: "172.31.1.147".to_string(),
        poll_interval: Duration::from_millis(1),
        heartbeat_interval: Duration::from_secs(60),
    }
}

fn started_robot(temp_dir: &TempDir) -> (Robot, CommandLog, CellContext) {
    write_tasks(temp_dir);
    let link = SimulatedRobotLink::new();
    let log = link.command_log();
    let mut robot = RobotDispatchLoop::new(
        TaskExecutor::new(open_registry(temp_dir), link, ScriptedPrompt::default()),
        &DispatchConfig::default(),
        settings(),
    );
    let ctx = CellContext::new();
    robot.start(&ctx).unwrap();
    (robot, log, ctx)
}

fn moves(log: &CommandLog) -> usize {
    log.primitives()
        .iter()
        .filter(|c| matches!(c, RobotCommand::MoveLine { .. }))
        .count()
}

#[test]
fn test_full_assembly_order() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (mut robot, log, ctx) = started_robot(&temp_dir);

    for label in [0, 1, 2, 3, WHEEL, COVER, WHEEL] {
        ctx.motion.set();
        assert!(robot.dispatch(label, &ctx).unwrap());
        assert!(!ctx.motion.is_set());
    }

    assert_eq!(moves(&log), 7);
    let targets: Vec<f64> = log
        .primitives()
        .iter()
        .filter_map(|c| match c {
            RobotCommand::MoveLine { target, .. } => Some(target[0]),
            _ => None,
        })
        .collect();
    // wheel1 (index 5) before the cover (4), then wheel2 (6)
    assert_eq!(targets, vec![0.0, 100.0, 200.0, 300.0, 500.0, 400.0, 600.0]);
    assert!((0..=WHEEL).all(|label| robot.remaining().remaining(label) == Some(0)));
}

#[test]
fn test_extra_instance_is_inconsistent_and_motionless() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (mut robot, log, ctx) = started_robot(&temp_dir);

    robot.dispatch(MOTOR, &ctx).unwrap();
    let before = log.primitives().len();

    let result = robot.dispatch(MOTOR, &ctx);
    assert!(matches!(result, Err(Error::InconsistentState(_))));
    assert_eq!(log.primitives().len(), before);
}

#[test]
fn test_third_wheel_is_inconsistent() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (mut robot, log, ctx) = started_robot(&temp_dir);

    robot.dispatch(WHEEL, &ctx).unwrap();
    robot.dispatch(WHEEL, &ctx).unwrap();
    assert_eq!(moves(&log), 2);

    assert!(matches!(robot.dispatch(WHEEL, &ctx), Err(Error::InconsistentState(_))));
    assert_eq!(moves(&log), 2);
}

#[test]
fn test_cover_before_any_wheel_is_blocked() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (mut robot, log, ctx) = started_robot(&temp_dir);

    robot.dispatch(BASE_PLATE, &ctx).unwrap();
    let before = log.primitives().len();

    assert!(matches!(robot.dispatch(COVER, &ctx), Err(Error::InconsistentState(_))));
    assert_eq!(log.primitives().len(), before);
    assert_eq!(robot.remaining().remaining(COVER), Some(1));
}

#[test]
fn test_cover_after_both_wheels_is_blocked() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (mut robot, log, ctx) = started_robot(&temp_dir);

    robot.dispatch(WHEEL, &ctx).unwrap();
    robot.dispatch(WHEEL, &ctx).unwrap();
    let before = log.primitives().len();

    assert!(matches!(robot.dispatch(COVER, &ctx), Err(Error::InconsistentState(_))));
    assert_eq!(log.primitives().len(), before);
}

#[test]
fn test_run_stops_cell_on_guard_violation() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_tasks(&temp_dir);
    let link = SimulatedRobotLink::new();
    let log = link.command_log();
    let mut robot = RobotDispatchLoop::new(
        TaskExecutor::new(open_registry(&temp_dir), link, ScriptedPrompt::default()),
        &DispatchConfig::default(),
        settings(),
    );

    let ctx = CellContext::new();
    let (tx, rx) = unbounded();
    tx.send(BASE_PLATE).unwrap();
    tx.send(COVER).unwrap();
    tx.send(MOTOR).unwrap();

    let result = robot.run(&rx, &ctx);
    assert!(matches!(result, Err(Error::InconsistentState(_))));
    assert!(ctx.stop.is_raised());
    assert_eq!(robot.state(), DispatchState::Shutdown);

    // base plate only, then disconnect
    assert_eq!(moves(&log), 1);
    assert_eq!(log.snapshot().last(), Some(&RobotCommand::Disconnect));
    assert_eq!(robot.remaining().remaining(MOTOR), Some(1));
}

#[test]
fn test_run_without_task_records_never_moves() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let link = SimulatedRobotLink::new();
    let log = link.command_log();
    let mut robot = RobotDispatchLoop::new(
        TaskExecutor::new(open_registry(&temp_dir), link, ScriptedPrompt::default()),
        &DispatchConfig::default(),
        settings(),
    );

    let ctx = CellContext::new();
    let (tx, rx) = unbounded();
    tx.send(BASE_PLATE).unwrap();

    assert!(matches!(robot.run(&rx, &ctx), Err(Error::NotFound(_))));
    assert!(ctx.stop.is_raised());
    assert!(ctx.robot_online.is_set());
    assert_eq!(moves(&log), 0);
    assert!(!robot.executor().link().is_connected());
}
