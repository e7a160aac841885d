//! Robot Link
//!
//! Synchronous command channel to the arm controller. The wire protocol
//! lives outside this crate; [`SimulatedRobotLink`] stands in for it in the
//! binary's dry runs and in tests.

use crate::tasks::model::{CartesianPose, Position};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Robot controller commands
pub trait RobotLink: Send {
    /// Open the connection
    fn connect(&mut self, address: &str) -> Result<()>;

    /// Close the connection; closing a closed link is a no-op
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Linear move to a cartesian pose at `velocity` mm/s
    fn move_line(&mut self, target: &CartesianPose, velocity: f64) -> Result<()>;

    /// Start hand-guiding with the mounted tool's weight (N) and centre of mass (mm)
    fn hand_guide(&mut self, weight: f64, centre_of_mass: &[f64; 3]) -> Result<()>;

    fn open_gripper(&mut self) -> Result<()>;

    fn close_gripper(&mut self) -> Result<()>;

    /// Current pose
    fn get_position(&mut self) -> Result<Position>;
}

/// A command as received by the simulated controller
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCommand {
    Connect(String),
    Disconnect,
    MoveLine { target: CartesianPose, velocity: f64 },
    HandGuide { weight: f64, centre_of_mass: [f64; 3] },
    OpenGripper,
    CloseGripper,
}

/// Shared view of the commands a simulated link received
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    commands: Arc<Mutex<Vec<RobotCommand>>>,
}

impl CommandLog {
    fn push(&self, command: RobotCommand) {
        self.commands.lock().push(command);
    }

    /// Copy of every command so far
    pub fn snapshot(&self) -> Vec<RobotCommand> {
        self.commands.lock().clone()
    }

    /// Motion and gripper commands only
    pub fn primitives(&self) -> Vec<RobotCommand> {
        self.commands
            .lock()
            .iter()
            .filter(|c| !matches!(c, RobotCommand::Connect(_) | RobotCommand::Disconnect))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

/// In-process arm that logs commands and tracks its pose
#[derive(Debug)]
pub struct SimulatedRobotLink {
    connected: bool,
    pose: Position,
    log: CommandLog,
    motion_time: Duration,
    fail_after: Option<usize>,
    primitives_sent: usize,
}

impl Default for SimulatedRobotLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRobotLink {
    pub fn new() -> Self {
        Self {
            connected: false,
            pose: Position {
                cartesian: [0.0; 6],
                joints: [0.0; 7],
            },
            log: CommandLog::default(),
            motion_time: Duration::ZERO,
            fail_after: None,
            primitives_sent: 0,
        }
    }

    /// Pretend each primitive takes this long
    pub fn with_motion_time(mut self, motion_time: Duration) -> Self {
        self.motion_time = motion_time;
        self
    }

    /// Drop the connection after `count` successful primitives
    pub fn with_failure_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Handle to the command log; stays valid after the link moves threads
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    fn primitive(&mut self, command: RobotCommand) -> Result<()> {
        if !self.connected {
            return Err(Error::Transport("robot link is not connected".to_string()));
        }
        if self.fail_after == Some(self.primitives_sent) {
            self.connected = false;
            return Err(Error::Transport("connection to robot lost".to_string()));
        }

        debug!(command = ?command, "Robot command");
        if !self.motion_time.is_zero() {
            std::thread::sleep(self.motion_time);
        }
        self.log.push(command);
        self.primitives_sent += 1;
        Ok(())
    }
}

impl RobotLink for SimulatedRobotLink {
    fn connect(&mut self, address: &str) -> Result<()> {
        address
            .parse::<IpAddr>()
            .map_err(|_| Error::Transport(format!("invalid robot address {:?}", address)))?;
        self.connected = true;
        self.log.push(RobotCommand::Connect(address.to_string()));
        info!(address, "Simulated robot connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.log.push(RobotCommand::Disconnect);
            info!("Simulated robot disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn move_line(&mut self, target: &CartesianPose, velocity: f64) -> Result<()> {
        self.primitive(RobotCommand::MoveLine {
            target: *target,
            velocity,
        })?;
        self.pose.cartesian = *target;
        Ok(())
    }

    fn hand_guide(&mut self, weight: f64, centre_of_mass: &[f64; 3]) -> Result<()> {
        self.primitive(RobotCommand::HandGuide {
            weight,
            centre_of_mass: *centre_of_mass,
        })
    }

    fn open_gripper(&mut self) -> Result<()> {
        self.primitive(RobotCommand::OpenGripper)
    }

    fn close_gripper(&mut self) -> Result<()> {
        self.primitive(RobotCommand::CloseGripper)
    }

    fn get_position(&mut self) -> Result<Position> {
        if !self.connected {
            return Err(Error::Transport("robot link is not connected".to_string()));
        }
        Ok(self.pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_require_connection() {
        let mut link = SimulatedRobotLink::new();
        assert!(matches!(link.open_gripper(), Err(Error::Transport(_))));
        assert!(matches!(link.get_position(), Err(Error::Transport(_))));
        assert!(link.command_log().is_empty());
    }

    #[test]
    fn test_connect_validates_address() {
        let mut link = SimulatedRobotLink::new();
        assert!(link.connect("not an ip").is_err());
        assert!(!link.is_connected());
        link.connect("172.31.1.147").unwrap();
        assert!(link.is_connected());
    }

    #[test]
    fn test_move_updates_pose_and_log() {
        let mut link = SimulatedRobotLink::new();
        let log = link.command_log();
        link.connect("127.0.0.1").unwrap();

        let target = [400.0, 10.0, 250.0, 0.0, 3.0, 0.0];
        link.move_line(&target, 25.0).unwrap();
        link.close_gripper().unwrap();
        link.disconnect();
        link.disconnect();

        assert_eq!(
            log.snapshot(),
            vec![
                RobotCommand::Connect("127.0.0.1".to_string()),
                RobotCommand::MoveLine {
                    target,
                    velocity: 25.0
                },
                RobotCommand::CloseGripper,
                RobotCommand::Disconnect,
            ]
        );
        assert_eq!(log.primitives().len(), 2);
    }

    #[test]
    fn test_get_position_tracks_moves() {
        let mut link = SimulatedRobotLink::new();
        link.connect("127.0.0.1").unwrap();
        let target = [1.0, 2.0, 3.0, 0.0, 0.0, 0.0];
        link.move_line(&target, 10.0).unwrap();
        assert_eq!(link.get_position().unwrap().cartesian, target);
    }

    #[test]
    fn test_failure_injection_drops_connection() {
        let mut link = SimulatedRobotLink::new().with_failure_after(1);
        link.connect("127.0.0.1").unwrap();
        link.open_gripper().unwrap();
        assert!(matches!(link.close_gripper(), Err(Error::Transport(_))));
        assert!(!link.is_connected());
    }
}
