//! Straight-line go-to-goal action
//!
//! Drives directly at a goal pose with a square-root velocity profile that
//! decelerates smoothly into the goal: `v = sqrt(2 · remaining · decel)`,
//! capped at the configured speed. When the heading error exceeds the
//! turn-in-place threshold the forward channel is withheld and a raised
//! rotational speed bound is requested instead, so a goal behind the robot
//! produces a pivot rather than a wide arc.
//!
//! # Goal modes
//!
//! - Position mode: done when within `close_dist` of the goal point.
//! - Distance-only mode: done when the travelled distance reaches the
//!   distance to the goal at the time it was set; useful when localization
//!   drift would otherwise chase a moving target.
//! - Encoder-frame goals: all math runs against the raw encoder pose, the
//!   ground truth for relative moves.
//!
//! Achievement additionally requires the measured speed to be near zero, so
//! the goal is not declared done while still coasting through it.

use super::{Action, DesiredMotion, FULL_STRENGTH};
use crate::robot::RobotHandle;
use crate::types::{Pose, sub_degrees};

/// Speed below which the robot counts as stopped for goal achievement (mm/s)
const ACHIEVED_VEL_EPSILON: f64 = 5.0;

/// Goal-seeking state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalState {
    /// No goal set; the action contributes nothing
    NoGoal,
    /// Actively driving toward the goal
    GoingToGoal,
    /// Goal reached; the action contributes nothing until a new goal
    AchievedGoal,
}

/// Action that drives straight to a goal pose
pub struct GotoStraight {
    name: String,
    robot: Option<RobotHandle>,
    desired: DesiredMotion,
    active: bool,
    state: GoalState,
    goal: Pose,
    use_encoder_goal: bool,
    backing: bool,
    just_distance: bool,
    speed: f64,
    close_dist: f64,
    turn_thresh: f64,
    max_turn_speed: f64,
    max_rot_vel: f64,
    decel: f64,
    dist: f64,
    dist_travelled: f64,
    last_pose: Pose,
}

impl GotoStraight {
    /// Create the action with a maximum driving speed in mm/s
    pub fn new(name: &str, speed: f64) -> Self {
        Self {
            name: name.to_string(),
            robot: None,
            desired: DesiredMotion::new(),
            active: true,
            state: GoalState::NoGoal,
            goal: Pose::default(),
            use_encoder_goal: false,
            backing: false,
            just_distance: false,
            speed,
            close_dist: 100.0,
            // 360 means "never turn in place"; opt in via set_turn_thresh
            turn_thresh: 360.0,
            max_turn_speed: 0.0,
            max_rot_vel: 0.0,
            decel: 200.0,
            dist: 0.0,
            dist_travelled: 0.0,
            last_pose: Pose::default(),
        }
    }

    /// Drive to a goal in the global frame
    ///
    /// `backing` approaches the goal in reverse; `just_distance` switches to
    /// distance-only achievement.
    pub fn set_goal(&mut self, goal: Pose, backing: bool, just_distance: bool) {
        let Some(robot) = &self.robot else {
            log::error!("{}: goal set before attach, ignored", self.name);
            return;
        };
        let pose = robot.pose();
        self.state = GoalState::GoingToGoal;
        self.goal = goal;
        self.use_encoder_goal = false;
        self.backing = backing;
        self.just_distance = just_distance;
        self.dist = pose.distance_to(&goal);
        self.dist_travelled = 0.0;
        self.last_pose = pose;
    }

    /// Drive to a goal given as a distance and relative heading from the
    /// current pose
    pub fn set_goal_rel(
        &mut self,
        dist: f64,
        delta_heading_deg: f64,
        backing: bool,
        just_distance: bool,
    ) {
        let Some(robot) = &self.robot else {
            log::error!("{}: goal set before attach, ignored", self.name);
            return;
        };
        let pose = robot.pose();
        let goal = pose.offset(dist, pose.heading + delta_heading_deg);
        self.set_goal(goal, backing, just_distance);
    }

    /// Drive to a goal in the encoder frame
    pub fn set_encoder_goal(&mut self, goal: Pose, backing: bool, just_distance: bool) {
        let Some(robot) = &self.robot else {
            log::error!("{}: goal set before attach, ignored", self.name);
            return;
        };
        let pose = robot.encoder_pose();
        self.state = GoalState::GoingToGoal;
        self.goal = goal;
        self.use_encoder_goal = true;
        self.backing = backing;
        self.just_distance = just_distance;
        self.dist = pose.distance_to(&goal);
        self.dist_travelled = 0.0;
        self.last_pose = pose;
    }

    /// Abandon the current goal from any state
    pub fn cancel_goal(&mut self) {
        self.state = GoalState::NoGoal;
    }

    /// True once the goal has been achieved
    pub fn has_achieved_goal(&self) -> bool {
        self.state == GoalState::AchievedGoal
    }

    /// Current goal-seeking state
    pub fn goal_state(&self) -> GoalState {
        self.state
    }

    /// Maximum driving speed (mm/s)
    pub fn set_speed(&mut self, mm_per_sec: f64) {
        self.speed = mm_per_sec;
    }

    /// Position-mode achievement radius (mm)
    pub fn set_close_dist(&mut self, mm: f64) {
        self.close_dist = mm;
    }

    /// Heading error above which the action turns in place (degrees)
    pub fn set_turn_thresh(&mut self, deg: f64) {
        self.turn_thresh = deg;
    }

    /// Rotational speed bound requested while turning in place (deg/s,
    /// 0 disables)
    pub fn set_max_turn_speed(&mut self, deg_per_sec: f64) {
        self.max_turn_speed = deg_per_sec;
    }

    /// Rotational speed bound requested while driving (deg/s, 0 disables)
    pub fn set_max_rot_vel(&mut self, deg_per_sec: f64) {
        self.max_rot_vel = deg_per_sec;
    }

    /// Deceleration constant of the approach profile (mm/s²)
    pub fn set_decel(&mut self, mm_per_sec2: f64) {
        self.decel = mm_per_sec2;
    }
}

impl Action for GotoStraight {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&mut self, robot: RobotHandle) {
        self.robot = Some(robot);
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
        if self.state != GoalState::GoingToGoal {
            return None;
        }
        let robot = self.robot.as_ref()?;
        self.desired.reset();

        let (pose, vel) = if self.use_encoder_goal {
            robot.with_state(|s| (s.encoder_pose, s.vel))
        } else {
            robot.with_state(|s| (s.pose, s.vel))
        };
        self.dist_travelled += pose.distance_to(&self.last_pose);
        self.last_pose = pose;

        let (dist, at_goal) = if self.just_distance {
            let to_go = self.dist - self.dist_travelled;
            (to_go.abs(), to_go <= 0.0)
        } else {
            let d = pose.distance_to(&self.goal);
            (d, d < self.close_dist)
        };

        if at_goal && vel.abs() < ACHIEVED_VEL_EPSILON {
            log::info!(
                "{}: achieved goal (dist={:.1}mm, vel={:.1}mm/s)",
                self.name,
                dist,
                vel
            );
            self.state = GoalState::AchievedGoal;
            self.desired.set_vel(0.0, FULL_STRENGTH);
            self.desired.set_delta_heading(0.0, FULL_STRENGTH);
            return Some(self.desired);
        }

        let mut bearing = pose.angle_to(&self.goal);
        if self.backing {
            bearing = sub_degrees(bearing, 180.0);
        }
        self.desired.set_heading(bearing, FULL_STRENGTH);

        let heading_err = sub_degrees(pose.heading, bearing);
        if at_goal {
            // Inside the goal radius but still coasting: hold zero velocity
            // until achievement can be declared.
            self.desired.set_vel(0.0, FULL_STRENGTH);
        } else if heading_err.abs() <= self.turn_thresh {
            let mut v = (2.0 * dist * self.decel).sqrt().min(self.speed);
            if self.backing {
                v = -v;
            }
            self.desired.set_vel(v, FULL_STRENGTH);
            if self.max_rot_vel > 0.0 {
                self.desired.set_max_rot_vel(self.max_rot_vel);
            }
        } else if self.max_turn_speed > 0.0 {
            // Goal is behind: no forward motion until the heading error
            // drops below the threshold, and allow a faster pivot.
            self.desired.set_max_rot_vel(self.max_turn_speed);
        }

        Some(self.desired)
    }
}
