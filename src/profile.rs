// Part of cia402-rs. Copyright 2018-2019 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Motion profile generation.
//!
//! Position targets are turned into a linear trajectory with parabolic
//! blends (trapezoidal velocity), velocity and torque targets into
//! linear ramps. A profile is initialized once per new target and then
//! sampled step by step from the cyclic loop.

/// Sample period of position profiles, in seconds.
const POSITION_SAMPLE_TIME: f64 = 0.01;
/// Sample period of velocity and torque ramps, in seconds.
const RAMP_SAMPLE_TIME: f64 = 0.001;

/// Convert rpm to encoder ticks per second.
pub fn rpm_to_ticks(rpm: f64, ticks_per_turn: i32) -> f64 {
    rpm * f64::from(ticks_per_turn) / 60.0
}

/// Convert encoder ticks per second to rpm.
pub fn ticks_to_rpm(ticks: f64, ticks_per_turn: i32) -> f64 {
    ticks * 60.0 / f64::from(ticks_per_turn)
}

/// Kinematic limits of one axis, converted to internal units once.
#[derive(Debug, Clone, Copy)]
pub struct ProfileLimits {
    max_position: f64,
    min_position: f64,
    max_acceleration: f64, // ticks/s^2
    max_velocity: f64,     // ticks/s
    max_torque: i32,
    max_torque_acceleration: f64,
    limit_factor: f64,
}

impl ProfileLimits {
    /// Build the limit set for an axis.
    ///
    /// `max_acceleration` and `max_velocity` are given in rpm based
    /// units, torque values in the unit of the torque PDOs (per mille
    /// of rated torque).
    pub fn new(
        max_torque: i32,
        max_torque_acceleration: i32,
        max_acceleration: i32,
        max_velocity: i32,
        max_position: i32,
        min_position: i32,
        ticks_per_turn: i32,
    ) -> Self {
        Self {
            max_position: f64::from(max_position),
            min_position: f64::from(min_position),
            max_acceleration: rpm_to_ticks(f64::from(max_acceleration), ticks_per_turn),
            max_velocity: rpm_to_ticks(f64::from(max_velocity), ticks_per_turn),
            max_torque,
            max_torque_acceleration: f64::from(max_torque_acceleration),
            limit_factor: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileKind {
    Position,
    Velocity,
    Torque,
}

/// Motion profile of one axis.
///
/// The three kinds share the coefficient storage; which sampling rule
/// applies is decided by the kind tag set at initialization. The
/// initializers never fail: requests outside the limits are saturated
/// to something drivable, and degenerate requests come out as a
/// zero step profile that delivers no samples.
#[derive(Debug, Clone, Copy)]
pub struct MotionProfile {
    limits: ProfileLimits,
    kind: ProfileKind,
    // endpoints: position/value qi -> qf, rate qid -> qfd
    qi: f64,
    qf: f64,
    qid: f64,
    qfd: f64,
    vi: f64,
    acc: f64,
    dec: f64,
    // blend times and total duration
    tb_acc: f64,
    tb_dec: f64,
    tf: f64,
    // polynomial coefficients of the three segments
    ai: f64,
    bi: f64,
    ci: f64,
    di: f64,
    ei: f64,
    fi: f64,
    gi: f64,
    s_time: f64,
    step: u32,
    steps: u32,
}

impl MotionProfile {
    pub fn new(limits: ProfileLimits) -> Self {
        Self {
            limits,
            kind: ProfileKind::Position,
            qi: 0.0,
            qf: 0.0,
            qid: 0.0,
            qfd: 0.0,
            vi: 0.0,
            acc: 0.0,
            dec: 0.0,
            tb_acc: 0.0,
            tb_dec: 0.0,
            tf: 0.0,
            ai: 0.0,
            bi: 0.0,
            ci: 0.0,
            di: 0.0,
            ei: 0.0,
            fi: 0.0,
            gi: 0.0,
            s_time: POSITION_SAMPLE_TIME,
            step: 1,
            steps: 0,
        }
    }

    /// Set up a position profile from `actual` to `target` (ticks).
    ///
    /// `velocity`, `acceleration` and `deceleration` are in rpm based
    /// units. The target is clamped into the position limits, the
    /// cruise velocity to the axis maximum and to what the distance
    /// allows. Returns the step count; 0 means no motion is required.
    pub fn init_position(
        &mut self,
        target: i32,
        actual: i32,
        velocity: i32,
        acceleration: i32,
        deceleration: i32,
        ticks_per_turn: i32,
    ) -> u32 {
        self.kind = ProfileKind::Position;
        self.s_time = POSITION_SAMPLE_TIME;
        self.step = 0;

        self.qf = f64::from(target)
            .min(self.limits.max_position)
            .max(self.limits.min_position);
        self.qi = f64::from(actual);
        self.qid = 0.0;
        self.qfd = 0.0;
        self.vi = rpm_to_ticks(f64::from(velocity), ticks_per_turn).min(self.limits.max_velocity);
        self.acc = rpm_to_ticks(f64::from(acceleration), ticks_per_turn);
        self.dec = rpm_to_ticks(f64::from(deceleration), ticks_per_turn);

        let mut distance = self.qf - self.qi;
        if distance == 0.0 || self.vi <= 0.0 || self.acc <= 0.0 || self.dec <= 0.0 {
            return self.deactivate();
        }
        let backward = distance < 0.0;
        if backward {
            distance = -distance;
        }

        self.acc = self
            .acc
            .min(self.limits.limit_factor * distance)
            .min(self.limits.max_acceleration);
        self.dec = self
            .dec
            .min(self.limits.limit_factor * distance)
            .min(self.limits.max_acceleration);

        let mut cruise = self.blend_distances(distance);
        if cruise < 0.0 {
            // the requested speed cannot be reached within the
            // distance: limit it and steepen the blends until the
            // profile fits
            if self.vi > distance {
                self.vi = distance;
            }
            for _ in 0..2 {
                if cruise < 0.0 {
                    self.acc = self.acc.max(self.vi);
                    self.dec = self.dec.max(self.vi);
                    cruise = self.blend_distances(distance);
                }
            }
        }

        let t_cruise = cruise / self.vi;
        self.tf = self.tb_acc + self.tb_dec + t_cruise;
        if backward {
            self.vi = -self.vi;
        }

        self.ai = self.qi;
        self.bi = self.qid;
        self.ci = (self.vi - self.qid) / (2.0 * self.tb_acc);
        self.di = self.ai + self.tb_acc * self.bi + self.ci * self.tb_acc * self.tb_acc
            - self.vi * self.tb_acc;
        self.ei = self.qf;
        self.fi = self.qfd;
        self.gi = (self.di + (self.tf - self.tb_dec) * self.vi + self.fi * self.tb_dec - self.ei)
            / (self.tb_dec * self.tb_dec);

        self.steps = (self.tf / self.s_time).round() as u32;
        if self.steps == 0 {
            self.step = 1;
        }
        self.steps
    }

    /// Blend times for the current vi/acc/dec and the cruise distance
    /// they leave over.
    fn blend_distances(&mut self, distance: f64) -> f64 {
        self.tb_acc = self.vi / self.acc;
        self.tb_dec = self.vi / self.dec;
        let d_acc = self.acc * self.tb_acc * self.tb_acc / 2.0;
        let d_dec = self.dec * self.tb_dec * self.tb_dec / 2.0;
        distance - d_acc - d_dec
    }

    fn position_sample(&self, step: u32) -> i32 {
        if self.qi == self.qf {
            return self.qf as i32;
        }
        let ts = (self.s_time * f64::from(step)).min(self.tf);
        let q = if ts < self.tb_acc {
            self.ai + ts * self.bi + self.ci * ts * ts
        } else if ts < self.tf - self.tb_dec {
            self.di + self.vi * ts
        } else {
            self.ei + (ts - self.tf) * self.fi + (ts - self.tf) * (ts - self.tf) * self.gi
        };
        q.round() as i32
    }

    /// Set up a velocity ramp from `actual` to `target` (rpm).
    pub fn init_velocity(
        &mut self,
        target: i32,
        actual: i32,
        acceleration: i32,
        deceleration: i32,
        ticks_per_turn: i32,
    ) -> u32 {
        self.kind = ProfileKind::Velocity;
        self.qid = f64::from(actual);
        let max = ticks_to_rpm(self.limits.max_velocity, ticks_per_turn);
        self.qfd = f64::from(target).min(max).max(-max);

        self.acc = if self.qfd >= self.qid {
            f64::from(acceleration)
        } else {
            -f64::from(deceleration)
        };
        let max_acc = ticks_to_rpm(self.limits.max_acceleration, ticks_per_turn);
        self.acc = self.acc.min(max_acc).max(-max_acc);

        self.init_ramp()
    }

    /// Set up a torque ramp from `actual` to `target` (per mille of
    /// rated torque).
    pub fn init_torque(
        &mut self,
        target: i32,
        actual: i32,
        acceleration: i32,
        deceleration: i32,
    ) -> u32 {
        self.kind = ProfileKind::Torque;
        self.qid = f64::from(actual);
        let max = f64::from(self.limits.max_torque);
        self.qfd = f64::from(target).min(max).max(-max);

        self.acc = if self.qfd >= self.qid {
            f64::from(acceleration)
        } else {
            -f64::from(deceleration)
        };
        self.acc = self
            .acc
            .min(self.limits.max_torque_acceleration)
            .max(-self.limits.max_torque_acceleration);

        self.init_ramp()
    }

    fn init_ramp(&mut self) -> u32 {
        self.s_time = RAMP_SAMPLE_TIME;
        self.step = 0;
        if self.qfd == self.qid || self.acc == 0.0 {
            return self.deactivate();
        }
        let total_time = (self.qfd - self.qid) / self.acc;
        self.steps = (total_time / self.s_time).round() as u32;
        if self.steps == 0 {
            self.step = 1;
        }
        self.steps
    }

    fn ramp_sample(&self, step: u32) -> i32 {
        (self.qid + self.acc * self.s_time * f64::from(step)).round() as i32
    }

    fn deactivate(&mut self) -> u32 {
        self.step = 1;
        self.steps = 0;
        0
    }

    /// Sample the profile at `step` without advancing it.
    pub fn sample(&self, step: u32) -> i32 {
        match self.kind {
            ProfileKind::Position => self.position_sample(step),
            ProfileKind::Velocity | ProfileKind::Torque => self.ramp_sample(step),
        }
    }

    /// True while the profile still has samples to deliver.
    pub fn is_active(&self) -> bool {
        self.step <= self.steps
    }

    /// Deliver the sample for the current step and move to the next
    /// one, or `None` once the profile is exhausted. A fresh profile
    /// delivers the sample at step 0 (the starting value) first and the
    /// one at the step count (the target) last.
    pub fn advance(&mut self) -> Option<i32> {
        if self.step > self.steps {
            return None;
        }
        let value = self.sample(self.step);
        self.step += 1;
        Some(value)
    }

    /// Drop all remaining samples.
    pub fn cancel(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
fn test_limits() -> ProfileLimits {
    ProfileLimits::new(1000, 50, 5000, 5000, i32::MAX, -i32::MAX, 65536)
}

#[cfg(test)]
fn collect(profile: &mut MotionProfile) -> Vec<i32> {
    let mut samples = Vec::new();
    while let Some(v) = profile.advance() {
        samples.push(v);
    }
    samples
}

#[test]
fn test_rpm_round_trip() {
    for &ticks_per_turn in &[512, 4096, 65536, 4_000_000] {
        for &rpm in &[0.0, 1.0, 50.0, 3000.0, -4500.5] {
            let back = ticks_to_rpm(rpm_to_ticks(rpm, ticks_per_turn), ticks_per_turn);
            assert!((back - rpm).abs() < 1e-9, "{} != {}", back, rpm);
        }
    }
    assert_eq!(rpm_to_ticks(60.0, 65536), 65536.0);
}

#[test]
fn test_position_profile_trapezoid() {
    let mut p = MotionProfile::new(test_limits());
    let steps = p.init_position(10000, 0, 3000, 3000, 3000, 65536);
    assert_eq!(steps, 110);

    let samples = collect(&mut p);
    assert_eq!(samples.len(), steps as usize + 1);
    assert_eq!(samples[0], 0);
    assert_eq!(*samples.last().unwrap(), 10000);
    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    // exhausted now
    assert!(!p.is_active());
    assert_eq!(p.advance(), None);
}

#[test]
fn test_position_profile_backward() {
    let mut p = MotionProfile::new(test_limits());
    let steps = p.init_position(-5000, 5000, 3000, 3000, 3000, 65536);
    assert!(steps > 0);

    let samples = collect(&mut p);
    assert_eq!(samples[0], 5000);
    assert_eq!(*samples.last().unwrap(), -5000);
    assert!(samples.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_position_profile_degenerate() {
    let mut p = MotionProfile::new(test_limits());
    // already at the target
    assert_eq!(p.init_position(777, 777, 3000, 3000, 3000, 65536), 0);
    assert!(!p.is_active());
    assert_eq!(p.advance(), None);
    // no velocity
    assert_eq!(p.init_position(1000, 0, 0, 3000, 3000, 65536), 0);
    assert_eq!(p.advance(), None);
    // no acceleration
    assert_eq!(p.init_position(1000, 0, 3000, 0, 0, 65536), 0);
    assert_eq!(p.advance(), None);
}

#[test]
fn test_position_profile_short_distance() {
    // requested speed is far too high for the distance, the profile
    // saturates instead of overshooting
    let mut p = MotionProfile::new(test_limits());
    let steps = p.init_position(1000, 0, 3000, 3000, 3000, 65536);
    assert!(steps > 0);

    let samples = collect(&mut p);
    assert_eq!(samples[0], 0);
    assert_eq!(*samples.last().unwrap(), 1000);
    assert!(samples.iter().all(|&q| (0..=1000).contains(&q)));
    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_position_profile_clamps_target() {
    let limits = ProfileLimits::new(1000, 50, 5000, 5000, 200_000, -200_000, 65536);
    let mut p = MotionProfile::new(limits);
    let steps = p.init_position(10_000_000, 0, 3000, 3000, 3000, 65536);
    assert!(steps > 0);
    let samples = collect(&mut p);
    assert_eq!(*samples.last().unwrap(), 200_000);
}

#[test]
fn test_velocity_ramp() {
    let mut p = MotionProfile::new(test_limits());
    let steps = p.init_velocity(300, 0, 100, 100, 65536);
    assert_eq!(steps, 3000);

    let samples = collect(&mut p);
    assert_eq!(samples.len(), 3001);
    assert_eq!(samples[0], 0);
    assert_eq!(*samples.last().unwrap(), 300);
    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_velocity_ramp_down_and_clamp() {
    let mut p = MotionProfile::new(test_limits());
    // deceleration is used when ramping down
    let steps = p.init_velocity(0, 300, 100, 150, 65536);
    assert_eq!(steps, 2000);
    let samples = collect(&mut p);
    assert_eq!(samples[0], 300);
    assert_eq!(*samples.last().unwrap(), 0);

    // targets above the velocity limit are clamped to it
    p.init_velocity(20000, 0, 100, 100, 65536);
    let samples = collect(&mut p);
    assert_eq!(*samples.last().unwrap(), 5000);

    // no change, no steps
    assert_eq!(p.init_velocity(100, 100, 100, 100, 65536), 0);
    assert_eq!(p.advance(), None);
}

#[test]
fn test_torque_ramp() {
    let mut p = MotionProfile::new(test_limits());
    let steps = p.init_torque(500, 0, 50, 50);
    assert_eq!(steps, 10000);
    let samples = collect(&mut p);
    assert_eq!(samples[0], 0);
    assert_eq!(*samples.last().unwrap(), 500);

    // torque targets are clamped to the rated maximum
    p.init_torque(1500, 0, 50, 50);
    let samples = collect(&mut p);
    assert_eq!(*samples.last().unwrap(), 1000);
}

#[test]
fn test_cancel() {
    let mut p = MotionProfile::new(test_limits());
    p.init_velocity(300, 0, 100, 100, 65536);
    assert!(p.is_active());
    p.advance();
    p.cancel();
    assert!(!p.is_active());
    assert_eq!(p.advance(), None);
}
