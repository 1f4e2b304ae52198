use std::time::Instant;

/// Bound on the accumulated integral term (anti-windup).
pub const INTEGRAL_LIMIT: f64 = 100.0;

/// Floor applied to `dt` when two updates arrive with no measurable gap.
pub const MIN_DT_SECS: f64 = 0.01;

/// Gains and output bounds for a single-axis PID corrector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Lower bound of the returned delta (degrees).
    pub output_min: f64,
    /// Upper bound of the returned delta (degrees).
    pub output_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.15,
            kd: 0.3,
            output_min: -25.0,
            output_max: 25.0,
        }
    }
}

/// Single-axis PID corrector.
///
/// Takes a normalized error in `[-1, 1]` and returns a bounded angle delta.
/// `dt` comes from wall-clock time between calls.
#[derive(Clone, Debug)]
pub struct PidController {
    config: PidConfig,
    integral: f64,
    last_error: f64,
    last_time: Instant,
}

impl PidController {
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            integral: 0.0,
            last_error: 0.0,
            last_time: Instant::now(),
        }
    }

    pub fn config(&self) -> PidConfig {
        self.config
    }

    /// Accumulated (unscaled) integral term.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// Compute the next delta for `error`, timed against now.
    pub fn update(&mut self, error: f64) -> f64 {
        self.update_at(error, Instant::now())
    }

    /// Compute the next delta for `error` as if observed at `now`.
    pub fn update_at(&mut self, error: f64, now: Instant) -> f64 {
        let error = sanitize_error(error);

        let mut dt = now
            .checked_duration_since(self.last_time)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        if dt <= 0.0 {
            dt = MIN_DT_SECS;
        }

        let proportional = self.config.kp * error;

        let integral = (self.integral + error * dt).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        let integral_term = self.config.ki * integral;

        let derivative_term = self.config.kd * (error - self.last_error) / dt;

        let output = clamp_output(
            proportional + integral_term + derivative_term,
            self.config.output_min,
            self.config.output_max,
        );

        self.integral = integral;
        self.last_error = error;
        self.last_time = now;

        output
    }

    /// Zero the integral and last error, and restart the clock.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_time = Instant::now();
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.config.kp = finite_or(kp, self.config.kp);
        self.config.ki = finite_or(ki, self.config.ki);
        self.config.kd = finite_or(kd, self.config.kd);
        log::debug!("pid gains set: kp={} ki={} kd={}", kp, ki, kd);
    }
}

impl Default for PidController {
    fn default() -> Self {
        Self::new(PidConfig::default())
    }
}

fn sanitize_error(error: f64) -> f64 {
    if error.is_nan() {
        return 0.0;
    }
    error.clamp(-1.0, 1.0)
}

fn clamp_output(value: f64, min: f64, max: f64) -> f64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(lo, hi)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
