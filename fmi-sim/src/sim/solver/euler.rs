use super::{Model, Solver, SolverError};

/// Explicit forward Euler, one step per call.
pub struct Euler {
    /// Current time
    time: f64,
    /// Continuous states
    x: Vec<f64>,
    /// Derivatives of continuous states
    dx: Vec<f64>,
    /// Event indicators
    z: Vec<f64>,
    prez: Vec<f64>,
}

impl<M: Model + ?Sized> Solver<M> for Euler {
    fn new(start_time: f64, _tol: f64, nx: usize, nz: usize) -> Self {
        Self {
            time: start_time,
            x: vec![0.0; nx],
            dx: vec![0.0; nx],
            z: vec![0.0; nz],
            prez: vec![0.0; nz],
        }
    }

    fn step(&mut self, model: &mut M, next_time: f64) -> Result<(f64, bool), SolverError> {
        let dt = next_time - self.time;
        if dt < 0.0 {
            return Err(SolverError::Backwards {
                from: self.time,
                to: next_time,
            });
        }

        if !self.x.is_empty() {
            model.get_continuous_states(&mut self.x)?;
            model.get_continuous_state_derivatives(&mut self.dx)?;

            for (x, dx) in self.x.iter_mut().zip(&self.dx) {
                *x += dx * dt;
            }
        }

        model.set_time(next_time)?;
        if !self.x.is_empty() {
            model.set_continuous_states(&self.x)?;
        }

        let mut state_event = false;

        if !self.z.is_empty() {
            model.get_event_indicators(&mut self.z)?;

            for (z, prez) in self.z.iter().zip(self.prez.iter_mut()) {
                // -\+ or +/-
                state_event |= (*prez <= 0.0 && *z > 0.0) || (*prez > 0.0 && *z <= 0.0);
                *prez = *z;
            }
        }
        self.time = next_time;

        Ok((self.time, state_event))
    }

    fn reset(&mut self, model: &mut M, time: f64) -> Result<(), SolverError> {
        self.time = time;
        if !self.z.is_empty() {
            model.get_event_indicators(&mut self.prez)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fmi::fmi3::Fmi3Error;

    use super::*;

    /// `der(x) = -x` with the indicator `x - 0.5`
    struct Decay {
        time: f64,
        x: f64,
    }

    impl Model for Decay {
        fn get_continuous_states(&mut self, x: &mut [f64]) -> Result<(), Fmi3Error> {
            x[0] = self.x;
            Ok(())
        }

        fn set_continuous_states(&mut self, states: &[f64]) -> Result<(), Fmi3Error> {
            self.x = states[0];
            Ok(())
        }

        fn get_continuous_state_derivatives(&mut self, dx: &mut [f64]) -> Result<(), Fmi3Error> {
            dx[0] = -self.x;
            Ok(())
        }

        fn get_event_indicators(&mut self, z: &mut [f64]) -> Result<(), Fmi3Error> {
            z[0] = self.x - 0.5;
            Ok(())
        }

        fn set_time(&mut self, time: f64) -> Result<(), Fmi3Error> {
            self.time = time;
            Ok(())
        }
    }

    #[test]
    fn steps_and_detects_crossings() {
        let mut model = Decay { time: 0.0, x: 1.0 };
        let mut solver = <Euler as Solver<Decay>>::new(0.0, 0.0, 1, 1);
        solver.reset(&mut model, 0.0).unwrap();

        let (t, event) = solver.step(&mut model, 0.25).unwrap();
        assert_eq!((t, event), (0.25, false));
        assert_eq!(model.x, 0.75);
        assert_eq!(model.time, 0.25);

        // 0.75 - 0.75 * 0.5 = 0.375 crosses 0.5
        let (_, event) = solver.step(&mut model, 0.75).unwrap();
        assert!(event);

        assert!(matches!(
            solver.step(&mut model, 0.5),
            Err(SolverError::Backwards { .. })
        ));
    }
}
