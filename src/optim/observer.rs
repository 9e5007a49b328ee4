use argmin::core::{observers::Observe, Error, State, KV};
use std::sync::Arc;

/// A custom observer that allows passing a callback function to monitor optimization progress.
///
/// The `CallbackObserver` implements the `Observe` trait from the argmin library and provides
/// a way to execute custom logic during the optimization process. The callback function is called
/// after each iteration with the current cost and best cost values.
#[derive(Clone)]
pub struct CallbackObserver {
    /// The callback function to be executed after each iteration.
    /// Takes two f64 parameters:
    /// - First parameter: Current cost value of the iteration
    /// - Second parameter: Best cost value found so far
    pub callback: Arc<dyn Fn(f64, f64) + Send + Sync>,
}

impl CallbackObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(f64, f64) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Observer writing every iteration to the trace log.
    pub fn trace(label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(move |cost, best| log::trace!("{}: cost {:.6e}, best {:.6e}", label, cost, best))
    }
}

impl std::fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackObserver").finish_non_exhaustive()
    }
}

impl<I> Observe<I> for CallbackObserver
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _msg: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    /// Called after each optimization iteration.
    /// Passes the current cost and best cost values to the callback function.
    ///
    /// # Arguments
    /// * `state` - Current optimization state containing cost values
    /// * `_kv` - Key-value storage (unused)
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        (self.callback)(state.get_cost(), state.get_best_cost());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argmin::core::IterState;
    use ndarray::Array1;
    use std::sync::Mutex;

    #[test]
    fn test_callback_receives_costs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut observer = CallbackObserver::new(move |cost, best| {
            sink.lock().unwrap().push((cost, best));
        });

        let state: IterState<Array1<f64>, (), (), (), (), f64> = IterState::new().cost(2.0);
        Observe::observe_iter(&mut observer, &state, &KV::new()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 2.0);
    }
}
