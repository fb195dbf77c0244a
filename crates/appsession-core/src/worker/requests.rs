//! Worker-side arbitration of rerun and stop requests.
//!
//! The session offers requests from its control loop while the worker
//! checks for them from its own task, so the state sits behind a mutex.

use std::sync::{Mutex, MutexGuard, PoisonError};

use appsession_types::RerunData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Keep running the current request.
    Continue,
    /// A new request is pending.
    RerunRequested,
    /// The worker must stop; no further requests are accepted.
    StopRequested,
}

/// What the worker should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRequest {
    Rerun(RerunData),
    Stop,
}

#[derive(Debug)]
pub struct ScriptRequests {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RequestState,
    rerun_data: RerunData,
}

impl Default for ScriptRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRequests {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RequestState::Continue,
                rerun_data: RerunData::default(),
            }),
        }
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    pub fn request_stop(&self) {
        self.lock().state = RequestState::StopRequested;
    }

    /// Records a rerun request. Refused once a stop was requested.
    ///
    /// A request arriving while another is pending is merged into it: the
    /// newer query string wins and widget values are overlaid key by key.
    pub fn request_rerun(&self, data: RerunData) -> bool {
        let mut inner = self.lock();
        match inner.state {
            RequestState::StopRequested => false,
            RequestState::Continue => {
                inner.state = RequestState::RerunRequested;
                inner.rerun_data = data;
                true
            }
            RequestState::RerunRequested => {
                let pending = std::mem::take(&mut inner.rerun_data);
                inner.rerun_data = coalesce(pending, data);
                true
            }
        }
    }

    /// Polled while a run is in progress. Returns a request that should
    /// interrupt the current run, if any.
    pub fn on_script_yield(&self) -> Option<ScriptRequest> {
        let mut inner = self.lock();
        match inner.state {
            RequestState::Continue => None,
            RequestState::StopRequested => Some(ScriptRequest::Stop),
            RequestState::RerunRequested => {
                inner.state = RequestState::Continue;
                Some(ScriptRequest::Rerun(std::mem::take(&mut inner.rerun_data)))
            }
        }
    }

    /// Called when a run completes. Without a pending rerun the worker
    /// moves to `StopRequested` and refuses later requests.
    pub fn on_script_finished(&self) -> ScriptRequest {
        let mut inner = self.lock();
        match inner.state {
            RequestState::RerunRequested => {
                inner.state = RequestState::Continue;
                ScriptRequest::Rerun(std::mem::take(&mut inner.rerun_data))
            }
            RequestState::Continue | RequestState::StopRequested => {
                inner.state = RequestState::StopRequested;
                ScriptRequest::Stop
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn coalesce(pending: RerunData, newer: RerunData) -> RerunData {
    let widget_states = match (pending.widget_states, newer.widget_states) {
        (Some(mut old), Some(new)) => {
            old.extend(new);
            Some(old)
        }
        (old, None) => old,
        (None, new) => new,
    };

    RerunData {
        query_string: newer.query_string,
        widget_states,
    }
}
