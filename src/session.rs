//! Current operator session.
//!
//! Sign-in itself happens against the remote system in the caller's UI; the
//! resulting context is installed here. Checkout refuses to run without an
//! installed session, because every sale must carry the operator's badge
//! number and (when bound) the event it was sold at.

use std::sync::Mutex;

use tracing::info;

use crate::model::SessionContext;

#[derive(Default)]
pub struct SessionState {
    current: Mutex<Option<SessionContext>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the session produced by a successful sign-in, replacing any
    /// previous one.
    pub fn sign_in(&self, context: SessionContext) {
        info!(
            employee_number = %context.employee_number,
            session_id = %context.session_id,
            "operator signed in"
        );
        *self.current.lock().unwrap() = Some(context);
    }

    /// Drop the current session, if any.
    pub fn sign_out(&self) {
        let mut current = self.current.lock().unwrap();
        if let Some(context) = current.take() {
            info!(employee_number = %context.employee_number, "operator signed out");
        }
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Option<SessionContext> {
        self.current.lock().unwrap().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}
